//! Configuration for the ledger node

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::Path;

/// Environment variable holding the config file path
pub const CONFIG_PATH_ENV: &str = "POW_LEDGER_CONFIG";

/// Config file used when the environment variable is not set
pub const DEFAULT_CONFIG_PATH: &str = "pow_ledger.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex characters a proof hash needs
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    /// Mine blocks with no transactions instead of rejecting the request
    #[serde(default)]
    pub allow_empty_blocks: bool,
    /// Proof attempts between two looks at the cancel token
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            allow_empty_blocks: false,
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_difficulty() -> usize {
    2
}

fn default_cancel_check_interval() -> u64 {
    1024
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Loads the file named by `POW_LEDGER_CONFIG`, or `pow_ledger.toml`.
    /// A missing default file yields the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.ledger.validate()?;
        Ok(config)
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A SHA-256 hex digest has 64 characters
        if !(1..=64).contains(&self.difficulty) {
            return Err(ConfigError::Invalid(format!(
                "difficulty must be between 1 and 64, got {}",
                self.difficulty
            )));
        }

        if self.cancel_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "cancel_check_interval must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
