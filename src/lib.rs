//! Single-node proof-of-work ledger
//!
//! Blocks link signed transactions through SHA-256 hashes; each block carries
//! a proof found against the hash of the block before it.

pub mod api;
pub mod blockchain;
pub mod config;

pub use blockchain::{Block, Ledger, LedgerError, Transaction};
pub use config::Config;
