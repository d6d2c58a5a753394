use std::sync::{Mutex, MutexGuard, PoisonError};
use log::{debug, info};

use super::block::Block;
use super::chain::{Ledger, LedgerError};
use super::pow::CancelToken;

#[derive(Debug, Default)]
struct MinerState {
    next_attempt: u64,
    running: Option<(u64, CancelToken)>,
}

/// Runs proof searches for a ledger off its lock, one attempt at a time.
///
/// Starting a new attempt cancels the one in flight; the older search
/// returns `PowError::Cancelled` and leaves the ledger untouched.
#[derive(Debug)]
pub struct Miner {
    ledger: Ledger,
    state: Mutex<MinerState>,
}

impl Miner {
    pub fn new(ledger: Ledger) -> Self {
        Miner {
            ledger,
            state: Mutex::new(MinerState::default()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Mines the pending transactions, superseding any attempt still running
    pub fn mine(&self) -> Result<Block, LedgerError> {
        let token = CancelToken::new();
        let attempt = {
            let mut state = self.lock_state();
            let attempt = state.next_attempt;
            state.next_attempt += 1;

            if let Some((previous, stale)) = state.running.replace((attempt, token.clone())) {
                info!("Mining attempt {} superseded by attempt {}", previous, attempt);
                stale.cancel();
            }
            attempt
        };

        debug!("Mining attempt {} started", attempt);
        let result = self.ledger.mine_detached(&token);

        let mut state = self.lock_state();
        if matches!(state.running, Some((current, _)) if current == attempt) {
            state.running = None;
        }

        result
    }

    /// Abandons the attempt in flight, if any
    ///
    /// # Returns
    ///
    /// Whether an attempt was running
    pub fn cancel(&self) -> bool {
        match self.lock_state().running.take() {
            Some((attempt, token)) => {
                info!("Mining attempt {} cancelled", attempt);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_mining(&self) -> bool {
        self.lock_state().running.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, MinerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
