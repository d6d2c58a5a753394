use sha2::{Digest, Sha256};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors that can occur during the proof-of-work search
#[derive(Debug, Error)]
pub enum PowError {
    #[error("Proof search cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Proof space exhausted for difficulty {0}")]
    Exhausted(usize),
}

/// Cooperative stop signal for a running proof search.
///
/// Clones share the same flag, so one handle can be moved to the mining
/// worker while another stays with whoever may want to abandon it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The proof-of-work puzzle: find `p` such that
/// `SHA256(reference_hash ++ p)` starts with `difficulty` zero hex digits.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: usize,
    cancel_check_interval: u64,
    target: String,
}

impl ProofOfWork {
    /// # Arguments
    ///
    /// * `difficulty` - Number of leading zero hex characters required
    /// * `cancel_check_interval` - How many attempts run between checks of the cancel token
    pub fn new(difficulty: usize, cancel_check_interval: u64) -> Self {
        ProofOfWork {
            difficulty,
            cancel_check_interval: cancel_check_interval.max(1),
            target: "0".repeat(difficulty),
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Hex digest the proof predicate is evaluated on
    pub fn proof_hash(reference_hash: &str, proof: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(reference_hash.as_bytes());
        hasher.update(proof.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn valid_proof(&self, reference_hash: &str, proof: u64) -> bool {
        Self::proof_hash(reference_hash, proof).starts_with(&self.target)
    }

    /// Sequential search for the smallest valid proof. Deterministic for a
    /// given reference hash and difficulty.
    pub fn proof_of_work(&self, reference_hash: &str) -> Result<u64, PowError> {
        self.search(reference_hash, None)
    }

    /// Same search as [`proof_of_work`](Self::proof_of_work), abandoned once `token` is cancelled
    pub fn proof_of_work_cancellable(
        &self,
        reference_hash: &str,
        token: &CancelToken,
    ) -> Result<u64, PowError> {
        self.search(reference_hash, Some(token))
    }

    fn search(&self, reference_hash: &str, token: Option<&CancelToken>) -> Result<u64, PowError> {
        let mut proof: u64 = 0;

        loop {
            if let Some(token) = token {
                if proof % self.cancel_check_interval == 0 && token.is_cancelled() {
                    return Err(PowError::Cancelled { attempts: proof });
                }
            }

            if self.valid_proof(reference_hash, proof) {
                return Ok(proof);
            }

            proof = proof
                .checked_add(1)
                .ok_or(PowError::Exhausted(self.difficulty))?;
        }
    }
}
