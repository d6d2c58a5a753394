// Ledger module
//
// This module contains the core ledger implementation including:
// - Block structure
// - Ledger (chain + pending pool)
// - Transaction structure
// - Cryptography utilities
// - Proof of work algorithm
// - Miner (cancellable proof searches)

pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pow;
pub mod transaction;

#[cfg(test)]
mod scenarios;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Ledger, LedgerError};
pub use crypto::{Address, DigitalSignature, KeyPair};
pub use miner::Miner;
pub use pow::CancelToken;
pub use transaction::{Transaction, TransactionError};
