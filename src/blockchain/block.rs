use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::{canonical_timestamp, CanonicalRecord, Transaction};

/// Sentinel previous hash of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// Represents a block in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00.000000Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions included in this block, in inclusion order
    pub transactions: Vec<Transaction>,

    /// Proof of work (nonce)
    pub proof: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of this block's canonical payload
    pub current_hash: String,
}

/// Hashed view of a block. Field order is the wire format.
#[derive(Serialize)]
struct CanonicalBlock<'a> {
    index: u64,
    timestamp: String,
    transactions: Vec<CanonicalRecord<'a>>,
    previous_hash: &'a str,
    proof: u64,
}

impl Block {
    /// Creates a new block and stamps it with its hash
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The transactions to include in the block
    /// * `proof` - The proof of work (nonce)
    /// * `previous_hash` - The hash of the previous block
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        proof: u64,
        previous_hash: String,
    ) -> Result<Self, serde_json::Error> {
        let mut block = Block {
            index,
            timestamp: Utc::now().trunc_subsecs(6),
            transactions,
            proof,
            previous_hash,
            current_hash: String::new(),
        };

        block.current_hash = block.compute_hash()?;
        Ok(block)
    }

    /// Encodes every field except `current_hash`
    pub fn canonical_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        let canonical = CanonicalBlock {
            index: self.index,
            timestamp: canonical_timestamp(&self.timestamp),
            transactions: self.transactions.iter().map(Transaction::canonical_record).collect(),
            previous_hash: &self.previous_hash,
            proof: self.proof,
        };

        serde_json::to_vec(&canonical)
    }

    /// SHA-256 of the canonical payload, hex encoded
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let payload = self.canonical_payload()?;
        Ok(hex::encode(Sha256::digest(&payload)))
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}
