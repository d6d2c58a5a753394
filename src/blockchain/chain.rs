use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use log::{debug, info, warn};

use crate::config::LedgerConfig;

use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::crypto::CryptoError;
use super::pow::{CancelToken, PowError, ProofOfWork};
use super::transaction::{Transaction, TransactionError};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Proof of work error: {0}")]
    PowError(#[from] PowError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("No pending transactions to mine")]
    NoPendingTransactions,

    #[error("Stale block: {0}")]
    StaleBlock(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Chain has not been initialized")]
    EmptyChain,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    id: String,
    transaction: Transaction,
}

/// Everything guarded by the ledger's single lock
#[derive(Debug, Default)]
struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<PendingEntry>,
    /// Ids of every transaction already inside `chain`
    confirmed: HashSet<String>,
}

impl LedgerState {
    fn last_block(&self) -> Result<&Block, LedgerError> {
        self.chain.last().ok_or(LedgerError::EmptyChain)
    }

    fn is_known(&self, id: &str) -> bool {
        self.confirmed.contains(id) || self.pending.iter().any(|entry| entry.id == id)
    }

    fn commit(&mut self, block: Block, ids: HashSet<String>) {
        self.pending.retain(|entry| !ids.contains(&entry.id));
        self.confirmed.extend(ids);
        self.chain.push(block);
    }
}

/// A block waiting for its proof. Built from a snapshot of the ledger so the
/// search can run without holding the lock.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
}

impl Candidate {
    /// Runs the proof search for this candidate and seals it into a block
    pub fn mine(self, pow: &ProofOfWork, token: &CancelToken) -> Result<Block, LedgerError> {
        let proof = pow.proof_of_work_cancellable(&self.previous_hash, token)?;
        Ok(Block::new(self.index, self.transactions, proof, self.previous_hash)?)
    }
}

/// The append-only chain plus its pool of pending transactions
#[derive(Debug, Clone)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,

    /// Proof-of-work puzzle shared by mining and validation
    pow: ProofOfWork,

    /// Whether `mine` seals a block when nothing is pending
    allow_empty_blocks: bool,
}

impl Ledger {
    /// Creates a ledger holding only the genesis block
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_chain(config, Vec::new())
    }

    /// Creates a ledger from blocks a caller kept elsewhere.
    ///
    /// The blocks are taken as they are; `validate_chain` reports whether
    /// they hold up. An empty list gets a fresh genesis block.
    pub fn with_chain(config: &LedgerConfig, blocks: Vec<Block>) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();
        for block in &blocks {
            for transaction in &block.transactions {
                state.confirmed.insert(transaction.id()?);
            }
        }
        state.chain = blocks;

        let ledger = Ledger {
            state: Arc::new(RwLock::new(state)),
            pow: ProofOfWork::new(config.difficulty, config.cancel_check_interval),
            allow_empty_blocks: config.allow_empty_blocks,
        };

        ledger.initialize()?;

        if !ledger.validate_chain() {
            warn!("Loaded chain does not validate");
        }

        Ok(ledger)
    }

    /// Appends the genesis block unless the chain already has one
    pub fn initialize(&self) -> Result<(), LedgerError> {
        let mut state = self.write_state();

        if !state.chain.is_empty() {
            debug!("Chain already initialized with {} blocks", state.chain.len());
            return Ok(());
        }

        let proof = self.pow.proof_of_work(GENESIS_PREVIOUS_HASH)?;
        let genesis = Block::new(0, Vec::new(), proof, GENESIS_PREVIOUS_HASH.to_string())?;

        info!("Created genesis block {}", genesis.current_hash);
        state.chain.push(genesis);

        Ok(())
    }

    /// Admits a signed transaction into the pending pool
    ///
    /// # Returns
    ///
    /// The index of the block expected to include it
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<u64, LedgerError> {
        check_transaction(&transaction)?;

        let id = transaction.id()?;
        let mut state = self.write_state();

        if state.is_known(&id) {
            return Err(LedgerError::DuplicateTransaction(id));
        }

        let block_index = state.last_block()?.index + 1;

        info!(
            "Transaction added: {} -> {} : {}",
            transaction.sender, transaction.recipient, transaction.amount
        );
        state.pending.push(PendingEntry { id, transaction });

        Ok(block_index)
    }

    /// Mines the pending transactions into a new block while holding the lock
    /// for the whole search
    pub fn mine(&self) -> Result<Block, LedgerError> {
        let mut state = self.write_state();

        let candidate = self.candidate_from(&state)?;
        let proof = self.pow.proof_of_work(&candidate.previous_hash)?;
        let block = Block::new(candidate.index, candidate.transactions, proof, candidate.previous_hash)?;

        let ids = state.pending.iter().map(|entry| entry.id.clone()).collect();
        state.commit(block.clone(), ids);

        info!(
            "New block mined! Block index: {} ({} transactions, proof {})",
            block.index,
            block.transactions.len(),
            block.proof
        );

        Ok(block)
    }

    /// Snapshot of what the next block would contain
    pub fn candidate(&self) -> Result<Candidate, LedgerError> {
        let state = self.read_state();
        self.candidate_from(&state)
    }

    fn candidate_from(&self, state: &LedgerState) -> Result<Candidate, LedgerError> {
        if state.pending.is_empty() && !self.allow_empty_blocks {
            return Err(LedgerError::NoPendingTransactions);
        }

        let last_block = state.last_block()?;

        Ok(Candidate {
            index: last_block.index + 1,
            previous_hash: last_block.current_hash.clone(),
            transactions: state.pending.iter().map(|entry| entry.transaction.clone()).collect(),
        })
    }

    /// Mines without holding the lock during the search. The result is
    /// refused if another block won the race meanwhile.
    pub fn mine_detached(&self, token: &CancelToken) -> Result<Block, LedgerError> {
        let candidate = self.candidate()?;
        let block = candidate.mine(&self.pow, token)?;

        self.append_block(block.clone())?;

        info!("New block mined! Block index: {}", block.index);
        Ok(block)
    }

    /// Appends a block mined elsewhere. It must extend the current tip;
    /// a second successor of the same block is refused.
    pub fn append_block(&self, block: Block) -> Result<(), LedgerError> {
        let mut state = self.write_state();
        let last_block = state.last_block()?;

        if block.index != last_block.index + 1 || block.previous_hash != last_block.current_hash {
            warn!(
                "Refusing block {} ({}): tip is block {} ({})",
                block.index, block.previous_hash, last_block.index, last_block.current_hash
            );
            return Err(LedgerError::StaleBlock(format!(
                "block {} does not extend block {}",
                block.index, last_block.index
            )));
        }

        if block.current_hash != block.compute_hash()? {
            return Err(LedgerError::InvalidBlock("hash does not match contents".to_string()));
        }

        if !self.pow.valid_proof(&block.previous_hash, block.proof) {
            return Err(LedgerError::InvalidBlock(format!("invalid proof {}", block.proof)));
        }

        if block.transactions.is_empty() && !self.allow_empty_blocks {
            return Err(LedgerError::NoPendingTransactions);
        }

        let mut ids = HashSet::new();
        for transaction in &block.transactions {
            check_transaction(transaction)?;

            let id = transaction.id()?;
            if state.confirmed.contains(&id) || ids.contains(&id) {
                return Err(LedgerError::DuplicateTransaction(id));
            }
            ids.insert(id);
        }

        state.commit(block, ids);
        Ok(())
    }

    /// Walks the chain from genesis forward checking links, proofs, hashes
    /// and signatures. Read-only; never fails, only reports.
    pub fn validate_chain(&self) -> bool {
        let state = self.read_state();

        match check_chain(&state.chain, &self.pow) {
            Ok(()) => true,
            Err(reason) => {
                warn!("Invalid chain: {}", reason);
                false
            }
        }
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Result<Block, LedgerError> {
        self.read_state().last_block().cloned()
    }

    /// Gets a snapshot of the entire chain
    pub fn dump_chain(&self) -> Vec<Block> {
        self.read_state().chain.clone()
    }

    /// Gets the pending transactions in arrival order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.read_state()
            .pending
            .iter()
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    pub fn proof_of_work(&self, reference_hash: &str) -> Result<u64, LedgerError> {
        Ok(self.pow.proof_of_work(reference_hash)?)
    }

    pub fn valid_proof(&self, reference_hash: &str, proof: u64) -> bool {
        self.pow.valid_proof(reference_hash, proof)
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Direct access for tests that play the attacker
    #[cfg(test)]
    pub(crate) fn tamper_chain<F: FnOnce(&mut Vec<Block>)>(&self, f: F) {
        f(&mut self.write_state().chain);
    }
}

/// Amount and signature checks shared by submission and block appends.
/// Signature bytes that do not decode count as a bad signature; a sender
/// address that does not decode stays a crypto error.
fn check_transaction(transaction: &Transaction) -> Result<(), LedgerError> {
    transaction.check_amount()?;

    match transaction.is_valid(&transaction.sender) {
        Ok(true) => Ok(()),
        Ok(false) | Err(TransactionError::CryptoError(CryptoError::InvalidSignature(_))) => {
            Err(LedgerError::InvalidSignature)
        }
        Err(e) => Err(e.into()),
    }
}

fn check_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), String> {
    let genesis = chain.first().ok_or_else(|| "chain is empty".to_string())?;

    if !genesis.is_genesis() {
        return Err("first block is not a genesis block".to_string());
    }
    if !pow.valid_proof(GENESIS_PREVIOUS_HASH, genesis.proof) {
        return Err("invalid proof of work at genesis".to_string());
    }

    let mut seen = HashSet::new();
    check_block(genesis, &mut seen)?;

    for pair in chain.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);

        if block.index != previous.index + 1 {
            return Err(format!("block {} follows block {}", block.index, previous.index));
        }
        if block.previous_hash != previous.current_hash {
            return Err(format!("previous hash does not match at block {}", block.index));
        }
        if !pow.valid_proof(&previous.current_hash, block.proof) {
            return Err(format!("invalid proof of work at block {}", block.index));
        }

        check_block(block, &mut seen)?;
    }

    Ok(())
}

/// Checks a block's own hash and the transactions inside it
fn check_block(block: &Block, seen: &mut HashSet<String>) -> Result<(), String> {
    match block.compute_hash() {
        Ok(hash) if hash == block.current_hash => {}
        _ => return Err(format!("hash does not match contents at block {}", block.index)),
    }

    for transaction in &block.transactions {
        if transaction.check_amount().is_err() {
            return Err(format!("invalid amount {} at block {}", transaction.amount, block.index));
        }
        if !matches!(transaction.is_valid(&transaction.sender), Ok(true)) {
            return Err(format!("bad transaction signature at block {}", block.index));
        }

        let id = transaction.id().map_err(|e| e.to_string())?;
        if !seen.insert(id) {
            return Err(format!("transaction confirmed twice, again at block {}", block.index));
        }
    }

    Ok(())
}
