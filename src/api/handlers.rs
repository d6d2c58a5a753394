use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::pow::PowError;
use crate::blockchain::{Address, Block, KeyPair, Ledger, LedgerError, Miner, Transaction};

/// Data structure for the ledger state
pub type LedgerData = web::Data<Ledger>;

/// The process-wide miner driving proof searches for the ledger
pub type MinerData = web::Data<Miner>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transfer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key (hex encoded, used for signing only)
    pub private_key: String,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn ledger_error_response(err: LedgerError) -> HttpResponse {
    match err {
        LedgerError::PowError(PowError::Cancelled { .. }) => {
            HttpResponse::Conflict().json(error_body(err.to_string()))
        }
        LedgerError::InvalidSignature
        | LedgerError::TransactionError(_)
        | LedgerError::NoPendingTransactions
        | LedgerError::InvalidBlock(_) => HttpResponse::BadRequest().json(error_body(err.to_string())),
        LedgerError::DuplicateTransaction(_) | LedgerError::StaleBlock(_) => {
            HttpResponse::Conflict().json(error_body(err.to_string()))
        }
        LedgerError::PowError(_) | LedgerError::EncodingError(_) | LedgerError::EmptyChain => {
            error!("Ledger failure: {}", err);
            HttpResponse::InternalServerError().json(error_body(err.to_string()))
        }
    }
}

fn submitted(block_index: u64) -> HttpResponse {
    HttpResponse::Created().json(TransactionResponse {
        message: format!("Transaction will be added to Block {}", block_index),
        block_index,
    })
}

/// Get the full chain
///
/// Returns the entire chain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let chain = ledger.dump_chain();
    let is_valid = ledger.validate_chain();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get the latest block
#[utoipa::path(
    get,
    path = "/api/v1/chain/last",
    responses(
        (status = 200, description = "Latest block", body = Block),
        (status = 500, description = "Chain has no blocks")
    )
)]
pub async fn get_last_block(ledger: LedgerData) -> impl Responder {
    match ledger.last_block() {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => ledger_error_response(err),
    }
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.pending_transactions())
}

/// Create a new transfer
///
/// Signs a transfer with the caller's private key and adds it to the
/// pending transactions. The key is not kept.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data"),
        (status = 409, description = "Transaction already known")
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let private_key_bytes = match hex::decode(&transaction_req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => {
            return HttpResponse::BadRequest().json(error_body(
                "Invalid private key format. Must be a hex string.".to_string(),
            ));
        }
    };

    let keypair = match KeyPair::from_secret_key(&private_key_bytes) {
        Ok(keypair) => keypair,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid private key: {}", err)));
        }
    };

    let recipient: Address = match transaction_req.recipient.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid recipient: {}", err)));
        }
    };

    let mut transaction =
        match Transaction::new(keypair.address().clone(), recipient, transaction_req.amount) {
            Ok(transaction) => transaction,
            Err(err) => return HttpResponse::BadRequest().json(error_body(err.to_string())),
        };

    if let Err(err) = transaction.sign(&keypair) {
        return HttpResponse::BadRequest().json(error_body(format!("Failed to sign transaction: {}", err)));
    }

    match ledger.submit_transaction(transaction) {
        Ok(block_index) => submitted(block_index),
        Err(err) => ledger_error_response(err),
    }
}

/// Submit a transaction that the sender already signed
#[utoipa::path(
    post,
    path = "/api/v1/transactions/signed",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Unsigned or badly signed transaction, or invalid amount"),
        (status = 409, description = "Transaction already known")
    )
)]
pub async fn submit_signed_transaction(
    ledger: LedgerData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    match ledger.submit_transaction(transaction.into_inner()) {
        Ok(block_index) => submitted(block_index),
        Err(err) => ledger_error_response(err),
    }
}

/// Mine a new block
///
/// Seals all pending transactions into a new block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Nothing to mine"),
        (status = 409, description = "Superseded by a newer mining request or cancelled"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(miner: MinerData) -> impl Responder {
    let miner = miner.into_inner();

    // Proof search is CPU bound; keep it off the async workers
    match web::block(move || miner.mine()).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(err)) => ledger_error_response(err),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(error_body(format!("Failed to mine block: {}", err)))
        }
    }
}

/// Cancel the mining attempt in flight
#[utoipa::path(
    post,
    path = "/api/v1/mine/cancel",
    responses(
        (status = 200, description = "Whether an attempt was running", body = bool)
    )
)]
pub async fn cancel_mining(miner: MinerData) -> impl Responder {
    HttpResponse::Ok().json(miner.cancel())
}

/// Check if the chain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.validate_chain())
}

/// Create a new wallet
///
/// Creates a new random keypair. The private key must be stored by the
/// caller; the node keeps no copy.
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet() -> impl Responder {
    match KeyPair::generate() {
        Ok(keypair) => HttpResponse::Created().json(WalletResponse {
            address: keypair.address().0.clone(),
            private_key: hex::encode(keypair.export_secret_key()),
        }),
        Err(err) => {
            error!("Key generation failed: {}", err);
            HttpResponse::InternalServerError().json(error_body(format!("Failed to create wallet: {}", err)))
        }
    }
}
