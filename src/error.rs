// Error types for the ledger engine

use crate::consensus::ValidationError;
use crate::core::Hash256;
use sled::transaction::TransactionError;
use thiserror::Error;

/// Ledger errors.
///
/// Storage, serialization and broken-contract variants abort the current
/// operation. `TransactionNotFound`, `InsufficientFunds`, `InvalidAmount`
/// and `InvalidAddress` are ordinary outcomes the caller is expected to
/// handle.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] sled::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] secp256k1::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No existing blockchain found, create one first")]
    NoLedger,

    #[error("Blockchain already exists")]
    LedgerExists,

    #[error("Block not found in store: {0}")]
    MissingBlock(Hash256),

    #[error("Previous transaction is not correct: {0}")]
    MissingPrevTransaction(Hash256),

    #[error("Output index {index} out of range for transaction {txid}")]
    InvalidOutputIndex { txid: Hash256, index: i64 },

    #[error("Input index {index} out of range for transaction {txid}")]
    InvalidInputIndex { txid: Hash256, index: usize },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(Hash256),

    #[error("Invalid block: {0}")]
    InvalidBlock(ValidationError),

    #[error("Cannot mine a block without transactions")]
    EmptyBlock,

    #[error("Target bits must be between 1 and 255, got {0}")]
    InvalidTargetBits(u32),

    #[error("Nonce space exhausted without finding a valid hash")]
    NonceExhausted,

    #[error("Mining cancelled")]
    MiningCancelled,

    #[error("Transaction is not found: {0}")]
    TransactionNotFound(Hash256),

    #[error("Not enough funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::NoTransactions => LedgerError::EmptyBlock,
            ValidationError::EmptyTransaction(txid)
            | ValidationError::IdentityMismatch(txid)
            | ValidationError::DuplicateId(txid)
            | ValidationError::DuplicateSpend { txid, .. } => LedgerError::InvalidTransaction(txid),
            ValidationError::InvalidProofOfWork(_) | ValidationError::BrokenLink(_) => {
                LedgerError::InvalidBlock(err)
            }
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
