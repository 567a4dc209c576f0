// Single-node proof-of-work UTXO ledger

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler};
pub use crate::config::ChainConfig;
pub use crate::consensus::{BlockValidator, ProofOfWork, ValidationError};
pub use crate::core::{Block, Hash256, OutPoint, Transaction, TxInput, TxOutput};
pub use crate::error::{LedgerError, Result};
pub use crate::storage::{Blockchain, BlockchainIterator, TxOutputs, UnspentOutput, UtxoSet};
pub use crate::wallet::{Address, KeyPair, TransactionBuilder, Wallets};
