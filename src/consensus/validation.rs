// Block admission and audit rules

use crate::consensus::ProofOfWork;
use crate::core::{Block, Hash256, Transaction};
use std::collections::HashSet;
use thiserror::Error;

/// Reasons a candidate transaction set or a stored block is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Block has no transactions")]
    NoTransactions,

    #[error("Transaction {0} has no outputs")]
    EmptyTransaction(Hash256),

    #[error("Transaction {0} does not match its id")]
    IdentityMismatch(Hash256),

    #[error("Transaction id {0} appears twice")]
    DuplicateId(Hash256),

    #[error("Output {txid}:{vout} spent twice in one block")]
    DuplicateSpend { txid: Hash256, vout: u32 },

    #[error("Invalid proof of work for block {0}")]
    InvalidProofOfWork(Hash256),

    #[error("Block {0} does not link to its predecessor")]
    BrokenLink(Hash256),
}

impl ValidationError {
    /// Transaction the error is about, if any
    pub fn txid(&self) -> Option<Hash256> {
        match self {
            ValidationError::EmptyTransaction(id)
            | ValidationError::IdentityMismatch(id)
            | ValidationError::DuplicateId(id) => Some(*id),
            ValidationError::DuplicateSpend { txid, .. } => Some(*txid),
            _ => None,
        }
    }
}

/// Structural checks for blocks, independent of signatures
pub struct BlockValidator {
    pow: ProofOfWork,
}

impl BlockValidator {
    pub fn new(pow: ProofOfWork) -> Self {
        Self { pow }
    }

    /// Checks a transaction set before mining: non-empty, every transaction
    /// has outputs and an id matching its content, no id repeated, no output
    /// referenced by two inputs
    pub fn validate_candidate(&self, transactions: &[Transaction]) -> Result<(), ValidationError> {
        if transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        let mut ids = HashSet::new();
        let mut claimed = HashSet::new();
        for tx in transactions {
            if tx.outputs.is_empty() {
                return Err(ValidationError::EmptyTransaction(tx.id));
            }
            if !tx.has_valid_id() {
                return Err(ValidationError::IdentityMismatch(tx.id));
            }
            if !ids.insert(tx.id) {
                return Err(ValidationError::DuplicateId(tx.id));
            }
            for outpoint in tx.inputs.iter().filter_map(|input| input.outpoint()) {
                if !claimed.insert(outpoint) {
                    return Err(ValidationError::DuplicateSpend {
                        txid: outpoint.txid,
                        vout: outpoint.vout,
                    });
                }
            }
        }

        Ok(())
    }

    /// Audit a stored block: proof of work (which also commits the merkle
    /// root) plus the candidate rules
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        if !self.pow.validate(block) {
            return Err(ValidationError::InvalidProofOfWork(block.hash));
        }
        self.validate_candidate(&block.transactions)
    }

    /// Check that `block` is the parent recorded by `child`
    pub fn validate_link(&self, block: &Block, child: Option<&Block>) -> Result<(), ValidationError> {
        match child {
            Some(child) if child.prev_block_hash != Some(block.hash) => {
                Err(ValidationError::BrokenLink(child.hash))
            }
            _ => Ok(()),
        }
    }
}
