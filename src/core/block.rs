// Block data structure

use crate::consensus::ProofOfWork;
use crate::core::serialize::{Serializable, read_array, read_var_bytes, read_vec, write_var_bytes, write_vec};
use crate::core::{Hash256, Transaction, merkle_root};
use crate::error::{LedgerError, Result};
use std::io::{self, Read, Write};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block - header fields, transactions and the proof-of-work result.
/// Only produced by mining; never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    /// Digest of the previous block; `None` only for genesis
    pub prev_block_hash: Option<Hash256>,
    /// This block's digest, found by mining
    pub hash: Hash256,
    pub nonce: u64,
}

impl Block {
    /// Mine a block over `transactions` linked to `prev_block_hash`
    pub fn mine(
        transactions: Vec<Transaction>,
        prev_block_hash: Option<Hash256>,
        pow: &ProofOfWork,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        let timestamp = now();
        let root = merkle_root(&transactions);
        let result = pow.mine_with_cancel(prev_block_hash.as_ref(), &root, timestamp, cancel)?;

        Ok(Self {
            timestamp,
            transactions,
            prev_block_hash,
            hash: result.hash,
            nonce: result.nonce,
        })
    }

    /// Mine the first block of a chain around its coinbase transaction
    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork) -> Result<Self> {
        Self::mine(vec![coinbase], None, pow, &AtomicBool::new(false))
    }

    /// Merkle root committed by this block's digest
    pub fn merkle_root(&self) -> Hash256 {
        merkle_root(&self.transactions)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_none()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl Serializable for Block {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.timestamp.to_le_bytes())?;
        write_vec(writer, &self.transactions)?;
        let prev = self.prev_block_hash.as_ref().map(|h| &h.0[..]).unwrap_or(&[]);
        write_var_bytes(writer, prev)?;
        writer.write_all(self.hash.as_bytes())?;
        writer.write_all(&self.nonce.to_le_bytes())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let timestamp = i64::from_le_bytes(read_array(reader)?);
        let transactions = read_vec(reader)?;
        let prev = read_var_bytes(reader)?;
        let prev_block_hash = if prev.is_empty() {
            None
        } else {
            Some(Hash256::from_slice(&prev).map_err(LedgerError::Serialization)?)
        };
        let hash = Hash256::new(read_array(reader)?);
        let nonce = u64::from_le_bytes(read_array(reader)?);

        Ok(Self {
            timestamp,
            transactions,
            prev_block_hash,
            hash,
            nonce,
        })
    }
}
