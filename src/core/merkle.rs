// Merkle commitment over a block's transactions

use crate::core::{Hash256, Serializable, Transaction, sha256};

/// Root of the binary hash tree whose leaves are SHA256 of each
/// serialized transaction. An odd node at any level is paired with itself.
pub fn merkle_root(transactions: &[Transaction]) -> Hash256 {
    if transactions.is_empty() {
        return Hash256::zero();
    }

    let mut level: Vec<Hash256> = transactions
        .iter()
        .map(|tx| sha256(&tx.serialize()))
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(left.as_bytes());
                combined[32..].copy_from_slice(right.as_bytes());
                sha256(&combined)
            })
            .collect();
    }

    level[0]
}
