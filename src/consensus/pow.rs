// Proof of Work implementation

use crate::core::{Block, Hash256, int_to_be_bytes, sha256};
use crate::error::{LedgerError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default difficulty: leading zero bits required of a block digest
pub const TARGET_BITS: u32 = 24;

/// Largest nonce tried before giving up
pub const MAX_NONCE: u64 = i64::MAX as u64;

const PROGRESS_INTERVAL: u64 = 100_000;

/// Proof-of-work engine with a fixed target of `2^(256 - target_bits)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    target_bits: u32,
    /// Target as a big-endian 256-bit integer
    target: Hash256,
}

impl ProofOfWork {
    pub fn new(target_bits: u32) -> Result<Self> {
        if !(1..=255).contains(&target_bits) {
            return Err(LedgerError::InvalidTargetBits(target_bits));
        }

        Ok(Self {
            target_bits,
            target: target_for(target_bits),
        })
    }

    pub fn target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn target(&self) -> Hash256 {
        self.target
    }

    /// Digest input: prev || merkle_root || timestamp || target_bits || nonce,
    /// integers as 8 big-endian bytes. Genesis contributes no prev bytes.
    pub fn prepare_data(
        &self,
        prev_block_hash: Option<&Hash256>,
        merkle_root: &Hash256,
        timestamp: i64,
        nonce: u64,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 * 3);
        if let Some(prev) = prev_block_hash {
            data.extend_from_slice(prev.as_bytes());
        }
        data.extend_from_slice(merkle_root.as_bytes());
        data.extend_from_slice(&int_to_be_bytes(timestamp));
        data.extend_from_slice(&int_to_be_bytes(i64::from(self.target_bits)));
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Check if a hash meets this target (hash < target, big-endian)
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        *hash < self.target
    }

    /// Search nonces from 0 upward until the digest falls below the target
    pub fn mine(
        &self,
        prev_block_hash: Option<&Hash256>,
        merkle_root: &Hash256,
        timestamp: i64,
    ) -> Result<MiningResult> {
        self.mine_with_cancel(prev_block_hash, merkle_root, timestamp, &AtomicBool::new(false))
    }

    /// Like `mine`, but gives up with `MiningCancelled` once `cancel` is set.
    /// The flag is polled between nonce attempts.
    pub fn mine_with_cancel(
        &self,
        prev_block_hash: Option<&Hash256>,
        merkle_root: &Hash256,
        timestamp: i64,
        cancel: &AtomicBool,
    ) -> Result<MiningResult> {
        let start_time = Instant::now();

        for nonce in 0..=MAX_NONCE {
            if cancel.load(Ordering::Relaxed) {
                log::info!("Mining cancelled after {} attempts", nonce);
                return Err(LedgerError::MiningCancelled);
            }

            let data = self.prepare_data(prev_block_hash, merkle_root, timestamp, nonce);
            let hash = sha256(&data);

            if self.meets_target(&hash) {
                let result = MiningResult {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                    duration: start_time.elapsed(),
                };
                log::info!(
                    "Mined block {} (nonce {}, {} attempts in {:?})",
                    hash,
                    nonce,
                    result.attempts,
                    result.duration
                );
                return Ok(result);
            }

            if nonce > 0 && nonce % PROGRESS_INTERVAL == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    nonce,
                    nonce as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        Err(LedgerError::NonceExhausted)
    }

    /// Recompute a block's digest from its stored nonce and check it
    /// against both the stored digest and the target
    pub fn validate(&self, block: &Block) -> bool {
        let data = self.prepare_data(
            block.prev_block_hash.as_ref(),
            &block.merkle_root(),
            block.timestamp,
            block.nonce,
        );
        let hash = sha256(&data);

        hash == block.hash && self.meets_target(&hash)
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self {
            target_bits: TARGET_BITS,
            target: target_for(TARGET_BITS),
        }
    }
}

/// 1 << (256 - bits) as 32 big-endian bytes; `bits` must be in 1..=255
fn target_for(bits: u32) -> Hash256 {
    let shift = (256 - bits) as usize;
    let mut target = [0u8; 32];
    target[31 - shift / 8] = 1 << (shift % 8);
    Hash256::new(target)
}

/// Mining result
#[derive(Debug, Clone)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Hashes per second
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_has_24_leading_zero_bits() {
        let pow = ProofOfWork::default();
        assert_eq!(pow, ProofOfWork::new(TARGET_BITS).unwrap());

        let mut expected = [0u8; 32];
        expected[2] = 0x01;
        assert_eq!(pow.target(), Hash256::new(expected));
    }

    #[test]
    fn test_target_bounds() {
        assert!(ProofOfWork::new(0).is_err());
        assert!(ProofOfWork::new(256).is_err());
        assert_eq!(ProofOfWork::new(1).unwrap().target().0[0], 0x80);
        assert_eq!(ProofOfWork::new(255).unwrap().target().0[31], 0x02);
    }

    #[test]
    fn test_meets_target() {
        let pow = ProofOfWork::new(8).unwrap();

        assert!(pow.meets_target(&Hash256::zero()));
        assert!(!pow.meets_target(&Hash256::new([0xff; 32])));

        // Exactly the target is not below it
        assert!(!pow.meets_target(&pow.target()));

        let mut just_below = [0xff; 32];
        just_below[0] = 0x00;
        assert!(pow.meets_target(&Hash256::new(just_below)));
    }

    #[test]
    fn test_prepare_data_layout() {
        let pow = ProofOfWork::new(24).unwrap();
        let root = Hash256::new([3; 32]);

        let genesis = pow.prepare_data(None, &root, 5, 7);
        assert_eq!(genesis.len(), 32 + 24);
        assert_eq!(&genesis[32..40], &5i64.to_be_bytes());
        assert_eq!(&genesis[40..48], &24i64.to_be_bytes());
        assert_eq!(&genesis[48..56], &7u64.to_be_bytes());

        let prev = Hash256::new([1; 32]);
        let linked = pow.prepare_data(Some(&prev), &root, 5, 7);
        assert_eq!(linked.len(), 64 + 24);
        assert_eq!(&linked[..32], prev.as_bytes());
    }

    #[test]
    fn test_mine_easy_target() {
        let pow = ProofOfWork::new(8).unwrap();
        let root = Hash256::new([4; 32]);

        let result = pow.mine(None, &root, 1_700_000_000).unwrap();
        assert!(pow.meets_target(&result.hash));
        assert_eq!(result.hash.0[0], 0);
        assert_eq!(result.attempts, result.nonce + 1);

        let data = pow.prepare_data(None, &root, 1_700_000_000, result.nonce);
        assert_eq!(sha256(&data), result.hash);
    }

    #[test]
    fn test_mine_cancelled() {
        let pow = ProofOfWork::new(TARGET_BITS).unwrap();
        let cancel = AtomicBool::new(true);

        let result = pow.mine_with_cancel(None, &Hash256::zero(), 0, &cancel);
        assert!(matches!(result, Err(LedgerError::MiningCancelled)));
    }
}
