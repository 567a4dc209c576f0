// Persistent, append-only block chain backed by sled

use crate::config::ChainConfig;
use crate::consensus::{BlockValidator, ProofOfWork};
use crate::core::{Block, Hash256, OutPoint, SUBSIDY, Serializable, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::utxo_set::{self, TxOutputs, UnspentOutput};
use crate::wallet::Address;
use secp256k1::SecretKey;
use sled::transaction::ConflictableTransactionResult;
use sled::{Db, Transactional, Tree};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;

/// Tree holding serialized blocks keyed by digest
pub const BLOCKS_TREE: &str = "blocks";
/// Tree holding the UTXO index keyed by transaction id
pub const UTXO_TREE: &str = "chainstate";

/// Reserved key in the blocks tree pointing at the tip digest
const TIP_KEY: &[u8] = b"l";
/// Reserved key in the blocks tree holding the target bits
const BITS_KEY: &[u8] = b"bits";

/// Note carried by the genesis coinbase
pub const GENESIS_COINBASE_DATA: &str = "The ledger opens with a single coinbase";

/// Handle on an open ledger. Dropping it closes the database.
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    chainstate: Tree,
    tip: Hash256,
    pow: ProofOfWork,
}

impl Blockchain {
    /// Create a new ledger whose genesis coinbase pays `address`.
    /// Fails with `LedgerExists` if one is already stored at the location.
    pub fn create(config: &ChainConfig, address: &Address) -> Result<Self> {
        let pow = ProofOfWork::new(config.target_bits)?;
        let db = config.open_db()?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if blocks.contains_key(TIP_KEY)? {
            return Err(LedgerError::LedgerExists);
        }
        let chainstate = db.open_tree(UTXO_TREE)?;

        let coinbase = Transaction::coinbase(address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::genesis(coinbase, &pow)?;
        let encoded = genesis.serialize();
        let bits = pow.target_bits().to_be_bytes();

        (&blocks, &chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<(), LedgerError> {
                blocks.insert(genesis.hash.as_bytes().as_slice(), encoded.as_slice())?;
                blocks.insert(TIP_KEY, genesis.hash.as_bytes().as_slice())?;
                blocks.insert(BITS_KEY, bits.as_slice())?;
                utxo_set::apply_block(chainstate, &genesis)
            },
        )?;
        db.flush()?;

        log::info!("Created blockchain with genesis block {}", genesis.hash);

        Ok(Self {
            db,
            blocks,
            chainstate,
            tip: genesis.hash,
            pow,
        })
    }

    /// Open an existing ledger. Fails with `NoLedger` if none is stored.
    pub fn open(config: &ChainConfig) -> Result<Self> {
        if config.path.is_some() && !config.exists() {
            return Err(LedgerError::NoLedger);
        }

        let db = config.open_db()?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let tip = match blocks.get(TIP_KEY)? {
            Some(bytes) => Hash256::from_slice(&bytes).map_err(LedgerError::Serialization)?,
            None => return Err(LedgerError::NoLedger),
        };

        let target_bits = match blocks.get(BITS_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    LedgerError::Serialization(format!("Invalid target bits length: {}", bytes.len()))
                })?;
                u32::from_be_bytes(bytes)
            }
            None => config.target_bits,
        };
        let pow = ProofOfWork::new(target_bits)?;
        let chainstate = db.open_tree(UTXO_TREE)?;

        log::debug!("Opened blockchain at tip {}", tip);

        Ok(Self {
            db,
            blocks,
            chainstate,
            tip,
            pow,
        })
    }

    /// Digest of the most recently mined block
    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub(crate) fn chainstate(&self) -> &Tree {
        &self.chainstate
    }

    /// Verify `transactions`, mine them into a block on the tip and persist it
    pub fn mine_block(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        self.mine_block_with_cancel(transactions, &AtomicBool::new(false))
    }

    /// `mine_block` with a cancellation flag polled between nonce attempts.
    ///
    /// Any invalid transaction aborts the whole block. The block body, the
    /// tip pointer and the UTXO index update are committed in one storage
    /// transaction.
    pub fn mine_block_with_cancel(
        &mut self,
        transactions: Vec<Transaction>,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        BlockValidator::new(self.pow).validate_candidate(&transactions)?;

        for tx in &transactions {
            if self.contains_transaction(&tx.id)? {
                log::warn!("Rejecting block: transaction id {} already in the ledger", tx.id);
                return Err(LedgerError::InvalidTransaction(tx.id));
            }
            if !self.verify_transaction(tx)? {
                log::warn!("Rejecting block: transaction {} failed verification", tx.id);
                return Err(LedgerError::InvalidTransaction(tx.id));
            }
        }

        let block = Block::mine(transactions, Some(self.tip), &self.pow, cancel)?;
        self.append(&block)?;
        Ok(block)
    }

    fn append(&mut self, block: &Block) -> Result<()> {
        let encoded = block.serialize();

        (&self.blocks, &self.chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<(), LedgerError> {
                blocks.insert(block.hash.as_bytes().as_slice(), encoded.as_slice())?;
                blocks.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
                utxo_set::apply_block(chainstate, block)
            },
        )?;
        self.db.flush()?;

        self.tip = block.hash;
        log::info!(
            "Appended block {} with {} transactions",
            block.hash,
            block.transactions.len()
        );
        Ok(())
    }

    /// Get a block by digest
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.blocks.get(hash.as_bytes())? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Walk the chain from the tip back to genesis
    pub fn iter(&self) -> BlockchainIterator<'_> {
        BlockchainIterator {
            current: Some(self.tip),
            blocks: &self.blocks,
        }
    }

    /// Number of blocks in the chain
    pub fn height(&self) -> Result<usize> {
        let mut count = 0;
        for block in self.iter() {
            block?;
            count += 1;
        }
        Ok(count)
    }

    /// Find a transaction by id, scanning backward from the tip
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::TransactionNotFound(*id))
    }

    fn contains_transaction(&self, id: &Hash256) -> Result<bool> {
        match self.find_transaction(id) {
            Ok(_) => Ok(true),
            Err(LedgerError::TransactionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Resolve every transaction referenced by `tx`'s inputs
    fn prev_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for txid in tx.inputs.iter().filter_map(|input| input.prev_tx_hash) {
            if prev_txs.contains_key(&txid) {
                continue;
            }
            let prev = self.find_transaction(&txid).map_err(|e| match e {
                LedgerError::TransactionNotFound(id) => LedgerError::MissingPrevTransaction(id),
                other => other,
            })?;
            prev_txs.insert(txid, prev);
        }
        Ok(prev_txs)
    }

    /// Sign `tx` against the outputs it spends
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.prev_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    /// Check signatures, that the spent outputs cover the new ones and that
    /// no referenced output is already spent. A coinbase may pay out at most
    /// `SUBSIDY`.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        let Some(output_value) = tx.checked_output_value() else {
            return Ok(false);
        };
        if tx.is_coinbase() {
            return Ok(output_value <= SUBSIDY);
        }

        let prev_txs = self.prev_transactions(tx)?;
        if !tx.verify(&prev_txs)? {
            return Ok(false);
        }
        match tx.checked_input_value(&prev_txs)? {
            Some(input_value) if input_value >= output_value => {}
            _ => {
                log::debug!("Transaction {} spends more than its inputs hold", tx.id);
                return Ok(false);
            }
        }

        let mut outpoints = HashSet::new();
        for outpoint in tx.inputs.iter().filter_map(|input| input.outpoint()) {
            if !outpoints.insert(outpoint) {
                return Ok(false);
            }
        }

        Ok(!self.any_spent(&outpoints)?)
    }

    /// Whether any of `outpoints` is referenced by an input already in the chain
    fn any_spent(&self, outpoints: &HashSet<OutPoint>) -> Result<bool> {
        for block in self.iter() {
            for tx in block?.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                let spent = tx
                    .inputs
                    .iter()
                    .filter_map(|input| input.outpoint())
                    .any(|op| outpoints.contains(&op));
                if spent {
                    log::debug!("Transaction {} already spends a requested output", tx.id);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Every unspent output in the chain, grouped by transaction id.
    /// Full scan; the UTXO index must always match this.
    pub fn find_utxo(&self) -> Result<HashMap<Hash256, TxOutputs>> {
        let mut utxo: HashMap<Hash256, TxOutputs> = HashMap::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();

        for block in self.iter() {
            let block = block?;
            // Newest first, so spends are seen before the outputs they consume
            for tx in block.transactions.iter().rev() {
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent.contains(&OutPoint::new(tx.id, index)) {
                        continue;
                    }
                    utxo.entry(tx.id).or_default().outputs.push(UnspentOutput {
                        index,
                        output: output.clone(),
                    });
                }

                if !tx.is_coinbase() {
                    spent.extend(tx.inputs.iter().filter_map(|input| input.outpoint()));
                }
            }
        }

        Ok(utxo)
    }

    /// Audit every stored block for proof of work and hash links.
    /// Returns `false` at the first bad block.
    pub fn validate_chain(&self) -> Result<bool> {
        let validator = BlockValidator::new(self.pow);
        let mut child: Option<Block> = None;

        for block in self.iter() {
            let block = block?;
            let checked = validator
                .validate_block(&block)
                .and_then(|_| validator.validate_link(&block, child.as_ref()));
            if let Err(e) = checked {
                log::warn!("Chain audit failed: {}", e);
                return Ok(false);
            }
            child = Some(block);
        }

        Ok(child.is_some_and(|genesis| genesis.is_genesis()))
    }
}

/// Backward cursor over the chain. Yields the tip first and stops after
/// genesis; build a new one to walk again.
pub struct BlockchainIterator<'a> {
    current: Option<Hash256>,
    blocks: &'a Tree,
}

impl BlockchainIterator<'_> {
    /// Fetch the block under the cursor and step to its predecessor
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let Some(hash) = self.current.take() else {
            return Ok(None);
        };

        let data = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or(LedgerError::MissingBlock(hash))?;
        let block = Block::deserialize(&data)?;
        self.current = block.prev_block_hash;
        Ok(Some(block))
    }
}

impl Iterator for BlockchainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}
