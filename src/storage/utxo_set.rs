// UTXO (Unspent Transaction Output) index over the chainstate tree

use crate::core::serialize::{Serializable, read_array, read_vec, write_vec};
use crate::core::{Block, Hash256, OutPoint, Transaction, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::Blockchain;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// An output that is still unspent, with its position in the creating
/// transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

impl Serializable for UnspentOutput {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.index.to_le_bytes())?;
        self.output.write_to(writer)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let index = u32::from_le_bytes(read_array(reader)?);
        let output = TxOutput::read_from(reader)?;
        Ok(Self { index, output })
    }
}

/// Index entry: the outputs of one transaction that remain unspent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutputs {
    pub outputs: Vec<UnspentOutput>,
}

impl TxOutputs {
    /// Every output of `tx`, all unspent
    pub fn from_transaction(tx: &Transaction) -> Self {
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| UnspentOutput {
                index: index as u32,
                output: output.clone(),
            })
            .collect();
        Self { outputs }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Drop the output at `index`; returns whether it was present
    pub fn remove(&mut self, index: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|out| out.index != index);
        self.outputs.len() != before
    }
}

impl Serializable for TxOutputs {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_vec(writer, &self.outputs)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            outputs: read_vec(reader)?,
        })
    }
}

/// Cached view of the unspent outputs of a ledger.
///
/// The ledger is authoritative: the index can always be rebuilt from it
/// with `reindex`.
pub struct UtxoSet<'a> {
    blockchain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    pub fn new(blockchain: &'a Blockchain) -> Self {
        Self { blockchain }
    }

    pub fn blockchain(&self) -> &'a Blockchain {
        self.blockchain
    }

    /// Rebuild the index from a full chain scan. Returns the number of
    /// transactions indexed.
    pub fn reindex(&self) -> Result<usize> {
        let tree = self.blockchain.chainstate();
        let utxo = self.blockchain.find_utxo()?;

        // Stale entries are dropped in the same batch that writes the new ones
        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outs) in &utxo {
            batch.insert(txid.as_bytes().as_slice(), outs.serialize());
        }
        tree.apply_batch(batch)?;
        tree.flush()?;

        log::info!("Reindexed UTXO set: {} transactions", utxo.len());
        Ok(utxo.len())
    }

    /// Apply a block to the index: remove the outputs its inputs spend and
    /// add its transactions' outputs.
    ///
    /// `Blockchain::mine_block` already does this as part of its commit;
    /// call it only for blocks that reached the ledger some other way.
    pub fn update(&self, block: &Block) -> Result<()> {
        self.blockchain
            .chainstate()
            .transaction(|tree| apply_block(tree, block))?;
        Ok(())
    }

    /// Collect outputs locked to `pubkey_hash` until their sum reaches
    /// `amount`. Returns the accumulated value and the chosen outpoints;
    /// the value is below `amount` when funds are insufficient.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8; 20],
        amount: u64,
    ) -> Result<(u64, Vec<OutPoint>)> {
        let mut accumulated = 0u64;
        let mut chosen = Vec::new();

        'entries: for item in self.blockchain.chainstate().iter() {
            let (key, value) = item?;
            let txid = Hash256::from_slice(&key).map_err(LedgerError::Serialization)?;
            let outs = TxOutputs::deserialize(&value)?;

            for unspent in outs.outputs {
                if accumulated >= amount {
                    break 'entries;
                }
                if unspent.output.is_locked_with_key(pubkey_hash) {
                    accumulated = accumulated.saturating_add(unspent.output.value);
                    chosen.push(OutPoint::new(txid, unspent.index));
                }
            }
        }

        Ok((accumulated, chosen))
    }

    /// All unspent outputs locked to `pubkey_hash`
    pub fn find_utxo(&self, pubkey_hash: &[u8; 20]) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for item in self.blockchain.chainstate().iter() {
            let (_, value) = item?;
            let outs = TxOutputs::deserialize(&value)?;
            found.extend(
                outs.outputs
                    .into_iter()
                    .map(|unspent| unspent.output)
                    .filter(|out| out.is_locked_with_key(pubkey_hash)),
            );
        }
        Ok(found)
    }

    pub fn balance(&self, pubkey_hash: &[u8; 20]) -> Result<u64> {
        Ok(self
            .find_utxo(pubkey_hash)?
            .iter()
            .fold(0u64, |total, out| total.saturating_add(out.value)))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.blockchain.chainstate().len()
    }

    /// The whole index keyed by transaction id
    pub fn entries(&self) -> Result<HashMap<Hash256, TxOutputs>> {
        let mut entries = HashMap::new();
        for item in self.blockchain.chainstate().iter() {
            let (key, value) = item?;
            let txid = Hash256::from_slice(&key).map_err(LedgerError::Serialization)?;
            entries.insert(txid, TxOutputs::deserialize(&value)?);
        }
        Ok(entries)
    }
}

/// Apply `block` to the chainstate tree inside a sled transaction
pub(crate) fn apply_block(
    tree: &TransactionalTree,
    block: &Block,
) -> ConflictableTransactionResult<(), LedgerError> {
    for tx in &block.transactions {
        if !tx.is_coinbase() {
            for outpoint in tx.inputs.iter().filter_map(|input| input.outpoint()) {
                let key = outpoint.txid.as_bytes().as_slice();
                let Some(data) = tree.get(key)? else {
                    log::warn!("UTXO entry {} missing while applying block {}", outpoint.txid, block.hash);
                    continue;
                };

                let mut outs =
                    TxOutputs::deserialize(&data).map_err(ConflictableTransactionError::Abort)?;
                if !outs.remove(outpoint.vout) {
                    log::warn!("Output {}:{} already absent from UTXO set", outpoint.txid, outpoint.vout);
                }

                if outs.is_empty() {
                    tree.remove(key)?;
                } else {
                    tree.insert(key, outs.serialize())?;
                }
            }
        }

        let outs = TxOutputs::from_transaction(tx);
        if !outs.is_empty() {
            tree.insert(tx.id.as_bytes().as_slice(), outs.serialize())?;
        }
    }

    log::debug!("Applied block {} to UTXO set", block.hash);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::wallet::{KeyPair, TransactionBuilder};

    fn new_chain(owner: &KeyPair) -> Blockchain {
        let config = ChainConfig::temporary().with_target_bits(8);
        Blockchain::create(&config, &owner.address()).unwrap()
    }

    #[test]
    fn test_tx_outputs_serialization() {
        let outs = TxOutputs {
            outputs: vec![
                UnspentOutput {
                    index: 1,
                    output: TxOutput::new(7, [3; 20]),
                },
                UnspentOutput {
                    index: 4,
                    output: TxOutput::new(2, [9; 20]),
                },
            ],
        };

        let bytes = outs.serialize();
        let decoded = TxOutputs::deserialize(&bytes).unwrap();
        assert_eq!(decoded, outs);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn test_remove_keeps_original_indexes() {
        let tx = Transaction::new(
            vec![crate::core::TxInput::coinbase(b"note")],
            vec![TxOutput::new(1, [1; 20]), TxOutput::new(2, [2; 20]), TxOutput::new(3, [3; 20])],
        );
        let mut outs = TxOutputs::from_transaction(&tx);

        assert!(outs.remove(0));
        assert!(!outs.remove(0));
        let indexes: Vec<u32> = outs.outputs.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn test_genesis_indexed_on_create() {
        let alice = KeyPair::generate();
        let chain = new_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);

        assert_eq!(utxo_set.count_transactions(), 1);
        assert_eq!(utxo_set.balance(&alice.pubkey_hash()).unwrap(), 10);
        assert_eq!(utxo_set.balance(&[0; 20]).unwrap(), 0);
    }

    #[test]
    fn test_find_spendable_outputs() {
        let alice = KeyPair::generate();
        let chain = new_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);
        let genesis_tx = chain.iter().next().unwrap().unwrap().transactions[0].id;

        let (value, outpoints) = utxo_set.find_spendable_outputs(&alice.pubkey_hash(), 4).unwrap();
        assert_eq!(value, 10);
        assert_eq!(outpoints, vec![OutPoint::new(genesis_tx, 0)]);

        let (value, outpoints) = utxo_set.find_spendable_outputs(&[7; 20], 4).unwrap();
        assert_eq!(value, 0);
        assert!(outpoints.is_empty());
    }

    #[test]
    fn test_index_tracks_mined_blocks() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut chain = new_chain(&alice);

        let tx = {
            let utxo_set = UtxoSet::new(&chain);
            TransactionBuilder::new(&utxo_set)
                .build(&alice, &bob.address(), 3)
                .unwrap()
        };
        chain.mine_block(vec![tx]).unwrap();

        let utxo_set = UtxoSet::new(&chain);
        assert_eq!(utxo_set.balance(&alice.pubkey_hash()).unwrap(), 7);
        assert_eq!(utxo_set.balance(&bob.pubkey_hash()).unwrap(), 3);
        assert_eq!(utxo_set.entries().unwrap(), chain.find_utxo().unwrap());
    }

    #[test]
    fn test_reindex_matches_full_scan() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut chain = new_chain(&alice);

        for amount in [2, 3] {
            let tx = {
                let utxo_set = UtxoSet::new(&chain);
                TransactionBuilder::new(&utxo_set)
                    .build(&alice, &bob.address(), amount)
                    .unwrap()
            };
            chain.mine_block(vec![tx]).unwrap();
        }

        let utxo_set = UtxoSet::new(&chain);
        chain.chainstate().clear().unwrap();
        assert_eq!(utxo_set.count_transactions(), 0);

        let indexed = utxo_set.reindex().unwrap();
        let truth = chain.find_utxo().unwrap();
        assert_eq!(indexed, truth.len());
        assert_eq!(utxo_set.entries().unwrap(), truth);
        assert_eq!(utxo_set.balance(&bob.pubkey_hash()).unwrap(), 5);
    }

    #[test]
    fn test_reindex_replaces_stale_entries() {
        let alice = KeyPair::generate();
        let chain = new_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);

        let stale = TxOutputs {
            outputs: vec![UnspentOutput {
                index: 0,
                output: TxOutput::new(5, alice.pubkey_hash()),
            }],
        };
        chain
            .chainstate()
            .insert(Hash256::new([0xcd; 32]).as_bytes(), stale.serialize())
            .unwrap();
        assert_eq!(utxo_set.count_transactions(), 2);

        assert_eq!(utxo_set.reindex().unwrap(), 1);
        assert_eq!(utxo_set.entries().unwrap(), chain.find_utxo().unwrap());
        assert_eq!(utxo_set.balance(&alice.pubkey_hash()).unwrap(), 10);
    }

    #[test]
    fn test_value_sums_saturate() {
        let alice = KeyPair::generate();
        let chain = new_chain(&alice);
        let utxo_set = UtxoSet::new(&chain);

        let huge = TxOutputs {
            outputs: vec![UnspentOutput {
                index: 0,
                output: TxOutput::new(u64::MAX, alice.pubkey_hash()),
            }],
        };
        chain
            .chainstate()
            .insert(Hash256::new([0xef; 32]).as_bytes(), huge.serialize())
            .unwrap();

        assert_eq!(utxo_set.balance(&alice.pubkey_hash()).unwrap(), u64::MAX);
        let (accumulated, outpoints) = utxo_set
            .find_spendable_outputs(&alice.pubkey_hash(), u64::MAX)
            .unwrap();
        assert_eq!(accumulated, u64::MAX);
        assert!(!outpoints.is_empty());
    }

    #[test]
    fn test_update_replays_block_on_rebuilt_index() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut chain = new_chain(&alice);
        let genesis = chain.iter().next().unwrap().unwrap();

        let tx = {
            let utxo_set = UtxoSet::new(&chain);
            TransactionBuilder::new(&utxo_set)
                .build(&alice, &bob.address(), 6)
                .unwrap()
        };
        let block = chain.mine_block(vec![tx]).unwrap();

        // Start from an index holding only genesis, then replay the block
        let utxo_set = UtxoSet::new(&chain);
        chain.chainstate().clear().unwrap();
        utxo_set.update(&genesis).unwrap();
        utxo_set.update(&block).unwrap();

        assert_eq!(utxo_set.entries().unwrap(), chain.find_utxo().unwrap());
    }
}
