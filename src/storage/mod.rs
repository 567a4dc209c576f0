// Storage layer: the block chain and its UTXO index

mod blockchain;
mod utxo_set;

pub use blockchain::{BLOCKS_TREE, Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA, UTXO_TREE};
pub use utxo_set::{TxOutputs, UnspentOutput, UtxoSet};
