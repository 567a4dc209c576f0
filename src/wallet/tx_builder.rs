// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::UtxoSet;
use crate::wallet::{Address, KeyPair};

/// Builds signed spend transactions from the UTXO index
pub struct TransactionBuilder<'a> {
    utxo_set: &'a UtxoSet<'a>,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(utxo_set: &'a UtxoSet<'a>) -> Self {
        Self { utxo_set }
    }

    /// Build and sign a transaction moving `amount` from `from` to `to`.
    ///
    /// Outputs are selected in index order until they cover `amount`; the
    /// excess comes back to the sender as a change output.
    pub fn build(&self, from: &KeyPair, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let to_hash = to.to_pubkey_hash()?;
        let from_hash = from.pubkey_hash();

        let (accumulated, outpoints) = self.utxo_set.find_spendable_outputs(&from_hash, amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                available: accumulated,
                required: amount,
            });
        }

        let pubkey = from.public_key_bytes();
        let inputs: Vec<TxInput> = outpoints
            .into_iter()
            .map(|outpoint| TxInput::new(outpoint, pubkey.clone()))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to_hash)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from_hash));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.utxo_set
            .blockchain()
            .sign_transaction(&mut tx, &from.secret_key)?;

        log::debug!(
            "Built transaction {} spending {} inputs for {}",
            tx.id,
            tx.inputs.len(),
            amount
        );
        Ok(tx)
    }

    /// Spendable balance of `address`
    pub fn balance(&self, address: &Address) -> Result<u64> {
        let pubkey_hash = address.to_pubkey_hash()?;
        self.utxo_set.balance(&pubkey_hash)
    }
}
