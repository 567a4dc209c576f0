// Transaction data structures, signing and verification

use crate::core::serialize::{
    Serializable, read_array, read_var_bytes, read_vec, write_var_bytes, write_vec,
};
use crate::core::{Hash256, hash160, sha256};
use crate::error::{LedgerError, Result};
use crate::wallet::{Address, public_key_from_xy};
use rand::RngCore;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, Secp256k1, SecretKey};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};

/// Block reward paid by a coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Source index carried by the single coinbase input
pub const COINBASE_INDEX: i64 = -1;

/// Reference to one output of a prior transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// Transaction input - spends one prior output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Transaction holding the spent output; `None` for coinbase
    pub prev_tx_hash: Option<Hash256>,
    /// Index of the spent output, `COINBASE_INDEX` for coinbase
    pub prev_index: i64,
    /// Compact ECDSA signature (r || s)
    pub signature: Vec<u8>,
    /// Spender public key (X || Y). Coinbase inputs carry their note here.
    pub pubkey: Vec<u8>,
}

impl TxInput {
    /// Unsigned input spending `outpoint` with the given public key
    pub fn new(outpoint: OutPoint, pubkey: Vec<u8>) -> Self {
        Self {
            prev_tx_hash: Some(outpoint.txid),
            prev_index: i64::from(outpoint.vout),
            signature: Vec::new(),
            pubkey,
        }
    }

    pub fn coinbase(note: &[u8]) -> Self {
        Self {
            prev_tx_hash: None,
            prev_index: COINBASE_INDEX,
            signature: Vec::new(),
            pubkey: note.to_vec(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_hash.is_none() && self.prev_index == COINBASE_INDEX
    }

    /// The referenced output, `None` for coinbase or a negative index
    pub fn outpoint(&self) -> Option<OutPoint> {
        let txid = self.prev_tx_hash?;
        let vout = u32::try_from(self.prev_index).ok()?;
        Some(OutPoint::new(txid, vout))
    }

    /// Whether this input was made with the key hashing to `pubkey_hash`
    pub fn uses_key(&self, pubkey_hash: &[u8; 20]) -> bool {
        hash160(&self.pubkey) == *pubkey_hash
    }
}

impl Serializable for TxInput {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let prev = self.prev_tx_hash.as_ref().map(|h| &h.0[..]).unwrap_or(&[]);
        write_var_bytes(writer, prev)?;
        writer.write_all(&self.prev_index.to_le_bytes())?;
        write_var_bytes(writer, &self.signature)?;
        write_var_bytes(writer, &self.pubkey)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let prev = read_var_bytes(reader)?;
        let prev_tx_hash = if prev.is_empty() {
            None
        } else {
            Some(Hash256::from_slice(&prev).map_err(LedgerError::Serialization)?)
        };
        let prev_index = i64::from_le_bytes(read_array(reader)?);
        let signature = read_var_bytes(reader)?;
        let pubkey = read_var_bytes(reader)?;

        Ok(Self {
            prev_tx_hash,
            prev_index,
            signature,
            pubkey,
        })
    }
}

/// Transaction output - a value locked to a public-key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: [u8; 20],
}

impl TxOutput {
    pub fn new(value: u64, pubkey_hash: [u8; 20]) -> Self {
        Self { value, pubkey_hash }
    }

    /// Output paying `value` to `address`
    pub fn lock(value: u64, address: &Address) -> Result<Self> {
        Ok(Self::new(value, address.to_pubkey_hash()?))
    }

    pub fn is_locked_with_key(&self, pubkey_hash: &[u8; 20]) -> bool {
        self.pubkey_hash == *pubkey_hash
    }
}

impl Serializable for TxOutput {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.value.to_le_bytes())?;
        write_var_bytes(writer, &self.pubkey_hash)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let value = u64::from_le_bytes(read_array(reader)?);
        let lock = read_var_bytes(reader)?;
        let pubkey_hash = lock.as_slice().try_into().map_err(|_| {
            LedgerError::Serialization(format!("Invalid public key hash length: {}", lock.len()))
        })?;
        Ok(Self { value, pubkey_hash })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// SHA256 of the transaction encoded with this field left empty
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and assign its identity
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying `SUBSIDY` to `to`.
    /// An empty note is replaced by a reward line with a random suffix so
    /// that two rewards to one address get distinct ids.
    pub fn coinbase(to: &Address, note: &str) -> Result<Self> {
        let note = if note.is_empty() {
            let mut salt = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut salt);
            format!("Reward to '{}' {}", to, hex::encode(salt))
        } else {
            note.to_string()
        };

        let output = TxOutput::lock(SUBSIDY, to)?;
        Ok(Self::new(vec![TxInput::coinbase(note.as_bytes())], vec![output]))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Identity digest: SHA256 of the encoding with the id field cleared
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.encode(&mut buf, false);
        sha256(&buf)
    }

    fn encode<W: Write>(&self, writer: &mut W, with_id: bool) -> io::Result<()> {
        let id: &[u8] = if with_id { &self.id.0 } else { &[] };
        write_var_bytes(writer, id)?;
        write_vec(writer, &self.inputs)?;
        write_vec(writer, &self.outputs)
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_hash: input.prev_tx_hash,
                prev_index: input.prev_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();

        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed for input `input_index`: the trimmed copy with that
    /// input's public key replaced by the lock of the output it spends
    pub fn signing_payload(
        &self,
        prev_txs: &HashMap<Hash256, Transaction>,
        input_index: usize,
    ) -> Result<Hash256> {
        let input = self
            .inputs
            .get(input_index)
            .ok_or(LedgerError::InvalidInputIndex {
                txid: self.id,
                index: input_index,
            })?;
        let lock = referenced_output(input, prev_txs)?.pubkey_hash;

        let mut trimmed = self.trimmed_copy();
        trimmed.inputs[input_index].pubkey = lock.to_vec();
        Ok(trimmed.hash())
    }

    /// Whether `id` matches the content it was assigned from: the
    /// transaction with every signature cleared
    pub fn has_valid_id(&self) -> bool {
        let mut unsigned = self.clone();
        for input in &mut unsigned.inputs {
            input.signature.clear();
        }
        unsigned.hash() == self.id
    }

    /// Sign every input with `secret_key`. Coinbase transactions are left
    /// untouched.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        if self.inputs.iter().any(|input| input.prev_tx_hash.is_none()) {
            return Err(LedgerError::InvalidTransaction(self.id));
        }
        self.check_prev_txs(prev_txs)?;

        let secp = Secp256k1::signing_only();
        for index in 0..self.inputs.len() {
            let payload = self.signing_payload(prev_txs, index)?;
            let message = Message::from_digest(payload.0);
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Check every input's signature against its declared public key.
    ///
    /// Returns `Err` only when a referenced prior transaction is missing
    /// from `prev_txs`. A bad signature, a key that does not own the spent
    /// output or an out-of-range output index is `Ok(false)`.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.inputs.iter().any(|input| input.prev_tx_hash.is_none()) {
            return Ok(false);
        }
        self.check_prev_txs(prev_txs)?;

        let secp = Secp256k1::verification_only();
        for (index, input) in self.inputs.iter().enumerate() {
            let payload = match self.signing_payload(prev_txs, index) {
                Ok(payload) => payload,
                Err(LedgerError::InvalidOutputIndex { .. }) => return Ok(false),
                Err(e) => return Err(e),
            };

            // The declared key must own the output being spent
            let spent = referenced_output(input, prev_txs)?;
            if hash160(&input.pubkey) != spent.pubkey_hash {
                return Ok(false);
            }

            let Ok(signature) = Signature::from_compact(&input.signature) else {
                return Ok(false);
            };
            let Ok(pubkey) = public_key_from_xy(&input.pubkey) else {
                return Ok(false);
            };

            let message = Message::from_digest(payload.0);
            if secp.verify_ecdsa(&message, &signature, &pubkey).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn check_prev_txs(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<()> {
        for txid in self.inputs.iter().filter_map(|input| input.prev_tx_hash) {
            if !prev_txs.contains_key(&txid) {
                return Err(LedgerError::MissingPrevTransaction(txid));
            }
        }
        Ok(())
    }

    /// Sum of output values, saturating at `u64::MAX`
    pub fn total_output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |total, out| total.saturating_add(out.value))
    }

    /// Sum of output values, `None` on overflow
    pub fn checked_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Sum of the values of the outputs spent by the inputs, `None` on
    /// overflow. Zero for coinbase.
    pub fn checked_input_value(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<Option<u64>> {
        if self.is_coinbase() {
            return Ok(Some(0));
        }
        let mut total = 0u64;
        for input in &self.inputs {
            let value = referenced_output(input, prev_txs)?.value;
            match total.checked_add(value) {
                Some(sum) => total = sum,
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }
}

fn referenced_output<'a>(
    input: &TxInput,
    prev_txs: &'a HashMap<Hash256, Transaction>,
) -> Result<&'a TxOutput> {
    let txid = input.prev_tx_hash.ok_or(LedgerError::InvalidOutputIndex {
        txid: Hash256::zero(),
        index: input.prev_index,
    })?;
    let prev = prev_txs
        .get(&txid)
        .ok_or(LedgerError::MissingPrevTransaction(txid))?;

    usize::try_from(input.prev_index)
        .ok()
        .and_then(|index| prev.outputs.get(index))
        .ok_or(LedgerError::InvalidOutputIndex {
            txid,
            index: input.prev_index,
        })
}

impl Serializable for Transaction {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.encode(writer, true)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let id = read_var_bytes(reader)?;
        let id = Hash256::from_slice(&id).map_err(LedgerError::Serialization)?;
        let inputs = read_vec(reader)?;
        let outputs = read_vec(reader)?;

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;

        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            match input.prev_tx_hash {
                Some(txid) => writeln!(f, "       TXID:      {}", txid)?,
                None => writeln!(f, "       TXID:      (coinbase)")?,
            }
            writeln!(f, "       Out:       {}", input.prev_index)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pubkey))?;
        }

        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       PubKeyHash: {}", hex::encode(output.pubkey_hash))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeyPair;

    fn prev_map(txs: &[&Transaction]) -> HashMap<Hash256, Transaction> {
        txs.iter().map(|tx| (tx.id, (*tx).clone())).collect()
    }

    fn spend(from: &KeyPair, funding: &Transaction, to: &KeyPair, amount: u64) -> Transaction {
        let input = TxInput::new(OutPoint::new(funding.id, 0), from.public_key_bytes());
        let output = TxOutput::new(amount, to.pubkey_hash());
        Transaction::new(vec![input], vec![output])
    }

    #[test]
    fn test_coinbase_shape() {
        let kp = KeyPair::generate();
        let tx = Transaction::coinbase(&kp.address(), "genesis note").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs[0].prev_index, COINBASE_INDEX);
        assert!(tx.inputs[0].prev_tx_hash.is_none());
        assert_eq!(tx.inputs[0].pubkey, b"genesis note");
        assert_eq!(tx.outputs, vec![TxOutput::new(SUBSIDY, kp.pubkey_hash())]);
    }

    #[test]
    fn test_default_coinbase_notes_differ() {
        let kp = KeyPair::generate();
        let a = Transaction::coinbase(&kp.address(), "").unwrap();
        let b = Transaction::coinbase(&kp.address(), "").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_identity_is_content_addressed() {
        let kp = KeyPair::generate();
        let tx = Transaction::coinbase(&kp.address(), "note").unwrap();
        assert_eq!(tx.id, tx.hash());

        // The stored id does not feed into the identity
        let mut relabeled = tx.clone();
        relabeled.id = Hash256::new([9; 32]);
        assert_eq!(relabeled.hash(), tx.id);

        let mut changed = tx.clone();
        changed.outputs[0].value += 1;
        assert_ne!(changed.hash(), tx.id);
    }

    #[test]
    fn test_serialization_is_byte_stable() {
        let kp = KeyPair::generate();
        let tx = Transaction::coinbase(&kp.address(), "note").unwrap();

        let bytes = tx.serialize();
        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.serialize(), bytes);
    }

    #[test]
    fn test_trimmed_copy_clears_signature_data() {
        let alice = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let mut tx = spend(&alice, &funding, &alice, 5);
        tx.inputs[0].signature = vec![1, 2, 3];

        let trimmed = tx.trimmed_copy();
        assert!(trimmed.inputs[0].signature.is_empty());
        assert!(trimmed.inputs[0].pubkey.is_empty());
        assert_eq!(trimmed.inputs[0].prev_tx_hash, Some(funding.id));
        assert_eq!(trimmed.outputs, tx.outputs);
    }

    #[test]
    fn test_sign_and_verify() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        let mut tx = spend(&alice, &funding, &bob, 10);
        tx.sign(&alice.secret_key, &prev).unwrap();

        assert_eq!(tx.inputs[0].signature.len(), 64);
        assert!(tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        // Mallory signs with her own key while claiming Alice's public key
        let mut tx = spend(&alice, &funding, &mallory, 10);
        tx.sign(&mallory.secret_key, &prev).unwrap();
        assert!(!tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_verify_rejects_key_not_owning_output() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        // Consistent key and signature, but the output is locked to Alice
        let mut tx = spend(&mallory, &funding, &mallory, 10);
        tx.sign(&mallory.secret_key, &prev).unwrap();
        assert!(!tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_has_valid_id() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);
        assert!(funding.has_valid_id());

        let mut tx = spend(&alice, &funding, &bob, 10);
        tx.sign(&alice.secret_key, &prev).unwrap();
        assert!(tx.has_valid_id());

        let mut relabeled = tx.clone();
        relabeled.id = funding.id;
        assert!(!relabeled.has_valid_id());

        let mut changed = tx.clone();
        changed.outputs[0].value = 9;
        assert!(!changed.has_valid_id());
    }

    #[test]
    fn test_value_sums() {
        let alice = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        let tx = spend(&alice, &funding, &alice, 7);
        assert_eq!(tx.checked_input_value(&prev).unwrap(), Some(SUBSIDY));
        assert_eq!(tx.checked_output_value(), Some(7));
        assert_eq!(funding.checked_input_value(&HashMap::new()).unwrap(), Some(0));

        let huge = Transaction::new(
            vec![TxInput::coinbase(b"x")],
            vec![TxOutput::new(u64::MAX, alice.pubkey_hash()), TxOutput::new(1, alice.pubkey_hash())],
        );
        assert_eq!(huge.checked_output_value(), None);
        assert_eq!(huge.total_output_value(), u64::MAX);
    }

    #[test]
    fn test_signing_payload_input_out_of_range() {
        let alice = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);
        let tx = spend(&alice, &funding, &alice, 10);

        assert!(tx.signing_payload(&prev, 0).is_ok());
        assert!(matches!(
            tx.signing_payload(&prev, 1),
            Err(LedgerError::InvalidInputIndex { index: 1, .. })
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_output() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        let mut tx = spend(&alice, &funding, &bob, 10);
        tx.sign(&alice.secret_key, &prev).unwrap();
        tx.outputs[0].value = 1000;
        assert!(!tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_signature_bound_to_spent_output() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        let mut tx = spend(&alice, &funding, &bob, 10);
        tx.sign(&alice.secret_key, &prev).unwrap();

        // Same transaction, but the referenced output is now locked elsewhere
        let mut other_funding = funding.clone();
        other_funding.outputs[0].pubkey_hash = bob.pubkey_hash();
        let substituted = prev_map(&[&other_funding]);
        assert!(!tx.verify(&substituted).unwrap());
    }

    #[test]
    fn test_verify_missing_prev_is_error() {
        let alice = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let tx = spend(&alice, &funding, &alice, 10);

        assert!(matches!(
            tx.verify(&HashMap::new()),
            Err(LedgerError::MissingPrevTransaction(id)) if id == funding.id
        ));
    }

    #[test]
    fn test_out_of_range_index() {
        let alice = KeyPair::generate();
        let funding = Transaction::coinbase(&alice.address(), "f").unwrap();
        let prev = prev_map(&[&funding]);

        let input = TxInput::new(OutPoint::new(funding.id, 3), alice.public_key_bytes());
        let mut tx = Transaction::new(vec![input], vec![TxOutput::new(1, alice.pubkey_hash())]);

        assert!(matches!(
            tx.sign(&alice.secret_key, &prev),
            Err(LedgerError::InvalidOutputIndex { index: 3, .. })
        ));
        assert!(!tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_coinbase_skips_signing() {
        let kp = KeyPair::generate();
        let mut tx = Transaction::coinbase(&kp.address(), "note").unwrap();
        let before = tx.clone();

        tx.sign(&kp.secret_key, &HashMap::new()).unwrap();
        assert_eq!(tx, before);
        assert!(tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_uses_key_and_lock() {
        let kp = KeyPair::generate();
        let input = TxInput::new(OutPoint::new(Hash256::zero(), 0), kp.public_key_bytes());
        assert!(input.uses_key(&kp.pubkey_hash()));

        let output = TxOutput::lock(3, &kp.address()).unwrap();
        assert!(output.is_locked_with_key(&kp.pubkey_hash()));
        assert!(!output.is_locked_with_key(&[0u8; 20]));
    }
}
