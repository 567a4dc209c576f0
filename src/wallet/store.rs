// Wallet file: key pairs stored by address

use crate::error::Result;
use crate::wallet::{Address, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// On-disk form of the wallet file
#[derive(Serialize, Deserialize, Default)]
struct WalletFile {
    keys: HashMap<Address, [u8; 32]>,
}

/// Key pairs owned by this node, keyed by address
#[derive(Default)]
pub struct Wallets {
    keys: HashMap<Address, KeyPair>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key pair and return its address
    pub fn create_wallet(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// All addresses, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = WalletFile {
            keys: self
                .keys
                .iter()
                .map(|(addr, kp)| (addr.clone(), kp.secret_key.secret_bytes()))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let file: WalletFile = serde_json::from_str(&json)?;

        let mut keys = HashMap::with_capacity(file.keys.len());
        for (addr, secret) in file.keys {
            keys.insert(addr, KeyPair::from_secret_bytes(&secret)?);
        }

        Ok(Self { keys })
    }

    /// Load the wallet file, or start empty if it does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            log::info!("Loading wallets from {}", path.as_ref().display());
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let mut wallets = Wallets::new();
        assert!(wallets.is_empty());

        let a = wallets.create_wallet();
        let b = wallets.create_wallet();
        assert_eq!(wallets.len(), 2);
        assert_ne!(a, b);

        assert_eq!(wallets.get(&a).unwrap().address(), a);
        assert_eq!(wallets.addresses().len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let mut wallets = Wallets::new();
        let addr = wallets.create_wallet();
        wallets.save(&path).unwrap();

        let loaded = Wallets::load(&path).unwrap();
        let kp = loaded.get(&addr).unwrap();
        assert_eq!(kp.public_key, wallets.get(&addr).unwrap().public_key);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let wallets = Wallets::load_or_default(dir.path().join("missing.json")).unwrap();
        assert!(wallets.is_empty());
    }
}
