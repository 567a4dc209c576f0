// Key pairs and addresses

use crate::core::{base58check_decode, base58check_encode, hash160};
use crate::error::{LedgerError, Result};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address version byte
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of a public-key hash
pub const PUBKEY_HASH_LEN: usize = 20;

/// RIPEMD160(SHA256(pubkey)) - the lock carried by outputs
pub fn hash_pubkey(pubkey: &[u8]) -> [u8; PUBKEY_HASH_LEN] {
    hash160(pubkey)
}

/// Parse a 64-byte X || Y public key
pub fn public_key_from_xy(bytes: &[u8]) -> std::result::Result<PublicKey, secp256k1::Error> {
    if bytes.len() != 64 {
        return Err(secp256k1::Error::InvalidPublicKey);
    }
    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);
    PublicKey::from_slice(&uncompressed)
}

/// Base58Check address: version || pubkey hash || checksum.
/// Display form of a public-key hash; it never holds key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn from_pubkey_hash(hash: &[u8; PUBKEY_HASH_LEN]) -> Self {
        Self(base58check_encode(ADDRESS_VERSION, hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the public-key hash, verifying the checksum
    pub fn to_pubkey_hash(&self) -> Result<[u8; PUBKEY_HASH_LEN]> {
        let (_, payload) = base58check_decode(&self.0)
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        payload.as_slice().try_into().map_err(|_| {
            LedgerError::InvalidAddress(format!(
                "{}: expected {}-byte hash, got {}",
                self.0,
                PUBKEY_HASH_LEN,
                payload.len()
            ))
        })
    }

    /// Whether `address` decodes and its checksum matches.
    /// Malformed input is reported as `false`.
    pub fn validate(address: &str) -> bool {
        matches!(
            base58check_decode(address),
            Ok((_, payload)) if payload.len() == PUBKEY_HASH_LEN
        )
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        if !Self::validate(s) {
            return Err(LedgerError::InvalidAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// secp256k1 key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Public key as concatenated X || Y coordinates (64 bytes)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize_uncompressed()[1..].to_vec()
    }

    pub fn pubkey_hash(&self) -> [u8; PUBKEY_HASH_LEN] {
        hash_pubkey(&self.public_key_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_pubkey_hash(&self.pubkey_hash())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
