// Hashing and encoding utilities

use crate::core::Hash256;
use sha2::{Digest, Sha256};

/// Length of the Base58Check checksum
pub const CHECKSUM_LEN: usize = 4;

/// Encode an integer as 8 big-endian bytes (header field encoding)
pub fn int_to_be_bytes(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

/// Single SHA256 hash
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// RIPEMD160(SHA256(data)) - public key hashing
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// First 4 bytes of SHA256(SHA256(payload))
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut result = [0u8; CHECKSUM_LEN];
    result.copy_from_slice(&second[..CHECKSUM_LEN]);
    result
}

/// Base58(version || payload || checksum)
pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + CHECKSUM_LEN);
    data.push(version);
    data.extend_from_slice(payload);
    let check = checksum(&data);
    data.extend_from_slice(&check);
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string into (version, payload), verifying the checksum
pub fn base58check_decode(encoded: &str) -> Result<(u8, Vec<u8>), String> {
    let data = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| format!("Invalid base58: {}", e))?;

    if data.len() < 1 + CHECKSUM_LEN {
        return Err(format!("Base58Check data too short: {} bytes", data.len()));
    }

    let (body, actual) = data.split_at(data.len() - CHECKSUM_LEN);
    if checksum(body) != actual {
        return Err("Checksum mismatch".to_string());
    }

    Ok((body[0], body[1..].to_vec()))
}
