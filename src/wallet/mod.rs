// Keys, addresses, the wallet file and spend construction

mod keys;
mod store;
mod tx_builder;

pub use keys::{ADDRESS_VERSION, Address, KeyPair, PUBKEY_HASH_LEN, hash_pubkey, public_key_from_xy};
pub use store::Wallets;
pub use tx_builder::TransactionBuilder;
