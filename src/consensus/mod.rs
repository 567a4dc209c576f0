// Consensus rules: proof of work and block admission

pub mod pow;
pub mod validation;

pub use pow::{MAX_NONCE, MiningResult, ProofOfWork, TARGET_BITS};
pub use validation::{BlockValidator, ValidationError};
