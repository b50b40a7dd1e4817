//! Sealing of sensitive entity fields.
//!
//! # Responsibilities
//! - Define the opaque seal/unseal capability the codec calls
//! - Define the envelope a sealed value is stored as
//!
//! # Design Decisions
//! - The envelope names its encryption scheme so a reader can reject
//!   values it cannot open instead of misinterpreting them
//! - Absence of a sealer is handled by the engine, not here

pub mod aead;

pub use aead::AeadBox;

use serde::{Deserialize, Serialize};

/// Errors raised while sealing or unsealing.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid sealing key: {0}")]
    InvalidKey(String),

    #[error("unsupported encryption type '{0}'")]
    UnsupportedEncryption(String),

    #[error("malformed sealed value: {0}")]
    Malformed(String),

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptFailed,
}

/// A sealed payload as stored inside an entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    /// Encryption scheme identifier, e.g. `aes-gcm.v1`.
    pub encryption: String,
    /// Scheme-specific body.
    pub value: serde_json::Value,
}

/// Opaque seal/unseal capability.
pub trait Sealer: Send + Sync + std::fmt::Debug {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedValue, SecretError>;
    fn unseal(&self, sealed: &SealedValue) -> Result<Vec<u8>, SecretError>;
}
