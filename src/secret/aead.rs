//! AES-256-GCM sealer.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{SealedValue, SecretError, Sealer};

/// Encryption identifier written into every envelope.
pub const ENCRYPTION_TYPE: &str = "aes-gcm.v1";

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    nonce: String,
    ciphertext: String,
}

/// Seals data with a single symmetric key.
#[derive(Clone)]
pub struct AeadBox {
    key: [u8; KEY_BYTES],
}

impl std::fmt::Debug for AeadBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadBox").finish_non_exhaustive()
    }
}

impl AeadBox {
    pub fn new(key: [u8; KEY_BYTES]) -> Self {
        Self { key }
    }

    /// Build from a base64-encoded 32-byte key.
    pub fn from_printable(encoded: &str) -> Result<Self, SecretError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_BYTES] = bytes.as_slice().try_into().map_err(|_| {
            SecretError::InvalidKey(format!("expected {} bytes, got {}", KEY_BYTES, bytes.len()))
        })?;
        Ok(Self::new(key))
    }

    /// Read a base64-encoded key from a file.
    pub fn from_file(path: &Path) -> Result<Self, SecretError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SecretError::InvalidKey(format!("{}: {}", path.display(), e)))?;
        Self::from_printable(&contents)
    }

    /// Generate a fresh base64-encoded key.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut key);
        base64::engine::general_purpose::STANDARD.encode(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, SecretError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| SecretError::InvalidKey(e.to_string()))
    }
}

impl Sealer for AeadBox {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedValue, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| SecretError::EncryptFailed)?;

        let engine = base64::engine::general_purpose::STANDARD;
        let envelope = Envelope {
            nonce: engine.encode(nonce_bytes),
            ciphertext: engine.encode(ciphertext),
        };
        Ok(SealedValue {
            encryption: ENCRYPTION_TYPE.to_string(),
            value: serde_json::to_value(envelope)
                .map_err(|e| SecretError::Malformed(e.to_string()))?,
        })
    }

    fn unseal(&self, sealed: &SealedValue) -> Result<Vec<u8>, SecretError> {
        if sealed.encryption != ENCRYPTION_TYPE {
            return Err(SecretError::UnsupportedEncryption(sealed.encryption.clone()));
        }
        let envelope: Envelope = serde_json::from_value(sealed.value.clone())
            .map_err(|e| SecretError::Malformed(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        let nonce = engine
            .decode(&envelope.nonce)
            .map_err(|e| SecretError::Malformed(e.to_string()))?;
        if nonce.len() != NONCE_BYTES {
            return Err(SecretError::Malformed(format!("nonce must be {} bytes", NONCE_BYTES)));
        }
        let ciphertext = engine
            .decode(&envelope.ciphertext)
            .map_err(|e| SecretError::Malformed(e.to_string()))?;

        self.cipher()?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| SecretError::DecryptFailed)
    }
}
