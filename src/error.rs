//! Error taxonomy shared by the engine and the reconciler.
//!
//! # Design Decisions
//! - Validation and referential errors surface synchronously from direct
//!   mutations; the reconciler logs them and drops the event
//! - Store connectivity errors are wrapped, never flattened into strings,
//!   so the supervisor can tell a compaction from a broken connection

use crate::secret::SecretError;
use crate::store::StoreError;

/// Errors produced by the configuration engine and the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The entity being created already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// An identifier, key or payload failed validation.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A backend cannot be removed while frontends still point at it.
    #[error("backend '{backend}' is in use by frontends: {}", .frontends.join(", "))]
    InUse {
        backend: String,
        frontends: Vec<String>,
    },

    /// The store reported an operation the parser does not understand.
    #[error("unsupported operation '{op}' on key '{key}'")]
    UnsupportedOperation { key: String, op: String },

    /// Sensitive data was written or read without a sealing service.
    #[error("encryption not supported: no sealing key configured")]
    EncryptionNotSupported,

    #[error("sealing failed: {0}")]
    Seal(#[from] SecretError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidFormat(_) => "invalid_format",
            Error::InUse { .. } => "in_use",
            Error::UnsupportedOperation { .. } => "unsupported_operation",
            Error::EncryptionNotSupported => "encryption_not_supported",
            Error::Seal(_) => "seal",
            Error::Store(_) => "store",
            Error::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_use_message_lists_frontends() {
        let err = Error::InUse {
            backend: "b1".into(),
            frontends: vec!["f1".into(), "f2".into()],
        };
        assert_eq!(err.to_string(), "backend 'b1' is in use by frontends: f1, f2");
        assert_eq!(err.kind(), "in_use");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: Error = StoreError::Closed.into();
        assert_eq!(err.to_string(), StoreError::Closed.to_string());
    }
}
