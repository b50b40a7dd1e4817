//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and addresses
//! - Reject ambiguous sealing key sources
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControlConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ControlConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ControlConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let root = config.engine.root.trim_matches('/');
    if root.is_empty() {
        errors.push(ValidationError::new("engine.root", "must name a non-empty prefix"));
    } else if root.split('/').any(str::is_empty) {
        errors.push(ValidationError::new("engine.root", "must not contain empty segments"));
    }
    if config.engine.channel_capacity == 0 {
        errors.push(ValidationError::new("engine.channel_capacity", "must be greater than 0"));
    }
    if config.engine.seal_key.is_some() && config.engine.seal_key_file.is_some() {
        errors.push(ValidationError::new(
            "engine.seal_key",
            "set either seal_key or seal_key_file, not both",
        ));
    }

    let s = &config.supervisor;
    if s.retry_base_ms == 0 {
        errors.push(ValidationError::new("supervisor.retry_base_ms", "must be greater than 0"));
    }
    if s.retry_max_ms < s.retry_base_ms {
        errors.push(ValidationError::new(
            "supervisor.retry_max_ms",
            format!("must be at least retry_base_ms ({})", s.retry_base_ms),
        ));
    }

    if config.seed.watch && config.seed.path.is_none() {
        errors.push(ValidationError::new("seed.watch", "requires seed.path"));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
