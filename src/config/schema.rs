//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! control plane. All types derive Serde traits for deserialization from
//! TOML files, and every section has defaults so an empty file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_ROOT;
use crate::lifecycle::SupervisorSettings;

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Store namespace and sealing.
    pub engine: EngineConfig,

    /// Watch restart policy.
    pub supervisor: SupervisorConfig,

    /// Optional topology seed file.
    pub seed: SeedConfig,

    /// Read-only admin API.
    pub admin: AdminConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Key prefix every entity lives under.
    pub root: String,

    /// Capacity of the change channel between subscription and reconciler.
    pub channel_capacity: usize,

    /// Base64 sealing key for host key pairs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seal_key: Option<String>,

    /// File holding the base64 sealing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seal_key_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            channel_capacity: 2000,
            seal_key: None,
            seal_key_file: None,
        }
    }
}

/// Resubscription backoff.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 500,
            retry_max_ms: 5000,
        }
    }
}

/// Topology seed file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SeedConfig {
    /// Path of the TOML topology to load into the store at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Re-apply the file whenever it changes.
    pub watch: bool,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive (e.g. "info" or "dynproxy=debug"); `RUST_LOG` wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ControlConfig {
    /// Supervisor settings derived from the engine and supervisor sections.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            channel_capacity: self.engine.channel_capacity,
            retry_base: Duration::from_millis(self.supervisor.retry_base_ms),
            retry_max: Duration::from_millis(self.supervisor.retry_max_ms),
        }
    }
}
