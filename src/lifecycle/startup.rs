//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the sealing service from the engine configuration
//! - Assemble the engine over a store
//!
//! # Design Decisions
//! - Fail fast: an unreadable or malformed sealing key is fatal
//! - No key configured is not an error; sealed values are then rejected

use std::sync::Arc;

use crate::config::schema::{ControlConfig, EngineConfig};
use crate::engine::Engine;
use crate::secret::{AeadBox, SecretError, Sealer};
use crate::store::KvStore;

/// Sealer described by the configuration, if any.
pub fn build_sealer(config: &EngineConfig) -> Result<Option<Arc<dyn Sealer>>, SecretError> {
    let sealer = match (&config.seal_key, &config.seal_key_file) {
        (Some(key), _) => AeadBox::from_printable(key)?,
        (None, Some(path)) => AeadBox::from_file(path)?,
        (None, None) => {
            tracing::info!("No sealing key configured, host key pairs can not be stored");
            return Ok(None);
        }
    };
    Ok(Some(Arc::new(sealer)))
}

/// Engine over `store` using the configured namespace and sealer.
pub fn build_engine(store: Arc<dyn KvStore>, config: &ControlConfig) -> Result<Engine, SecretError> {
    let sealer = build_sealer(&config.engine)?;
    let engine = Engine::new(store, &config.engine.root, sealer);
    tracing::info!(root = %engine.keys().root(), sealing = engine.codec().can_seal(), "Engine ready");
    Ok(engine)
}
