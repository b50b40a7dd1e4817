//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlConfig (validated, immutable)
//!
//! seed file (TOML topology)
//!     → seed.rs (parse, validate, diff against the store, write through the engine)
//!     → watcher.rs detects change → seed.rs again
//! ```
//!
//! # Design Decisions
//! - Process config is immutable once loaded; only the seeded topology reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod seed;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::ControlConfig;
pub use seed::{apply_seed, SeedFile, SeedReport};
