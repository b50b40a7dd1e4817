//! Control plane of a dynamically reconfigurable reverse proxy.
//!
//! Keeps an in-memory proxy topology (hosts, listeners, routes, backend
//! pools, middleware chains) synchronized with a watchable key-value store
//! without restarts.

// Store-backed configuration
pub mod engine;
pub mod model;
pub mod secret;
pub mod store;

// Live topology
pub mod load_balancer;
pub mod proxy;
pub mod reconciler;
pub mod routing;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ControlConfig;
pub use engine::Engine;
pub use error::Error;
pub use lifecycle::{Shutdown, Supervisor};
pub use proxy::Topology;
pub use reconciler::Reconciler;
