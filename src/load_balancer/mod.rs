//! Endpoint pools and load balancing.
//!
//! # Data Flow
//! ```text
//! Route matched → route.pool()
//!     → pool.rs (current endpoint list, swapped atomically on change)
//!     → round_robin.rs (rotate through endpoints)
//!     → endpoint.rs (connection guard for the selected endpoint)
//!
//! Reconciler:
//!     desired server URLs → pool.sync() → add / remove individual endpoints
//! ```
//!
//! # Design Decisions
//! - Readers never lock: the endpoint list is an `ArcSwap` snapshot
//! - Endpoints are identified by origin (scheme, host, port)
//! - Unchanged endpoints keep their identity across syncs

pub mod endpoint;
pub mod pool;
pub mod round_robin;

pub use endpoint::{Endpoint, EndpointGuard};
pub use pool::{diff_endpoints, EndpointDiff, EndpointPool, PoolError, SyncReport};
pub use round_robin::RoundRobin;

use std::sync::Arc;

/// Strategy for picking the next endpoint.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}
