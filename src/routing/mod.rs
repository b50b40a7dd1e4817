//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (host, path)
//!     → proxy::Topology (host → HostRouter, catch-all fallback)
//!     → router.rs (most specific matching route)
//!     → route.rs (middleware chain + endpoint pool)
//!
//! Reconciler:
//!     Frontend → matcher.rs (parse rule) → router.add_route / remove_route
//! ```
//!
//! # Design Decisions
//! - One router per host; each router publishes its route table atomically
//! - Deterministic: routes ordered by path specificity, then frontend id
//! - No regex in hot path (prefix matching only)

pub mod matcher;
pub mod route;
pub mod router;

pub use matcher::{PathMatch, RouteRule, CATCH_ALL};
pub use route::{MiddlewareChain, Route};
pub use router::HostRouter;
