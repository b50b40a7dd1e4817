//! Resilience for the store connection.
//!
//! # Data Flow
//! ```text
//! Supervisor: watch fails
//!     → backoff.rs (exponential delay with jitter, reset on progress)
//!     → resubscribe from the last applied revision
//! ```
//!
//! # Design Decisions
//! - Jitter spreads reconnects of many proxies after a store outage
//! - The delay resets as soon as a subscription delivers a change

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
