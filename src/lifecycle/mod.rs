//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build sealer → Build engine
//!
//! Supervision (supervisor.rs):
//!     Snapshot → Bootstrap → Subscribe → Apply
//!     → on watch failure: back off, resume or re-snapshot
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → subscription, seed watcher
//!     and admin server observe the signal and return
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store state, then the admin API
//! - One shutdown signal shared by every task

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use supervisor::{Supervisor, SupervisorSettings};
