//! Store-backed configuration engine.
//!
//! # Data Flow
//! ```text
//! Administrative writes:
//!     ops.rs (validate, check references) → codec.rs → KvStore::put / delete
//!
//! Reconciler bootstrap:
//!     snapshot.rs → one KvStore::get over the namespace → Snapshot
//!
//! Live updates:
//!     subscribe.rs → KvStore::watch(after revision)
//!         → parser.rs (keys.rs classification, re-read on put)
//!         → Change { revision, event } → consumer channel
//! ```
//!
//! # Design Decisions
//! - The engine is a cheap clone over a shared store handle
//! - Reads used to build events always go back to the store; watch
//!   payloads are never trusted as entity state

pub mod codec;
pub mod keys;
pub mod ops;
pub mod parser;
pub mod snapshot;
pub mod subscribe;

pub use codec::Codec;
pub use keys::{
    BackendKey, EntityKey, FrontendKey, HostKey, Keys, ListenerKey, MiddlewareKey, ServerKey,
};
pub use parser::{Change, ChangeEvent};
pub use snapshot::{BackendSpec, FrontendSpec, Snapshot};

use std::sync::Arc;

use crate::secret::Sealer;
use crate::store::KvStore;

/// Default key prefix of the configuration namespace.
pub const DEFAULT_ROOT: &str = "/dynproxy";

/// Entry point to the stored proxy configuration.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn KvStore>,
    keys: Keys,
    codec: Codec,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.keys.root())
            .field("sealing", &self.codec.can_seal())
            .finish()
    }
}

impl Engine {
    pub fn new(store: Arc<dyn KvStore>, root: &str, sealer: Option<Arc<dyn Sealer>>) -> Self {
        Self {
            store,
            keys: Keys::new(root),
            codec: Codec::new(sealer),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}
