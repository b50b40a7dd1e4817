//! Store key layout and key classification.
//!
//! # Key Namespace
//! ```text
//! <root>/hosts/<hostname>/host
//! <root>/listeners/<listener-id>
//! <root>/frontends/<frontend-id>/frontend
//! <root>/frontends/<frontend-id>/middlewares/<middleware-id>
//! <root>/backends/<backend-id>/backend
//! <root>/backends/<backend-id>/servers/<server-id>
//! ```
//!
//! # Design Decisions
//! - Classification runs an ordered list of typed matchers, most specific
//!   first, so a server key is never taken for its backend
//! - Entity directories (`<root>/backends/b1`) classify as the entity
//!   itself; that is what a prefix delete reports

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrontendKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendKey {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MiddlewareKey {
    pub frontend: FrontendKey,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey {
    pub backend: BackendKey,
    pub id: String,
}

impl HostKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ListenerKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl FrontendKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl BackendKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl MiddlewareKey {
    pub fn new(frontend: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            frontend: FrontendKey::new(frontend),
            id: id.into(),
        }
    }
}

impl ServerKey {
    pub fn new(backend: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            backend: BackendKey::new(backend),
            id: id.into(),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host({})", self.name)
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener({})", self.id)
    }
}

impl fmt::Display for FrontendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frontend({})", self.id)
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend({})", self.id)
    }
}

impl fmt::Display for MiddlewareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "middleware({}/{})", self.frontend.id, self.id)
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server({}/{})", self.backend.id, self.id)
    }
}

/// Typed identity of a classified store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
    Server(ServerKey),
    Backend(BackendKey),
    Middleware(MiddlewareKey),
    Frontend(FrontendKey),
    Host(HostKey),
    Listener(ListenerKey),
}

/// A pure function from key segments (relative to the root) to an identity.
pub type KeyMatcher = fn(&[&str]) -> Option<EntityKey>;

fn match_server(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["backends", backend, "servers", server] => {
            Some(EntityKey::Server(ServerKey::new(*backend, *server)))
        }
        _ => None,
    }
}

fn match_backend(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["backends", backend] | ["backends", backend, "backend"] => {
            Some(EntityKey::Backend(BackendKey::new(*backend)))
        }
        _ => None,
    }
}

fn match_middleware(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["frontends", frontend, "middlewares", middleware] => {
            Some(EntityKey::Middleware(MiddlewareKey::new(*frontend, *middleware)))
        }
        _ => None,
    }
}

fn match_frontend(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["frontends", frontend] | ["frontends", frontend, "frontend"] => {
            Some(EntityKey::Frontend(FrontendKey::new(*frontend)))
        }
        _ => None,
    }
}

fn match_host(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["hosts", host] | ["hosts", host, "host"] => Some(EntityKey::Host(HostKey::new(*host))),
        _ => None,
    }
}

fn match_listener(segments: &[&str]) -> Option<EntityKey> {
    match segments {
        ["listeners", listener] => Some(EntityKey::Listener(ListenerKey::new(*listener))),
        _ => None,
    }
}

/// Matchers in evaluation order, most specific first.
pub const MATCHERS: [(&str, KeyMatcher); 6] = [
    ("server", match_server),
    ("backend", match_backend),
    ("middleware", match_middleware),
    ("frontend", match_frontend),
    ("host", match_host),
    ("listener", match_listener),
];

/// Builds and classifies keys under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    root: String,
}

impl Keys {
    /// `root` is normalized to start with `/` and end without one.
    pub fn new(root: &str) -> Self {
        let trimmed = root.trim_matches('/');
        let root = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix covering the whole namespace, with a trailing slash.
    pub fn namespace(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn hosts(&self) -> String {
        format!("{}/hosts/", self.root)
    }

    pub fn host_dir(&self, key: &HostKey) -> String {
        format!("{}/hosts/{}", self.root, key.name)
    }

    pub fn host(&self, key: &HostKey) -> String {
        format!("{}/host", self.host_dir(key))
    }

    pub fn listeners(&self) -> String {
        format!("{}/listeners/", self.root)
    }

    pub fn listener(&self, key: &ListenerKey) -> String {
        format!("{}/listeners/{}", self.root, key.id)
    }

    pub fn frontends(&self) -> String {
        format!("{}/frontends/", self.root)
    }

    pub fn frontend_dir(&self, key: &FrontendKey) -> String {
        format!("{}/frontends/{}", self.root, key.id)
    }

    pub fn frontend(&self, key: &FrontendKey) -> String {
        format!("{}/frontend", self.frontend_dir(key))
    }

    pub fn middlewares(&self, key: &FrontendKey) -> String {
        format!("{}/middlewares/", self.frontend_dir(key))
    }

    pub fn middleware(&self, key: &MiddlewareKey) -> String {
        format!("{}{}", self.middlewares(&key.frontend), key.id)
    }

    pub fn backends(&self) -> String {
        format!("{}/backends/", self.root)
    }

    pub fn backend_dir(&self, key: &BackendKey) -> String {
        format!("{}/backends/{}", self.root, key.id)
    }

    pub fn backend(&self, key: &BackendKey) -> String {
        format!("{}/backend", self.backend_dir(key))
    }

    pub fn servers(&self, key: &BackendKey) -> String {
        format!("{}/servers/", self.backend_dir(key))
    }

    pub fn server(&self, key: &ServerKey) -> String {
        format!("{}{}", self.servers(&key.backend), key.id)
    }

    /// Key segments below the root; `None` for keys outside the namespace.
    pub fn relative<'a>(&self, key: &'a str) -> Option<Vec<&'a str>> {
        let rest = key.strip_prefix(&self.namespace())?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(segments)
    }

    /// Classify a raw key; `None` for keys no matcher accepts.
    pub fn classify(&self, key: &str) -> Option<EntityKey> {
        let segments = self.relative(key)?;
        MATCHERS.iter().find_map(|(_, matcher)| matcher(&segments))
    }
}
