//! A single upstream endpoint.
//!
//! # Responsibilities
//! - Identify an upstream by origin
//! - Track in-flight requests through an RAII guard

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

/// Identity of an endpoint: its origin (`scheme://host[:port]`).
pub fn endpoint_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// One server of a backend pool.
#[derive(Debug)]
pub struct Endpoint {
    pub url: Url,
    key: String,
    active_requests: AtomicUsize,
}

impl Endpoint {
    pub fn new(url: Url) -> Self {
        let key = endpoint_key(&url);
        Self {
            url,
            key,
            active_requests: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of requests currently holding a guard.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Mark a request as in flight until the guard drops.
    pub fn acquire(self: &Arc<Self>) -> EndpointGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        EndpointGuard {
            endpoint: self.clone(),
        }
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct EndpointGuard {
    endpoint: Arc<Endpoint>,
}

impl Deref for EndpointGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        self.endpoint.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}
