//! Endpoint pool of a single route.
//!
//! # Responsibilities
//! - Hold the live endpoint list and the backend's pool-level settings
//! - Add and remove individual endpoints without disturbing the others
//! - Reconcile the live list against a desired set of server URLs
//!
//! # Design Decisions
//! - Every mutation publishes a new list with one `ArcSwap` store; the
//!   serving path only ever loads a consistent snapshot
//! - Sync applies additions before removals so a pool that is being
//!   repointed never goes through an empty state

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use url::Url;

use crate::load_balancer::endpoint::endpoint_key;
use crate::load_balancer::{Endpoint, EndpointGuard, LoadBalancer, RoundRobin};
use crate::model::BackendSettings;

/// Errors from single-endpoint pool mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("endpoint {0} is already in the pool")]
    Duplicate(String),

    #[error("endpoint {0} is not in the pool")]
    Missing(String),
}

/// Endpoints to add and remove to turn `live` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDiff {
    pub add: Vec<Url>,
    pub remove: Vec<Url>,
}

impl EndpointDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Symmetric difference between the live and desired endpoint sets.
///
/// Order of `desired` is preserved for additions and duplicates collapse.
pub fn diff_endpoints(live: &[Url], desired: &[Url]) -> EndpointDiff {
    let live_keys: HashSet<String> = live.iter().map(endpoint_key).collect();
    let desired_keys: HashSet<String> = desired.iter().map(endpoint_key).collect();

    let mut seen = HashSet::new();
    let add = desired
        .iter()
        .filter(|u| {
            let key = endpoint_key(u);
            !live_keys.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect();
    let remove = live
        .iter()
        .filter(|u| !desired_keys.contains(&endpoint_key(u)))
        .cloned()
        .collect();

    EndpointDiff { add, remove }
}

/// Outcome of a [`EndpointPool::sync`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<Url>,
    pub removed: Vec<Url>,
    pub failed: Vec<(Url, PoolError)>,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Live endpoints of one route plus the settings used to dial them.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    settings: ArcSwap<BackendSettings>,
    balancer: Box<dyn LoadBalancer>,
}

impl EndpointPool {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
            settings: ArcSwap::from_pointee(settings),
            balancer: Box::new(RoundRobin::new()),
        }
    }

    /// Current endpoint snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.endpoints.load_full()
    }

    /// Current endpoint URLs, in pool order.
    pub fn endpoints(&self) -> Vec<Url> {
        self.endpoints.load().iter().map(|e| e.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> Arc<BackendSettings> {
        self.settings.load_full()
    }

    pub fn update_settings(&self, settings: BackendSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn add_endpoint(&self, url: &Url) -> Result<(), PoolError> {
        let key = endpoint_key(url);
        let current = self.endpoints.load_full();
        if current.iter().any(|e| e.key() == key) {
            return Err(PoolError::Duplicate(key));
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(Endpoint::new(url.clone())));
        self.endpoints.store(Arc::new(next));
        Ok(())
    }

    pub fn remove_endpoint(&self, url: &Url) -> Result<Arc<Endpoint>, PoolError> {
        let key = endpoint_key(url);
        let current = self.endpoints.load_full();
        let position = current
            .iter()
            .position(|e| e.key() == key)
            .ok_or(PoolError::Missing(key))?;
        let mut next: Vec<Arc<Endpoint>> = current.iter().cloned().collect();
        let removed = next.remove(position);
        self.endpoints.store(Arc::new(next));
        Ok(removed)
    }

    /// Pick the next endpoint for a request.
    pub fn next_endpoint(&self) -> Option<EndpointGuard> {
        let endpoints = self.endpoints.load();
        self.balancer
            .next_endpoint(&endpoints)
            .map(|endpoint| endpoint.acquire())
    }

    /// Converge the pool on `desired`, touching only the difference.
    pub fn sync(&self, desired: &[Url]) -> SyncReport {
        let diff = diff_endpoints(&self.endpoints(), desired);
        let mut report = SyncReport::default();

        for url in diff.add {
            match self.add_endpoint(&url) {
                Ok(()) => report.added.push(url),
                Err(e) => {
                    tracing::warn!(endpoint = %url, error = %e, "Failed to add endpoint");
                    report.failed.push((url, e));
                }
            }
        }
        for url in diff.remove {
            match self.remove_endpoint(&url) {
                Ok(_) => report.removed.push(url),
                Err(e) => {
                    tracing::warn!(endpoint = %url, error = %e, "Failed to remove endpoint");
                    report.failed.push((url, e));
                }
            }
        }
        report
    }

    /// In-flight requests per endpoint key.
    pub fn load(&self) -> HashMap<String, usize> {
        self.endpoints
            .load()
            .iter()
            .map(|e| (e.key().to_string(), e.active_requests()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn test_diff_is_symmetric_difference() {
        let live = urls(&["http://a:80", "http://b:80", "http://c:80"]);
        let desired = urls(&["http://b:80", "http://c:80", "http://d:80"]);
        let diff = diff_endpoints(&live, &desired);
        assert_eq!(diff.add, urls(&["http://d:80"]));
        assert_eq!(diff.remove, urls(&["http://a:80"]));
    }

    #[test]
    fn test_diff_collapses_duplicates() {
        let desired = urls(&["http://a:80", "http://a", "http://b"]);
        let diff = diff_endpoints(&[], &desired);
        assert_eq!(diff.add.len(), 2);
    }

    #[test]
    fn test_sync_keeps_unchanged_endpoints() {
        let pool = EndpointPool::new(BackendSettings::default());
        pool.sync(&urls(&["http://a:80", "http://b:80", "http://c:80"]));
        let before = pool.snapshot();
        let b_before = before.iter().find(|e| e.url.host_str() == Some("b")).unwrap().clone();

        let report = pool.sync(&urls(&["http://b:80", "http://c:80", "http://d:80"]));
        assert_eq!(report.added, urls(&["http://d:80"]));
        assert_eq!(report.removed, urls(&["http://a:80"]));
        assert!(report.failed.is_empty());

        let after = pool.snapshot();
        let b_after = after.iter().find(|e| e.url.host_str() == Some("b")).unwrap();
        assert!(Arc::ptr_eq(&b_before, b_after));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let pool = EndpointPool::new(BackendSettings::default());
        let desired = urls(&["http://a:80"]);
        assert!(pool.sync(&desired).changed());
        assert!(!pool.sync(&desired).changed());
    }

    #[test]
    fn test_add_duplicate_and_remove_missing() {
        let pool = EndpointPool::new(BackendSettings::default());
        let url = Url::parse("http://a:80").unwrap();
        pool.add_endpoint(&url).unwrap();
        assert!(matches!(pool.add_endpoint(&url), Err(PoolError::Duplicate(_))));
        pool.remove_endpoint(&url).unwrap();
        assert!(matches!(pool.remove_endpoint(&url), Err(PoolError::Missing(_))));
    }

    #[test]
    fn test_in_flight_request_survives_removal() {
        let pool = EndpointPool::new(BackendSettings::default());
        pool.sync(&urls(&["http://a:80"]));
        let guard = pool.next_endpoint().unwrap();
        pool.sync(&[]);
        assert!(pool.is_empty());
        assert_eq!(guard.active_requests(), 1);
    }
}
