use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::model::{BackendSettings, FrontendSettings, Listener};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub revision: u64,
    pub hosts: usize,
    pub routes: usize,
    pub listeners: usize,
}

#[derive(Debug, Serialize)]
pub struct HostStatus {
    pub name: String,
    /// False for routers that exist only because a route names the host.
    pub declared: bool,
    pub default: bool,
    pub has_key_pair: bool,
    pub frontends: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub frontend: String,
    pub host: String,
    pub rule: String,
    pub backend: String,
    pub settings: FrontendSettings,
    pub middlewares: Vec<String>,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub active_requests: usize,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub frontends: Vec<String>,
    pub settings: BackendSettings,
    pub endpoints: Vec<EndpointStatus>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let routers = state.topology.routers();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        revision: state.topology.revision(),
        hosts: routers.len(),
        routes: routers.iter().map(|r| r.routes().len()).sum(),
        listeners: state.topology.listeners().len(),
    })
}

pub async fn get_hosts(State(state): State<AdminState>) -> Json<Vec<HostStatus>> {
    let hosts = state
        .topology
        .routers()
        .into_iter()
        .map(|router| {
            let settings = router.settings();
            HostStatus {
                name: router.name().to_string(),
                declared: settings.is_some(),
                default: settings.as_ref().is_some_and(|s| s.default),
                has_key_pair: settings.as_ref().is_some_and(|s| s.key_pair.is_some()),
                frontends: router
                    .routes()
                    .iter()
                    .map(|r| r.frontend_id().to_string())
                    .collect(),
            }
        })
        .collect();
    Json(hosts)
}

pub async fn get_listeners(State(state): State<AdminState>) -> Json<Vec<Listener>> {
    Json(state.topology.listeners())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let mut routes = Vec::new();
    for router in state.topology.routers() {
        for route in router.routes().iter() {
            routes.push(RouteStatus {
                frontend: route.frontend_id().to_string(),
                host: router.name().to_string(),
                rule: route.rule().to_string(),
                backend: route.backend_id().to_string(),
                settings: route.settings().as_ref().clone(),
                middlewares: route.chain().ids(),
                endpoints: route.pool().endpoints().iter().map(|u| u.to_string()).collect(),
            });
        }
    }
    Json(routes)
}

/// Backends as seen through the pools of the routes bound to them.
pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let mut backends: BTreeMap<String, BackendStatus> = BTreeMap::new();
    for router in state.topology.routers() {
        for route in router.routes().iter() {
            let id = route.backend_id().to_string();
            let entry = backends.entry(id.clone()).or_insert_with(|| BackendStatus {
                id,
                frontends: Vec::new(),
                settings: route.pool().settings().as_ref().clone(),
                endpoints: Vec::new(),
            });
            entry.frontends.push(route.frontend_id().to_string());
            for endpoint in route.pool().snapshot().iter() {
                let url = endpoint.url.to_string();
                match entry.endpoints.iter_mut().find(|e| e.url == url) {
                    Some(existing) => existing.active_requests += endpoint.active_requests(),
                    None => entry.endpoints.push(EndpointStatus {
                        url,
                        active_requests: endpoint.active_requests(),
                    }),
                }
            }
        }
    }
    let mut list: Vec<BackendStatus> = backends.into_values().collect();
    for backend in &mut list {
        backend.frontends.sort();
    }
    Json(list)
}
