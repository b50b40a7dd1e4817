//! Read-only admin API over the live topology.
//!
//! # Responsibilities
//! - Render hosts, listeners, routes and backends as JSON
//! - Guard every route with a bearer token
//!
//! # Design Decisions
//! - Handlers only read the topology; all writes go through the store
//! - The server stops with the shared shutdown signal

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::ShutdownSignal;
use crate::proxy::Topology;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub topology: Arc<Topology>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(topology: Arc<Topology>, api_key: &str) -> Self {
        Self {
            topology,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/hosts", get(get_hosts))
        .route("/admin/listeners", get(get_listeners))
        .route("/admin/routes", get(get_routes))
        .route("/admin/backends", get(get_backends))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    let app = setup_admin_router(state);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}
