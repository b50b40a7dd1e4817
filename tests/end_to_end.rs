//! Store to topology, through the supervisor.

use std::sync::Arc;

use dynproxy::engine::keys::{BackendKey, FrontendKey, ServerKey};
use dynproxy::model::{Middleware, Server};
use dynproxy::store::MemoryStore;
use dynproxy::Error;

mod common;

#[tokio::test]
async fn test_backend_server_frontend_scenario() {
    let h = common::start(Arc::new(MemoryStore::new()));

    common::add_backend(&h.engine, "b1", &[("s1", "http://localhost:5000")]).await;
    common::add_frontend(&h.engine, "f1", "b1", r#"Path("/hello")"#).await;

    common::eventually(|| h.topology.resolve("example.com", "/hello").is_some()).await;
    assert_eq!(
        common::endpoints(&h.topology, "f1"),
        vec!["http://localhost:5000/"]
    );

    h.engine
        .delete_server(&ServerKey::new("b1", "s1"))
        .await
        .unwrap();
    common::eventually(|| common::endpoints(&h.topology, "f1").is_empty()).await;

    h.engine
        .upsert_server(
            &BackendKey::new("b1"),
            &Server::new("s2", "http://localhost:5001").unwrap(),
            None,
        )
        .await
        .unwrap();
    common::eventually(|| {
        common::endpoints(&h.topology, "f1") == vec!["http://localhost:5001/"]
    })
    .await;
    let route = h.topology.resolve("example.com", "/hello").unwrap();
    assert_eq!(route.pool().len(), 1);

    h.engine
        .delete_frontend(&FrontendKey::new("f1"))
        .await
        .unwrap();
    h.engine.delete_backend(&BackendKey::new("b1")).await.unwrap();
    common::eventually(|| h.topology.find_route("f1").is_none()).await;

    let reconciler = h.stop().await;
    assert_eq!(reconciler.revision(), reconciler.topology().revision());
}

#[tokio::test]
async fn test_existing_state_is_bootstrapped() {
    let store = Arc::new(MemoryStore::new());
    let engine = dynproxy::Engine::new(store.clone(), "/it", None);
    common::add_backend(
        &engine,
        "b1",
        &[("s1", "http://10.0.0.1:80"), ("s2", "http://10.0.0.2:80")],
    )
    .await;
    common::add_frontend(&engine, "f1", "b1", r#"Host("a.com") && PathPrefix("/")"#).await;
    engine
        .upsert_middleware(
            &FrontendKey::new("f1"),
            &Middleware::new("auth", 10, "auth", serde_json::json!({"realm": "x"})).unwrap(),
            None,
        )
        .await
        .unwrap();

    let h = common::start(store.clone());
    common::eventually(|| h.topology.revision() == store.revision()).await;

    let route = h.topology.resolve("A.com:8080", "/anything").unwrap();
    assert_eq!(route.chain().ids(), vec!["auth"]);
    assert_eq!(
        common::endpoints(&h.topology, "f1"),
        vec!["http://10.0.0.1/", "http://10.0.0.2/"]
    );
    h.stop().await;
}

#[tokio::test]
async fn test_endpoint_set_reconciliation_keeps_unchanged() {
    let h = common::start(Arc::new(MemoryStore::new()));
    common::add_backend(
        &h.engine,
        "b1",
        &[
            ("a", "http://a.internal:80"),
            ("b", "http://b.internal:80"),
            ("c", "http://c.internal:80"),
        ],
    )
    .await;
    common::add_frontend(&h.engine, "f1", "b1", r#"PathPrefix("/")"#).await;
    common::eventually(|| common::endpoints(&h.topology, "f1").len() == 3).await;

    let route = h.topology.find_route("f1").unwrap();
    let guard = route.pool().next_endpoint().unwrap();
    let held = guard.key().to_string();

    let key = BackendKey::new("b1");
    h.engine
        .delete_server(&ServerKey::new("b1", "a"))
        .await
        .unwrap();
    h.engine
        .upsert_server(&key, &Server::new("d", "http://d.internal:80").unwrap(), None)
        .await
        .unwrap();

    common::eventually(|| {
        common::endpoints(&h.topology, "f1")
            == vec![
                "http://b.internal/",
                "http://c.internal/",
                "http://d.internal/",
            ]
    })
    .await;

    // The guard keeps counting against its endpoint whether or not it was removed.
    assert_eq!(guard.active_requests(), 1);
    if held != "http://a.internal" {
        assert_eq!(route.pool().load()[&held], 1);
    }
    drop(guard);
    h.stop().await;
}

#[tokio::test]
async fn test_direct_mutations_enforce_references() {
    let h = common::start(Arc::new(MemoryStore::new()));

    let err = h
        .engine
        .upsert_frontend(
            &dynproxy::model::Frontend::new("f1", "nope", r#"Path("/")"#, Default::default())
                .unwrap(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    common::add_backend(&h.engine, "b1", &[]).await;
    common::add_frontend(&h.engine, "f1", "b1", r#"Path("/")"#).await;
    common::add_frontend(&h.engine, "f2", "b1", r#"Path("/two")"#).await;
    let err = h
        .engine
        .delete_backend(&BackendKey::new("b1"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "backend 'b1' is in use by frontends: f1, f2");

    common::eventually(|| h.topology.find_route("f2").is_some()).await;
    h.stop().await;
}

#[tokio::test]
async fn test_store_outage_is_survived() {
    let h = common::start(Arc::new(MemoryStore::new()));
    common::add_backend(&h.engine, "b1", &[("s1", "http://10.0.0.1:80")]).await;
    common::add_frontend(&h.engine, "f1", "b1", r#"Path("/")"#).await;
    common::eventually(|| common::endpoints(&h.topology, "f1").len() == 1).await;

    for round in 0..3 {
        h.store.disconnect_watchers();
        let id = format!("s{}", round + 2);
        let url = format!("http://10.0.0.{}:80", round + 2);
        h.engine
            .upsert_server(&BackendKey::new("b1"), &Server::new(id, url).unwrap(), None)
            .await
            .unwrap();
    }
    common::eventually(|| common::endpoints(&h.topology, "f1").len() == 4).await;
    assert_eq!(h.topology.revision(), h.store.revision());
    h.stop().await;
}
