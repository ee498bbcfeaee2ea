#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use beacon_api::app::build_app;
use beacon_api::config::ServerConfig;
use beacon_api::state::AppState;
use beacon_db::cache::{CachedEventLog, ResponseCache, TtlCache};
use beacon_db::{EventLogStore, InMemoryStore};
use beacon_events::EventBus;
use beacon_worker::{Engine, EngineConfig};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
///
/// The embedded engine is off so no scheduler or retention loop races the
/// assertions; the fire queue still runs.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        run_engine: false,
        log_cache_enabled: true,
        log_cache_ttl_secs: 600,
        log_cache_max_entries: 1024,
    }
}

/// A router over an in-memory store, plus handles to inspect it.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub engine: Engine,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application the way `main.rs` does, on an in-memory
/// store with the log cache enabled.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let cache: Arc<dyn ResponseCache> = Arc::new(TtlCache::new());
    let logs: Arc<dyn EventLogStore> = Arc::new(CachedEventLog::new(
        store.clone(),
        Some(cache),
        Duration::from_secs(config.log_cache_ttl_secs),
    ));

    let engine_config = EngineConfig {
        // Wide bucket so repeated test fires in one test always collide.
        fire_bucket_secs: 3600,
        queue_workers: 1,
        queue_base_backoff: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let engine = Engine::new(
        engine_config,
        store.clone(),
        Arc::clone(&logs),
        Arc::new(EventBus::default()),
    );

    let state = AppState::new(config, &engine, store.clone(), logs);
    TestApp {
        router: build_app(state),
        store,
        engine,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn patch_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::PATCH, uri, Some(body)).await
}

/// Read the whole response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create a trigger through the API and return its `data` object.
pub async fn create_trigger(app: Router, body: serde_json::Value) -> serde_json::Value {
    let response = post_json(app, "/api/v1/triggers", body).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await["data"].clone()
}
