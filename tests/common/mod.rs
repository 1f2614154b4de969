#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use lingo_backend::curriculum::CurriculumRegistry;
use lingo_backend::db::config::DbConfig;
use lingo_backend::db::DatabaseProxy;
use lingo_backend::memory::SchedulerPolicy;
use lingo_backend::state::AppState;

/// A migrated database in its own temp directory. Keep the `TempDir` alive
/// for as long as the proxy is used.
pub async fn test_proxy() -> (TempDir, Arc<DatabaseProxy>) {
    test_proxy_with(|_| {}).await
}

pub async fn test_proxy_with(configure: impl FnOnce(&mut DbConfig)) -> (TempDir, Arc<DatabaseProxy>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut config = DbConfig::for_sqlite_file(dir.path().join("lingo-test.db"));
    configure(&mut config);
    let proxy = DatabaseProxy::connect(config)
        .await
        .expect("open test database");
    (dir, Arc::new(proxy))
}

pub fn curricula() -> Arc<CurriculumRegistry> {
    Arc::new(CurriculumRegistry::builtin().expect("builtin curricula"))
}

pub async fn create_test_app() -> (TempDir, Router) {
    let (dir, proxy) = test_proxy().await;
    let state = AppState::new(Some(proxy), curricula(), SchedulerPolicy::default());
    (dir, lingo_backend::build_app(state))
}

pub fn create_app_without_db() -> Router {
    let state = AppState::new(None, curricula(), SchedulerPolicy::default());
    lingo_backend::build_app(state)
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
