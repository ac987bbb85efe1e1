//! Integration tests for the exporter HTTP endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use oomkill_agent_lib::{
    api::{create_router, AppState},
    health::components,
    HealthRegistry, LabelSchema, OomKillCounter, WorkloadMetadata,
};
use prometheus::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>, OomKillCounter) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::KMSG_SOURCE).await;
    health_registry.register(components::RUNTIME).await;

    let registry = Registry::new();
    let counter = OomKillCounter::new(&registry, Arc::new(LabelSchema::default())).unwrap();

    let state = Arc::new(AppState::new(health_registry, registry));
    let router = create_router(state.clone());

    (router, state, counter)
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _counter) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["runtime"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_runtime_degraded() {
    let (app, state, _counter) = setup_test_app().await;

    state
        .health_registry
        .report_failure(components::RUNTIME, "connection refused")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["runtime"]["message"],
        "connection refused"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_log_source_closed() {
    let (app, state, _counter) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::KMSG_SOURCE, "kernel log source closed")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_startup() {
    let (app, _state, _counter) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _counter) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], true);
    assert!(readiness.get("reason").is_none());
}

#[tokio::test]
async fn test_metrics_exposes_oomkill_counter() {
    let (app, _state, counter) = setup_test_app().await;

    let mut labels = HashMap::new();
    labels.insert("io.kubernetes.container.name".to_string(), "app".to_string());
    labels.insert("io.kubernetes.pod.namespace".to_string(), "default".to_string());
    let metadata = WorkloadMetadata::new("abc123def456", labels);
    counter.record(&metadata).unwrap();
    counter.record(&metadata).unwrap();

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    assert!(body.contains("# HELP klog_pod_oomkill Extract metrics for OOMKilled pods from kernel log"));
    assert!(body.contains("# TYPE klog_pod_oomkill counter"));
    assert!(body.contains(
        r#"klog_pod_oomkill{container_name="app",namespace="default",pod_name="",pod_uid=""} 2"#
    ));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _state, _counter) = setup_test_app().await;

    let (status, _body) = get(app, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
