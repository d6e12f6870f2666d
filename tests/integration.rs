//! Integration tests that run the API in-process
//!
//! These tests exercise the API handlers directly using axum-test against a
//! manager wired to the scripted repository and fake backend.

mod common;

use axum_test::TestServer;
use common::{FakeBackend, ScriptedRepository, build_manager};
use model_manager::{
    api::routes::{AppState, create_router},
    metrics,
};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

// Global metrics handle - only initialize once per test process
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| metrics::setup_metrics().expect("Failed to setup metrics"))
        .clone()
}

/// Helper to create a test server with the API
async fn create_test_server() -> (TestServer, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let manager = build_manager(
        &temp_dir,
        Arc::new(ScriptedRepository::new()),
        Arc::new(FakeBackend::default()),
    )
    .await;

    let state = AppState {
        manager,
        prometheus_handle: get_metrics_handle(),
    };

    let app = create_router(state);
    let server = TestServer::try_new(app).expect("Failed to create test server");

    (server, temp_dir)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
    assert_eq!(body["loaded_models"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/metrics").await;

    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_list_models() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models").await;
    assert_eq!(response.status_code(), 200);

    let body: Vec<serde_json::Value> = response.json();
    assert_eq!(body.len(), 10);
    assert!(body.iter().all(|m| m["status"] == "available"));
    // Lightweight tier sorts first
    assert_eq!(body[0]["performance_tier"], "lightweight");
}

#[tokio::test]
async fn test_list_models_with_filters() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server
        .get("/models")
        .add_query_param("category", "conversational")
        .await;
    assert_eq!(response.status_code(), 200);

    let body: Vec<serde_json::Value> = response.json();
    assert!(!body.is_empty());
    assert!(body.iter().all(|m| m["category"] == "conversational"));

    let response = server
        .get("/models")
        .add_query_param("category", "programming")
        .add_query_param("tier", "powerful")
        .await;
    let body: Vec<serde_json::Value> = response.json();
    assert!(
        body.iter()
            .all(|m| m["category"] == "programming" && m["performance_tier"] == "powerful")
    );
}

#[tokio::test]
async fn test_list_models_rejects_unknown_tier() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models").add_query_param("tier", "huge").await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("huge"));
}

#[tokio::test]
async fn test_get_model() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models/gpt2").await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], "gpt2");
    assert_eq!(body["repository"], "gpt2");
    assert_eq!(body["status"], "available");
    assert!(body["local_path"].is_null());
}

#[tokio::test]
async fn test_get_nonexistent_model() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models/nonexistent").await;

    assert_eq!(response.status_code(), 404);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("nonexistent"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_validate_before_download_conflicts() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/gpt2/validate").await;

    assert_eq!(response.status_code(), 409);
}

#[tokio::test]
async fn test_load_before_download_conflicts() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/gpt2/load").await;

    assert_eq!(response.status_code(), 409);
}

#[tokio::test]
async fn test_progress_without_download() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models/gpt2/progress").await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_download_endpoint() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/gpt2/download").await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["model_id"], "gpt2");
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "downloaded");
    assert!(body.get("reason").is_none());

    let model: serde_json::Value = server.get("/models/gpt2").await.json();
    assert_eq!(model["download_progress"], 100.0);
    assert!(model["local_path"].is_string());
}

#[tokio::test]
async fn test_model_lifecycle_over_http() {
    let (server, _temp_dir) = create_test_server().await;

    server.post("/models/gpt2/download").await.assert_status_ok();

    let response = server.post("/models/gpt2/validate").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);

    let response = server.post("/models/gpt2/load").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "loaded");

    let loaded: serde_json::Value = server.get("/models/loaded").await.json();
    assert_eq!(loaded["count"], 1);
    assert_eq!(loaded["models"][0], "gpt2");

    let response = server.post("/models/gpt2/benchmark").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert!(body["sample"]["inference_speed"].is_number());
    assert_eq!(body["sample"]["device"], "cpu");

    let performance: serde_json::Value = server.get("/models/gpt2/performance").await.json();
    assert_eq!(performance["samples"].as_array().unwrap().len(), 1);

    let response = server.post("/models/gpt2/unload").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "downloaded");

    let health: serde_json::Value = server.get("/health").await.json();
    assert_eq!(health["loaded_models"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_benchmark_not_loaded_returns_empty_sample() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/gpt2/benchmark").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert!(body["sample"].is_null());
}

#[tokio::test]
async fn test_unload_unknown_model() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/nonexistent/unload").await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_unload_not_loaded() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.post("/models/gpt2/unload").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_status_summary_endpoint() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models/status").await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["total_models"], 10);
    assert_eq!(body["loaded_models"], 0);
    assert_eq!(body["status_counts"]["available"], 10);
    assert_eq!(body["hardware_tier"], "lightweight");
}

#[tokio::test]
async fn test_recommendations_endpoint() {
    let (server, _temp_dir) = create_test_server().await;

    let response = server.get("/models/recommendations").await;
    assert_eq!(response.status_code(), 200);

    let body: Vec<serde_json::Value> = response.json();
    assert!(!body.is_empty() && body.len() <= 5);
    assert_eq!(body[0]["id"], "gpt2");
}

#[tokio::test]
async fn test_shutdown_signal_cancels_pending_download() {
    use model_manager::ModelStatus;
    use std::time::Duration;

    let temp_dir = TempDir::new().unwrap();
    let manager = build_manager(
        &temp_dir,
        Arc::new(ScriptedRepository::with_delay(Duration::from_secs(30))),
        Arc::new(FakeBackend::default()),
    )
    .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

    let state = AppState {
        manager: manager.clone(),
        prometheus_handle: get_metrics_handle(),
    };
    let server = tokio::spawn(model_manager::api::serve(
        listener,
        state,
        async move {
            let _ = signal_rx.await;
        },
        Duration::from_secs(10),
    ));

    let request = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{}/models/gpt2/download", addr))
            .send()
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        manager.get("gpt2").await.unwrap().status,
        ModelStatus::Downloading
    );
    signal_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server kept draining after shutdown")
        .unwrap()
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "error");
    assert_eq!(body["reason"], "download cancelled");

    let info = manager.get("gpt2").await.unwrap();
    assert_eq!(info.status, ModelStatus::Error);
    assert_eq!(info.validation_status.as_deref(), Some("download cancelled"));
    assert!(info.local_path.is_none());
}

// ========================================
// Config loading with real environment
// ========================================

#[test]
#[serial_test::serial]
fn test_config_load_with_env_overrides() {
    use model_manager::config::ManagerConfig;
    use std::env;

    // Set environment variables (unsafe in edition 2024)
    unsafe {
        env::set_var("MODEL_MANAGER_API_PORT", "9999");
        env::set_var("MODEL_MANAGER_MODELS_DIR", "/tmp/mm-models");
        env::set_var("MODEL_MANAGER_EVICTION_INTERVAL", "42");
        env::set_var("MODEL_MANAGER_ENABLE_GPU", "0");
    }

    let config = ManagerConfig::load(None);

    unsafe {
        env::remove_var("MODEL_MANAGER_API_PORT");
        env::remove_var("MODEL_MANAGER_MODELS_DIR");
        env::remove_var("MODEL_MANAGER_EVICTION_INTERVAL");
        env::remove_var("MODEL_MANAGER_ENABLE_GPU");
    }

    let config = config.expect("Failed to load config");
    assert_eq!(config.api_port, 9999);
    assert_eq!(config.models_dir.to_string_lossy(), "/tmp/mm-models");
    assert_eq!(config.eviction_interval_secs, 42);
    assert!(!config.enable_gpu);
}

#[test]
#[serial_test::serial]
fn test_config_file_then_env() {
    use model_manager::config::ManagerConfig;
    use std::env;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manager.toml");
    std::fs::write(
        &path,
        r#"
        api_port = 8100
        idle_threshold_secs = 120
        max_loaded_models = 5
        "#,
    )
    .unwrap();

    unsafe {
        env::set_var("MODEL_MANAGER_IDLE_THRESHOLD", "0");
    }

    let config = ManagerConfig::load(Some(path));

    unsafe {
        env::remove_var("MODEL_MANAGER_IDLE_THRESHOLD");
    }

    let config = config.expect("Failed to load config");
    assert_eq!(config.api_port, 8100);
    assert_eq!(config.max_loaded_models, 5);
    // Environment wins over the file
    assert_eq!(config.idle_threshold_secs, 0);
}

#[test]
#[serial_test::serial]
fn test_config_load_rejects_bad_env() {
    use model_manager::config::ManagerConfig;
    use std::env;

    unsafe {
        env::set_var("MODEL_MANAGER_API_PORT", "not-a-port");
    }

    let result = ManagerConfig::load(None);

    unsafe {
        env::remove_var("MODEL_MANAGER_API_PORT");
    }

    assert!(result.is_err());
}
