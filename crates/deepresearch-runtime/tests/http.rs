use std::collections::HashMap;
use std::sync::Arc;

use axum_test::TestServer;
use deepresearch_core::outputs::build_object_store;
use deepresearch_core::remote::{HttpRuntimeInvoker, invoke_runtime};
use deepresearch_core::secrets::UnavailableSecretStore;
use deepresearch_core::{
    OutputUploader, ResearchRuntime, RuntimeConfig, SecretsLoader, StaticSearch,
};
use deepresearch_runtime::{AppState, build_router};
use serde_json::{Value, json};
use tempfile::TempDir;

struct Fixture {
    work: TempDir,
    store: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            work: TempDir::new().unwrap(),
            store: TempDir::new().unwrap(),
        }
    }

    async fn state(&self, max_sessions: &str) -> AppState {
        let vars: HashMap<String, String> = HashMap::from([
            (
                "DEEPRESEARCH_WORKING_DIR".to_string(),
                self.work.path().display().to_string(),
            ),
            ("DEEPRESEARCH_OUTPUT_STORE".to_string(), "fs".to_string()),
            (
                "DEEPRESEARCH_OUTPUT_DIR".to_string(),
                self.store.path().display().to_string(),
            ),
            ("DEEPRESEARCH_SEARCH_INTERVAL_MS".to_string(), "0".to_string()),
            ("OUTPUTS_BUCKET_NAME".to_string(), "outputs".to_string()),
            (
                "DEEPRESEARCH_MAX_CONCURRENT_SESSIONS".to_string(),
                max_sessions.to_string(),
            ),
        ]);
        let config = RuntimeConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let store = build_object_store(&config.outputs.store, None).await;
        let uploader = OutputUploader::new(store, config.outputs.bucket.clone());
        let secrets = SecretsLoader::new(
            config.secrets_config.clone(),
            Arc::new(UnavailableSecretStore),
        )
        .without_env_export();
        let runtime = ResearchRuntime::new(config, secrets, uploader)
            .with_search(Arc::new(StaticSearch::new("internet_search")));
        AppState::new(runtime)
    }
}

#[tokio::test]
async fn ping_reports_healthy() {
    let fixture = Fixture::new();
    let server = TestServer::new(build_router(fixture.state("1").await)).unwrap();

    let response = server.get("/ping").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>(), json!({ "status": "Healthy" }));
}

#[tokio::test]
async fn invocation_uses_header_session_for_uploads() {
    let fixture = Fixture::new();
    let server = TestServer::new(build_router(fixture.state("1").await)).unwrap();

    let response = server
        .post("/invocations")
        .add_header("x-amzn-bedrock-agentcore-runtime-session-id", "sess-http")
        .json(&json!({ "prompt": "Offshore wind", "session_id": "ignored" }))
        .await;

    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    let result = body["result"].as_str().unwrap();
    assert!(result.starts_with("# Research Report: Offshore wind"));
    let uploaded = body["outputs"]["uploaded"].as_array().unwrap();
    assert!(uploaded.contains(&json!("s3://outputs/sess-http/final/research_report.md")));
    assert!(
        fixture
            .store
            .path()
            .join("outputs/sess-http/final/research_report.md")
            .is_file()
    );
    assert!(!fixture.store.path().join("outputs/ignored").exists());
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let fixture = Fixture::new();
    let server = TestServer::new(build_router(fixture.state("1").await)).unwrap();

    let response = server.post("/invocations").text("{\"prompt\": ").await;
    assert_eq!(response.status_code(), 400);
    let body = response.json::<Value>();
    assert!(body["error"].as_str().unwrap().contains("invalid JSON"));
}

#[tokio::test]
async fn saturated_runtime_answers_429() {
    let fixture = Fixture::new();
    let state = fixture.state("1").await;
    let held = state.session_permits.clone().try_acquire_owned().unwrap();
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server
        .post("/invocations")
        .json(&json!({ "prompt": "Busy" }))
        .await;
    assert_eq!(response.status_code(), 429);

    drop(held);
    let response = server
        .post("/invocations")
        .json(&json!({ "prompt": "Busy" }))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn http_invoker_round_trips_through_a_live_server() {
    let fixture = Fixture::new();
    let router = build_router(fixture.state("1").await);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let invoker = HttpRuntimeInvoker::new(format!("http://{addr}/")).unwrap();
    let (session_id, response) = invoke_runtime(&invoker, "Tidal power", None)
        .await
        .unwrap();

    assert!(session_id.starts_with("session-"));
    assert!(
        response["result"]
            .as_str()
            .unwrap()
            .contains("Tidal power")
    );
    assert!(
        fixture
            .store
            .path()
            .join("outputs")
            .join(&session_id)
            .join("final/research_report.md")
            .is_file()
    );
    server.abort();
}
