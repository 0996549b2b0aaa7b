use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deepresearch_core::memory::{ConversationMemory, ConversationTurn, MemoryKey, TurnRole};
use deepresearch_core::search::DynSearchBackend;
use deepresearch_core::secrets::{StaticSecretStore, UnavailableSecretStore};
use deepresearch_core::{
    InvocationError, InvocationLog, InvocationRequest, InvocationResponse, OutputUploader,
    ResearchRuntime, RuntimeConfig, SearchBackend, SecretsLoader, SessionContext, StaticSearch,
    TodoStatus, invoke_with_retry,
};
use deepresearch_core::outputs::{FilesystemObjectStore, build_object_store};
use deepresearch_core::retry::RetryPolicy;
use tempfile::TempDir;

struct Workspace {
    work: TempDir,
    store: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            work: TempDir::new().unwrap(),
            store: TempDir::new().unwrap(),
        }
    }

    fn config(&self, extra: &[(&str, &str)]) -> RuntimeConfig {
        let mut vars: HashMap<String, String> = HashMap::from([
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
        ]);
        for (key, value) in extra {
            vars.insert(key.to_string(), value.to_string());
        }
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned()).expect("config")
    }

    async fn runtime(&self, extra: &[(&str, &str)]) -> ResearchRuntime {
        let config = self.config(extra);
        let store = build_object_store(&config.outputs.store, None).await;
        let uploader = OutputUploader::new(store, config.outputs.bucket.clone());
        let secrets = SecretsLoader::new(config.secrets_config.clone(), Arc::new(UnavailableSecretStore))
            .without_env_export();
        ResearchRuntime::new(config, secrets, uploader)
            .with_search(Arc::new(StaticSearch::new("internet_search")))
    }

    fn stored(&self, relative: &str) -> bool {
        self.store.path().join(relative).is_file()
    }
}

struct FailingSearch;

#[async_trait]
impl SearchBackend for FailingSearch {
    fn name(&self) -> &str {
        "internet_search"
    }

    async fn search(&self, _query: &str) -> Result<String, InvocationError> {
        Err(InvocationError::other("search backend returned 401 Unauthorized"))
    }
}

/// Conversation store that records every key it is asked about.
#[derive(Default)]
struct RecordingMemory {
    seeded: Vec<ConversationTurn>,
    appended: Mutex<Vec<(MemoryKey, Vec<ConversationTurn>)>>,
    queried: Mutex<Vec<MemoryKey>>,
}

#[async_trait]
impl ConversationMemory for RecordingMemory {
    async fn append(&self, key: &MemoryKey, turns: Vec<ConversationTurn>) -> anyhow::Result<()> {
        self.appended.lock().unwrap().push((key.clone(), turns));
        Ok(())
    }

    async fn recent(&self, key: &MemoryKey, _limit: usize) -> anyhow::Result<Vec<ConversationTurn>> {
        self.queried.lock().unwrap().push(key.clone());
        Ok(self.seeded.clone())
    }
}

fn report_of(response: &InvocationResponse) -> &str {
    match response {
        InvocationResponse::Success { result, .. } => result,
        InvocationResponse::Failure { error } => panic!("invocation failed: {error}"),
    }
}

#[tokio::test]
async fn invocation_writes_report_and_uploads_outputs() {
    let workspace = Workspace::new();
    let runtime = workspace
        .runtime(&[("OUTPUTS_BUCKET_NAME", "research-outputs")])
        .await;

    let response = runtime
        .invoke(
            InvocationRequest::new("Solid state batteries"),
            Some(&SessionContext::with_session_id("sess-1")),
        )
        .await;

    let report = report_of(&response);
    assert!(report.starts_with("# Research Report: Solid state batteries"));
    assert!(report.contains("## References"));
    assert!(report.contains("1. https://example.com/industry-overview"));
    assert!(workspace.work.path().join("sess-1/research_report.md").is_file());
    assert!(!workspace.work.path().join("research_report.md").exists());

    let InvocationResponse::Success { outputs, .. } = &response else {
        unreachable!()
    };
    // three topics with two sources each, three findings files and the report
    assert_eq!(outputs.uploaded.len(), 10);
    assert!(outputs.failed.is_empty());
    assert!(outputs
        .uploaded
        .contains(&"s3://research-outputs/sess-1/final/research_report.md".to_string()));
    assert!(outputs.uploaded.contains(
        &"s3://research-outputs/sess-1/intermediate/solid_state_batteries_overview/source_2.md"
            .to_string()
    ));
    assert!(workspace.stored("research-outputs/sess-1/final/research_findings_solid_state_batteries_open_challenges.md"));
}

#[tokio::test]
async fn missing_prompt_uses_default_question() {
    let workspace = Workspace::new();
    let runtime = workspace.runtime(&[]).await;

    let response = runtime.invoke(InvocationRequest::default(), None).await;

    assert!(report_of(&response).starts_with("# Research Report: Current state of AI safety in 2025."));
    let InvocationResponse::Success { outputs, .. } = response else {
        unreachable!()
    };
    assert!(outputs.uploaded.is_empty());
    assert!(outputs.failed.is_empty());
}

#[tokio::test]
async fn search_failures_become_error_responses() {
    let workspace = Workspace::new();
    let failing: DynSearchBackend = Arc::new(FailingSearch);
    let runtime = workspace
        .runtime(&[("OUTPUTS_BUCKET_NAME", "research-outputs")])
        .await
        .with_search(failing);

    let response = runtime.invoke(InvocationRequest::new("anything"), None).await;

    match response {
        InvocationResponse::Failure { error } => assert!(error.contains("401 Unauthorized")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!workspace.store.path().join("research-outputs").exists());
}

#[tokio::test]
async fn secret_fetch_failure_is_reported() {
    let workspace = Workspace::new();
    let runtime = workspace
        .runtime(&[("SECRETS_CONFIG", r#"{"LINKUP_API_KEY": "prod/linkup"}"#)])
        .await;

    let response = runtime.invoke(InvocationRequest::new("anything"), None).await;
    assert!(!response.is_success());
}

#[tokio::test]
async fn session_sources_follow_precedence() {
    let workspace = Workspace::new();
    let runtime = workspace
        .runtime(&[
            ("OUTPUTS_BUCKET_NAME", "out"),
            ("AGENTCORE_SESSION_ID", "from-env"),
        ])
        .await;

    let request = InvocationRequest {
        prompt: Some("grid storage".into()),
        session_id: Some("from-body".into()),
    };
    runtime
        .invoke(request.clone(), Some(&SessionContext::with_session_id("from-header")))
        .await;
    assert!(workspace.stored("out/from-header/final/research_report.md"));

    runtime.invoke(request, None).await;
    assert!(workspace.stored("out/from-body/final/research_report.md"));

    runtime.invoke(InvocationRequest::new("grid storage"), None).await;
    assert!(workspace.stored("out/from-env/final/research_report.md"));
}

#[tokio::test]
async fn memory_carries_earlier_questions_into_the_report() {
    let workspace = Workspace::new();
    let runtime = workspace
        .runtime(&[("ENABLE_MEMORY", "true"), ("AGENTCORE_MEMORY_ID", "mem-1")])
        .await;
    let context = SessionContext::with_session_id("sess-mem");

    let first = runtime
        .invoke(InvocationRequest::new("Hydrogen aviation"), Some(&context))
        .await;
    assert!(!report_of(&first).contains("## Context"));

    let second = runtime
        .invoke(InvocationRequest::new("Hydrogen storage costs"), Some(&context))
        .await;
    let report = report_of(&second);
    assert!(report.contains("## Context"));
    assert!(report.contains("- Hydrogen aviation"));
}

#[tokio::test]
async fn local_agent_runs_under_retry_policy() {
    let workspace = Workspace::new();
    let runtime = workspace.runtime(&[]).await;
    let agent = runtime.create_local_agent().await.unwrap();
    assert!(agent.spec().trace_attributes.is_none());

    let output = invoke_with_retry(&RetryPolicy::default(), |_| agent.invoke("Fusion energy"))
        .await
        .unwrap();

    assert!(output.message.contains("Fusion energy"));
    assert!(!output.todos.is_empty());
    assert!(output
        .todos
        .iter()
        .all(|todo| todo.status == TodoStatus::Completed));
}

#[tokio::test]
async fn secrets_are_loaded_before_the_agent_is_built() {
    let workspace = Workspace::new();
    let config = workspace.config(&[("SECRETS_CONFIG", r#"{"LINKUP_API_KEY": "prod/linkup"}"#)]);
    let store = Arc::new(StaticSecretStore::new([("prod/linkup", "lk-test")]));
    let secrets = SecretsLoader::new(config.secrets_config.clone(), store.clone()).without_env_export();
    let uploader = OutputUploader::new(
        Arc::new(FilesystemObjectStore::new(workspace.store.path())),
        None,
    );
    let runtime = ResearchRuntime::new(config, secrets, uploader)
        .with_audit_log(InvocationLog::new(workspace.store.path().join("logs"), 0));

    // Builds the real Linkup-backed search tool from the loaded key; no request is sent.
    runtime.create_agent("sess-a").await.unwrap();
    runtime.create_agent("sess-b").await.unwrap();
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn sessions_only_upload_their_own_files() {
    let workspace = Workspace::new();
    let runtime = workspace.runtime(&[("OUTPUTS_BUCKET_NAME", "out")]).await;

    let alice = runtime
        .invoke(
            InvocationRequest::new("Alice private medical question"),
            Some(&SessionContext::with_session_id("alice")),
        )
        .await;
    let bob = runtime
        .invoke(
            InvocationRequest::new("Bob tax question"),
            Some(&SessionContext::with_session_id("bob")),
        )
        .await;

    let InvocationResponse::Success { outputs: alice, .. } = alice else {
        panic!("alice's invocation failed");
    };
    let InvocationResponse::Success { outputs: bob, .. } = bob else {
        panic!("bob's invocation failed");
    };
    assert_eq!(alice.uploaded.len(), 10);
    assert_eq!(bob.uploaded.len(), 10);
    assert!(bob.uploaded.iter().all(|uri| uri.starts_with("s3://out/bob/")));
    assert!(!bob.uploaded.iter().any(|uri| uri.contains("alice")));
    assert!(!workspace.stored("out/bob/intermediate/alice_private_medical_question_overview/source_1.md"));
    assert_eq!(
        runtime.session_working_dir("bob"),
        workspace.work.path().join("bob")
    );
}

#[tokio::test]
async fn hostile_session_ids_stay_inside_the_working_dir() {
    let workspace = Workspace::new();
    let runtime = workspace.runtime(&[]).await;

    let dir = runtime.session_working_dir("../escape");
    assert_eq!(dir.parent(), Some(workspace.work.path()));

    let response = runtime
        .invoke(
            InvocationRequest::new("Path handling"),
            Some(&SessionContext::with_session_id("../escape")),
        )
        .await;
    assert!(response.is_success());
    assert!(dir.join("research_report.md").is_file());
}

#[tokio::test]
async fn configured_memory_store_sees_session_scoped_keys() {
    let workspace = Workspace::new();
    let memory = Arc::new(RecordingMemory {
        seeded: vec![
            ConversationTurn::new(TurnRole::User, "Earlier question"),
            ConversationTurn::new(TurnRole::Assistant, "Earlier report"),
        ],
        ..RecordingMemory::default()
    });
    let runtime = workspace
        .runtime(&[("ENABLE_MEMORY", "true"), ("AGENTCORE_MEMORY_ID", "mem-1")])
        .await
        .with_memory(memory.clone());

    let response = runtime
        .invoke(
            InvocationRequest::new("Follow-up question"),
            Some(&SessionContext::with_session_id("sess-seam")),
        )
        .await;

    let report = report_of(&response);
    assert!(report.contains("- Earlier question"));
    assert!(!report.contains("- Earlier report"));

    let expected = MemoryKey {
        memory_id: "mem-1".into(),
        actor_id: "deepsearch-agent".into(),
        session_id: "sess-seam".into(),
    };
    assert_eq!(memory.queried.lock().unwrap().as_slice(), &[expected.clone()]);
    let appended = memory.appended.lock().unwrap();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].0, expected);
    assert_eq!(appended[0].1[0].text, "Follow-up question");
    assert_eq!(appended[0].1[1].role, TurnRole::Assistant);
}

#[tokio::test]
async fn disabled_memory_never_touches_the_store() {
    let workspace = Workspace::new();
    let memory = Arc::new(RecordingMemory::default());
    let runtime = workspace.runtime(&[]).await.with_memory(memory.clone());

    runtime
        .invoke(
            InvocationRequest::new("No memory"),
            Some(&SessionContext::with_session_id("sess-none")),
        )
        .await;

    assert!(memory.queried.lock().unwrap().is_empty());
    assert!(memory.appended.lock().unwrap().is_empty());
}

#[tokio::test]
async fn eager_secret_load_serves_later_agents_from_cache() {
    let workspace = Workspace::new();
    let config = workspace.config(&[("SECRETS_CONFIG", r#"{"LINKUP_API_KEY": "prod/linkup"}"#)]);
    let store = Arc::new(StaticSecretStore::new([("prod/linkup", "lk-test")]));
    let secrets = SecretsLoader::new(config.secrets_config.clone(), store.clone()).without_env_export();
    let uploader = OutputUploader::new(
        Arc::new(FilesystemObjectStore::new(workspace.store.path())),
        None,
    );
    let runtime = ResearchRuntime::new(config, secrets, uploader);

    runtime.load_secrets().await.unwrap();
    assert_eq!(store.fetch_count(), 1);
    runtime.create_agent("sess-c").await.unwrap();
    assert_eq!(store.fetch_count(), 1);
}
