//! Per-invocation request handling: session, telemetry, secrets, agent, uploads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};

use crate::DeepResearchError;
use crate::agent::{AgentOptions, AgentOutput, DeepAgent, create_deepsearch_agent};
use crate::config::RuntimeConfig;
use crate::error::InvocationError;
use crate::logging::{InvocationLog, InvocationLogEntry};
use crate::memory::{DynConversationMemory, InMemoryConversationMemory, memory_backend};
use crate::outputs::{OutputUploader, UploadReport, build_object_store};
use crate::search::{DynSearchBackend, InternetSearch};
use crate::secrets::{SecretsLoader, default_secret_store};
use crate::session::{SessionContext, create_session_manager, resolve_session_id, session_dir_name};
use crate::telemetry::{TRACE_TAG, TelemetryInitializer};

pub const DEFAULT_PROMPT: &str = "Current state of AI safety in 2025.";

/// Inbound invocation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            session_id: None,
        }
    }

    /// The prompt, or the default research question when none was sent.
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationResponse {
    Success { result: String, outputs: UploadReport },
    Failure { error: String },
}

impl InvocationResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResponse::Success { .. })
    }
}

/// Long-lived runtime state shared by every invocation.
pub struct ResearchRuntime {
    config: RuntimeConfig,
    secrets: SecretsLoader,
    telemetry: TelemetryInitializer,
    memory: DynConversationMemory,
    uploader: OutputUploader,
    search_override: Option<DynSearchBackend>,
    audit_log: Option<InvocationLog>,
}

impl ResearchRuntime {
    pub fn new(config: RuntimeConfig, secrets: SecretsLoader, uploader: OutputUploader) -> Self {
        Self {
            config,
            secrets,
            telemetry: TelemetryInitializer::new(),
            memory: Arc::new(InMemoryConversationMemory::new()),
            uploader,
            search_override: None,
            audit_log: None,
        }
    }

    /// Wire the default secret store, object store, memory store and audit log
    /// for `config`.
    pub async fn from_config(config: RuntimeConfig) -> Self {
        let secret_store = default_secret_store(config.aws_region.clone()).await;
        let secrets = SecretsLoader::new(config.secrets_config.clone(), secret_store);
        let object_store = build_object_store(&config.outputs.store, config.aws_region.clone()).await;
        let uploader = OutputUploader::new(object_store, config.outputs.bucket.clone());
        let memory = memory_backend(&config.memory).await;
        Self::new(config, secrets, uploader)
            .with_memory(memory)
            .with_audit_log(InvocationLog::from_env())
    }

    /// Replace the configured search backends (offline runs, tests).
    pub fn with_search(mut self, search: DynSearchBackend) -> Self {
        self.search_override = Some(search);
        self
    }

    pub fn with_memory(mut self, memory: DynConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_audit_log(mut self, log: InvocationLog) -> Self {
        self.audit_log = Some(log);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn uploader(&self) -> &OutputUploader {
        &self.uploader
    }

    pub fn telemetry(&self) -> &TelemetryInitializer {
        &self.telemetry
    }

    /// Directory one session's agent writes into and its upload scans.
    pub fn session_working_dir(&self, session_id: &str) -> PathBuf {
        self.config.working_dir.join(session_dir_name(session_id))
    }

    /// Fetch configured secrets now instead of on the first invocation.
    pub async fn load_secrets(&self) -> Result<(), DeepResearchError> {
        self.secrets.load().await.map(|_| ())
    }

    /// Build a fresh agent for one session, with memory and trace attributes.
    ///
    /// The agent works in [`Self::session_working_dir`].
    pub async fn create_agent(&self, session_id: &str) -> Result<DeepAgent, DeepResearchError> {
        self.build_agent(Some(session_id), self.session_working_dir(session_id))
            .await
    }

    /// Build an agent for local runs: no memory, no session attributes, and the
    /// configured working directory itself.
    pub async fn create_local_agent(&self) -> Result<DeepAgent, DeepResearchError> {
        self.build_agent(None, self.config.working_dir.clone()).await
    }

    async fn build_agent(
        &self,
        session_id: Option<&str>,
        working_dir: PathBuf,
    ) -> Result<DeepAgent, DeepResearchError> {
        let secrets = self.secrets.load().await?;

        info!("initializing DeepSearch agent");
        let session_manager = session_id.and_then(|id| {
            create_session_manager(&self.config.memory, id, self.memory.clone())
        });

        let search: DynSearchBackend = match &self.search_override {
            Some(search) => search.clone(),
            None => Arc::new(InternetSearch::from_settings(&self.config.search, &secrets)?),
        };

        let options = AgentOptions::new(working_dir)
            .with_search_interval(self.config.search.interval);
        let agent = create_deepsearch_agent(
            search,
            Some(InternetSearch::TOOL_NAME),
            session_manager,
            session_id,
            options,
        )?;
        info!("DeepSearch agent initialized");
        Ok(agent)
    }

    /// Handle one inbound invocation. Every failure becomes an `{error}` response.
    ///
    /// A non-empty `context` session id wins over the one in the request body.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        context: Option<&SessionContext>,
    ) -> InvocationResponse {
        let started = Instant::now();
        let prompt = request.prompt().to_string();
        info!(prompt = %prompt, "processing user message");

        self.telemetry.initialize(&self.config.telemetry);

        let body_context = request.session_id.clone().map(SessionContext::with_session_id);
        let context = context
            .filter(|ctx| ctx.session_id.as_deref().is_some_and(|id| !id.trim().is_empty()))
            .or(body_context.as_ref());
        let session_id = resolve_session_id(context, self.config.session_id_override.as_deref());

        let span = info_span!(
            "invocation",
            session.id = %session_id,
            langfuse.tags = TRACE_TAG
        );

        let response = async {
            info!(session_id = %session_id, "session resolved");
            match self.run_agent(&session_id, &prompt).await {
                Ok(output) => {
                    info!("agent completed successfully");
                    let outputs = self
                        .uploader
                        .upload_session_outputs(&session_id, &self.session_working_dir(&session_id))
                        .await;
                    InvocationResponse::Success {
                        result: output.message,
                        outputs,
                    }
                }
                Err(err) => {
                    error!(error = %err, "error during agent invocation");
                    InvocationResponse::Failure {
                        error: err.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await;

        self.audit(&session_id, &prompt, &response, started).await;
        response
    }

    async fn run_agent(&self, session_id: &str, prompt: &str) -> Result<AgentOutput, InvocationError> {
        let agent = self.create_agent(session_id).await?;
        agent.invoke(prompt).await
    }

    async fn audit(&self, session_id: &str, prompt: &str, response: &InvocationResponse, started: Instant) {
        let Some(log) = &self.audit_log else {
            return;
        };
        let (error, uploaded, failed) = match response {
            InvocationResponse::Success { outputs, .. } => (None, outputs.uploaded.len(), outputs.failed.len()),
            InvocationResponse::Failure { error } => (Some(error.clone()), 0, 0),
        };
        let entry = InvocationLogEntry {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            error,
            uploaded,
            failed,
            duration: started.elapsed(),
        };
        if let Err(err) = log.record_blocking(entry).await {
            warn!(error = %err, "failed to append invocation log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_prompt() {
        let request: InvocationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.prompt(), DEFAULT_PROMPT);

        let request: InvocationRequest =
            serde_json::from_str(r#"{"prompt": "lithium supply", "session_id": "abc"}"#).unwrap();
        assert_eq!(request.prompt(), "lithium supply");
        assert_eq!(request.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn responses_serialize_without_tags() {
        let success = InvocationResponse::Success {
            result: "report".into(),
            outputs: UploadReport::default(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            serde_json::json!({"result": "report", "outputs": {"uploaded": [], "failed": []}})
        );

        let failure = InvocationResponse::Failure {
            error: "boom".into(),
        };
        assert_eq!(serde_json::to_value(&failure).unwrap(), serde_json::json!({"error": "boom"}));
    }
}
