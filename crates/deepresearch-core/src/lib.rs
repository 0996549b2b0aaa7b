//! DeepResearch runtime core built on top of `graph_flow`.
//!
//! This crate hosts the research agent (lead planner, research sub-agent and
//! citations agent) together with the plumbing around one invocation:
//! session resolution, secrets loading, telemetry, output collection with
//! session-scoped uploads, and the retry wrapper used for local runs.

pub mod agent;
#[cfg(feature = "aws")]
mod aws;
pub mod config;
pub mod entrypoint;
mod error;
mod logging;
pub mod memory;
mod metrics;
pub mod outputs;
pub mod remote;
pub mod retry;
pub mod search;
pub mod secrets;
mod security;
pub mod session;
pub mod telemetry;

pub use agent::{
    AgentOptions, AgentOutput, AgentSpec, DeepAgent, SubAgentSpec, TodoItem, TodoStatus,
    create_deepsearch_agent,
};
pub use config::{RuntimeConfig, load_dotenv_if_requested};
pub use entrypoint::{DEFAULT_PROMPT, InvocationRequest, InvocationResponse, ResearchRuntime};
pub use error::{DeepResearchError, FailureKind, InvocationError};
pub use logging::{InvocationLog, InvocationLogEntry};
pub use outputs::{
    CollectedOutputs, FilesystemObjectStore, ObjectStore, OutputKind, OutputUploader,
    UploadReport, collect_output_files,
};
pub use retry::{RetryPolicy, invoke_with_retry, is_retryable};
pub use search::{InternetSearch, SearchBackend, StaticSearch};
pub use secrets::{SecretsLoader, SecretStore};
pub use security::{SecretValue, confine_path};
pub use session::{SessionContext, SessionManager, create_session_manager, resolve_session_id};
pub use telemetry::{LoggingOptions, TelemetryInitializer, init_logging};
