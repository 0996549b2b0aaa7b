use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    DeepResearchError,
    outputs::OutputStoreChoice,
    search::{SearchProvider, StrategyChoice},
};

const DEFAULT_ACTOR_ID: &str = "deepsearch-agent";
const DEFAULT_OUTPUT_DIR: &str = "data/outputs";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SEARCH_INTERVAL_MS: u64 = 200;

/// Process-wide configuration, built once at start-up and passed by reference.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub working_dir: PathBuf,
    pub aws_region: Option<String>,
    pub outputs: OutputSettings,
    pub memory: MemorySettings,
    /// Raw `SECRETS_CONFIG` JSON (env var name -> secret id).
    pub secrets_config: Option<String>,
    pub telemetry: TelemetrySettings,
    pub search: SearchSettings,
    /// `AGENTCORE_SESSION_ID` override used when the caller supplies no session.
    pub session_id_override: Option<String>,
    pub bypass_tool_consent: bool,
    pub listen_addr: String,
    pub max_concurrent_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub bucket: Option<String>,
    pub store: OutputStoreChoice,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    pub enabled: bool,
    pub memory_id: Option<String>,
    pub actor_id: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: Option<String>,
    pub langfuse: Option<LangfuseCredentials>,
}

#[derive(Clone)]
pub struct LangfuseCredentials {
    pub public_key: String,
    pub secret_key: String,
    pub host: String,
}

impl std::fmt::Debug for LangfuseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangfuseCredentials")
            .field("public_key", &self.public_key)
            .field("secret_key", &"***redacted***")
            .field("host", &self.host)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub backends: Vec<SearchProvider>,
    pub strategy: StrategyChoice,
    /// Minimum spacing between consecutive search calls.
    pub interval: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            backends: vec![SearchProvider::Linkup],
            strategy: StrategyChoice::Random,
            interval: Duration::from_millis(DEFAULT_SEARCH_INTERVAL_MS),
        }
    }
}

impl RuntimeConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, DeepResearchError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DeepResearchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let working_dir = match get("DEEPRESEARCH_WORKING_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir().map_err(|err| DeepResearchError::io(".", err))?,
        };

        let aws_region = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION"));

        let outputs = OutputSettings {
            bucket: get("OUTPUTS_BUCKET_NAME"),
            store: resolve_output_store(get("DEEPRESEARCH_OUTPUT_STORE"), get("DEEPRESEARCH_OUTPUT_DIR"))?,
        };

        let memory = MemorySettings {
            enabled: flag(get("ENABLE_MEMORY"), "ENABLE_MEMORY", false)?,
            memory_id: get("AGENTCORE_MEMORY_ID"),
            actor_id: get("AGENTCORE_ACTOR_ID").unwrap_or_else(|| DEFAULT_ACTOR_ID.to_string()),
            region: aws_region.clone(),
        };

        let langfuse = match (
            get("LANGFUSE_PUBLIC_KEY"),
            get("LANGFUSE_SECRET_KEY"),
            get("LANGFUSE_HOST"),
        ) {
            (Some(public_key), Some(secret_key), Some(host)) => Some(LangfuseCredentials {
                public_key,
                secret_key,
                host,
            }),
            _ => None,
        };

        let telemetry = TelemetrySettings {
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otlp_headers: get("OTEL_EXPORTER_OTLP_HEADERS"),
            langfuse,
        };

        let search = SearchSettings {
            backends: match get("DEEPRESEARCH_SEARCH_BACKENDS") {
                Some(list) => parse_backends(&list)?,
                None => SearchSettings::default().backends,
            },
            strategy: get("DEEPRESEARCH_SEARCH_STRATEGY")
                .map(|value| value.parse::<StrategyChoice>())
                .transpose()?
                .unwrap_or_default(),
            interval: get("DEEPRESEARCH_SEARCH_INTERVAL_MS")
                .map(|value| {
                    value.parse::<u64>().map_err(|_| {
                        DeepResearchError::InvalidConfiguration(
                            "DEEPRESEARCH_SEARCH_INTERVAL_MS must be an integer".into(),
                        )
                    })
                })
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_SEARCH_INTERVAL_MS)),
        };

        let max_concurrent_sessions = get("DEEPRESEARCH_MAX_CONCURRENT_SESSIONS")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(1);

        let config = Self {
            working_dir,
            aws_region,
            outputs,
            memory,
            secrets_config: get("SECRETS_CONFIG"),
            telemetry,
            search,
            session_id_override: get("AGENTCORE_SESSION_ID"),
            bypass_tool_consent: flag(get("BYPASS_TOOL_CONSENT"), "BYPASS_TOOL_CONSENT", true)?,
            listen_addr: get("DEEPRESEARCH_RUNTIME_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            max_concurrent_sessions,
        };

        debug!(?config, "runtime configuration resolved");
        Ok(config)
    }

    /// Point the working directory somewhere else (tests, CLI overrides).
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = dir.as_ref().to_path_buf();
        self
    }
}

/// Load a `.env` file into the process environment when `LOAD_DOTENV=true`.
///
/// Must run before [`RuntimeConfig::from_env`] and before any threads are spawned.
pub fn load_dotenv_if_requested() {
    let requested = env::var("LOAD_DOTENV")
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false);
    if !requested {
        return;
    }

    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "loaded environment from dotenv file"),
        Err(err) => info!(error = %err, "LOAD_DOTENV set but no dotenv file was loaded"),
    }
}

pub(crate) fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn flag(value: Option<String>, name: &str, default: bool) -> Result<bool, DeepResearchError> {
    match value {
        None => Ok(default),
        Some(raw) => parse_bool(&raw).ok_or_else(|| {
            DeepResearchError::InvalidConfiguration(format!("{name} must be true or false"))
        }),
    }
}

fn parse_backends(list: &str) -> Result<Vec<SearchProvider>, DeepResearchError> {
    let backends = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::parse::<SearchProvider>)
        .collect::<Result<Vec<_>, _>>()?;

    if backends.is_empty() {
        return Err(DeepResearchError::InvalidConfiguration(
            "DEEPRESEARCH_SEARCH_BACKENDS must name at least one backend".into(),
        ));
    }
    Ok(backends)
}

fn resolve_output_store(
    choice: Option<String>,
    output_dir: Option<String>,
) -> Result<OutputStoreChoice, DeepResearchError> {
    let root = output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    match choice.as_deref() {
        Some("fs") | Some("filesystem") => Ok(OutputStoreChoice::Filesystem { root }),
        #[cfg(feature = "aws")]
        Some("s3") | None => Ok(OutputStoreChoice::S3),
        #[cfg(not(feature = "aws"))]
        Some("s3") => Err(DeepResearchError::InvalidConfiguration(
            "built without the `aws` feature; rebuild with --features aws to upload to S3".into(),
        )),
        #[cfg(not(feature = "aws"))]
        None => Ok(OutputStoreChoice::Filesystem { root }),
        Some(other) => Err(DeepResearchError::InvalidConfiguration(format!(
            "unknown DEEPRESEARCH_OUTPUT_STORE '{other}' (expected s3 or fs)"
        ))),
    }
}
