use std::collections::BTreeMap;
use std::sync::OnceLock;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::DeepResearchError;
use crate::config::TelemetrySettings;

static LOGGING_GUARD: OnceLock<()> = OnceLock::new();

const LANGFUSE_OTEL_PATH: &str = "/api/public/otel";
pub const TRACE_TAG: &str = "DeepResearch";

/// Configuration options when initialising logging.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub env_filter: Option<String>,
    pub with_ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_logging(options: LoggingOptions) -> Result<(), DeepResearchError> {
    if LOGGING_GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = options
        .env_filter
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,deepresearch_core=info".to_string());

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(options.with_ansi)
        .with_target(false)
        .try_init()
        .map_err(|err| {
            DeepResearchError::InvalidConfiguration(format!("logging init failed: {err}"))
        })?;

    LOGGING_GUARD.get_or_init(|| ());
    Ok(())
}

/// Trace exporter endpoint and headers derived from the configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct TraceExporterSettings {
    pub endpoint: String,
    pub headers: Option<String>,
}

impl std::fmt::Debug for TraceExporterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceExporterSettings")
            .field("endpoint", &self.endpoint)
            .field("headers", &self.headers.as_ref().map(|_| "***redacted***"))
            .finish()
    }
}

impl TraceExporterSettings {
    /// Explicit OTLP settings win; Langfuse credentials fill whatever is missing.
    ///
    /// Returns `None` when neither source is configured.
    pub fn resolve(settings: &TelemetrySettings) -> Option<Self> {
        let langfuse = settings.langfuse.as_ref();

        let endpoint = settings.otlp_endpoint.clone().or_else(|| {
            langfuse.map(|creds| {
                format!("{}{LANGFUSE_OTEL_PATH}", creds.host.trim_end_matches('/'))
            })
        })?;

        let headers = settings.otlp_headers.clone().or_else(|| {
            langfuse.map(|creds| {
                let token = STANDARD.encode(format!("{}:{}", creds.public_key, creds.secret_key));
                format!("Authorization=Basic {token}")
            })
        });

        Some(Self { endpoint, headers })
    }
}

/// Idempotent, best-effort telemetry set-up.
#[derive(Default)]
pub struct TelemetryInitializer {
    resolved: OnceLock<Option<TraceExporterSettings>>,
}

impl TelemetryInitializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when an exporter is configured. Only the first call does work.
    pub fn initialize(&self, settings: &TelemetrySettings) -> bool {
        self.resolved
            .get_or_init(|| match TraceExporterSettings::resolve(settings) {
                Some(exporter) => {
                    info!(
                        target = "telemetry",
                        endpoint = %exporter.endpoint,
                        "telemetry initialized; attach an OTLP collector to forward spans"
                    );
                    Some(exporter)
                }
                None => {
                    info!(
                        target = "telemetry",
                        "telemetry skipped: no OTLP endpoint or Langfuse credentials configured"
                    );
                    None
                }
            })
            .is_some()
    }

    pub fn exporter(&self) -> Option<&TraceExporterSettings> {
        self.resolved.get().and_then(Option::as_ref)
    }
}

/// Trace attributes attached to every agent run of a session.
pub fn trace_attributes(session_id: &str) -> BTreeMap<String, serde_json::Value> {
    let mut attributes = BTreeMap::new();
    attributes.insert("session.id".to_string(), serde_json::json!(session_id));
    attributes.insert("langfuse.tags".to_string(), serde_json::json!([TRACE_TAG]));
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LangfuseCredentials;

    fn langfuse() -> LangfuseCredentials {
        LangfuseCredentials {
            public_key: "pk-lf".into(),
            secret_key: "sk-lf".into(),
            host: "https://cloud.langfuse.com/".into(),
        }
    }

    #[test]
    fn nothing_configured_skips_exporter() {
        assert!(TraceExporterSettings::resolve(&TelemetrySettings::default()).is_none());

        let initializer = TelemetryInitializer::new();
        assert!(!initializer.initialize(&TelemetrySettings::default()));
        assert!(initializer.exporter().is_none());
    }

    #[test]
    fn langfuse_credentials_derive_endpoint_and_basic_auth() {
        let settings = TelemetrySettings {
            langfuse: Some(langfuse()),
            ..TelemetrySettings::default()
        };
        let exporter = TraceExporterSettings::resolve(&settings).expect("exporter");

        assert_eq!(exporter.endpoint, "https://cloud.langfuse.com/api/public/otel");
        let expected = STANDARD.encode("pk-lf:sk-lf");
        assert_eq!(exporter.headers, Some(format!("Authorization=Basic {expected}")));
    }

    #[test]
    fn explicit_otlp_settings_take_precedence() {
        let settings = TelemetrySettings {
            otlp_endpoint: Some("http://collector:4318".into()),
            otlp_headers: Some("x-api-key=abc".into()),
            langfuse: Some(langfuse()),
        };
        let exporter = TraceExporterSettings::resolve(&settings).expect("exporter");
        assert_eq!(exporter.endpoint, "http://collector:4318");
        assert_eq!(exporter.headers.as_deref(), Some("x-api-key=abc"));
    }

    #[test]
    fn initializer_only_resolves_once() {
        let initializer = TelemetryInitializer::new();
        let configured = TelemetrySettings {
            otlp_endpoint: Some("http://collector:4318".into()),
            ..TelemetrySettings::default()
        };
        assert!(initializer.initialize(&configured));
        assert!(initializer.initialize(&TelemetrySettings::default()));
        assert_eq!(
            initializer.exporter().map(|e| e.endpoint.as_str()),
            Some("http://collector:4318")
        );
    }

    #[test]
    fn trace_attributes_carry_session_and_tag() {
        let attributes = trace_attributes("abc");
        assert_eq!(attributes["session.id"], "abc");
        assert_eq!(attributes["langfuse.tags"], serde_json::json!(["DeepResearch"]));
    }
}
