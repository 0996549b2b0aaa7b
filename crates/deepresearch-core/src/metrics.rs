use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};

struct RuntimeMetrics {
    attempts: Counter<u64>,
    uploads: Counter<u64>,
    searches: Counter<u64>,
}

static METRICS: OnceCell<RuntimeMetrics> = OnceCell::new();

fn handles() -> &'static RuntimeMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepresearch.runtime");
        RuntimeMetrics {
            attempts: meter
                .u64_counter("agent_invocation_attempts_total")
                .with_description("Agent invocation attempts by outcome")
                .init(),
            uploads: meter
                .u64_counter("output_uploads_total")
                .with_description("Output file uploads by kind and outcome")
                .init(),
            searches: meter
                .u64_counter("search_calls_total")
                .with_description("Search tool calls by backend and outcome")
                .init(),
        }
    })
}

/// Record one agent invocation attempt (no-op if no provider installed).
pub fn record_attempt(outcome: &'static str) {
    handles()
        .attempts
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

pub fn record_upload(kind: &'static str, success: bool) {
    handles().uploads.add(
        1,
        &[
            KeyValue::new("kind", kind),
            KeyValue::new("status", if success { "uploaded" } else { "failed" }),
        ],
    );
}

pub fn record_search(backend: &str, success: bool) {
    handles().searches.add(
        1,
        &[
            KeyValue::new("backend", backend.to_string()),
            KeyValue::new("status", if success { "ok" } else { "error" }),
        ],
    );
}
