//! Client side of the runtime contract: send one prompt to a deployed runtime.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

pub const SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";
pub const DEFAULT_QUALIFIER: &str = "DEFAULT";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Fresh runtime session id in the `session-{uuid}` form.
pub fn new_runtime_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

#[async_trait]
pub trait RuntimeInvoker: Send + Sync {
    /// Send `prompt` under `session_id` and return the parsed JSON response.
    async fn invoke(&self, session_id: &str, prompt: &str) -> Result<Value>;
}

/// Invokes a runtime over plain HTTP (`POST {endpoint}/invocations`).
pub struct HttpRuntimeInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRuntimeInvoker {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        // Research runs can take many minutes.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(900))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RuntimeInvoker for HttpRuntimeInvoker {
    async fn invoke(&self, session_id: &str, prompt: &str) -> Result<Value> {
        let url = format!("{}/invocations", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header(SESSION_HEADER, session_id)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .with_context(|| format!("failed to reach runtime at {url}"))?
            .error_for_status()
            .with_context(|| format!("runtime at {url} rejected the invocation"))?;

        response
            .json::<Value>()
            .await
            .context("runtime returned a non-JSON response")
    }
}

#[cfg(feature = "aws")]
pub use agentcore::AgentCoreInvoker;

#[cfg(feature = "aws")]
mod agentcore {
    use super::*;
    use aws_sdk_bedrockagentcore::Client;
    use aws_sdk_bedrockagentcore::error::DisplayErrorContext;
    use aws_sdk_bedrockagentcore::primitives::Blob;

    /// Invokes a deployed AgentCore runtime by ARN.
    pub struct AgentCoreInvoker {
        client: Client,
        agent_runtime_arn: String,
    }

    impl AgentCoreInvoker {
        pub async fn new(agent_runtime_arn: impl Into<String>, region: impl Into<String>) -> Self {
            let config = crate::aws::sdk_config(Some(region.into())).await;
            Self {
                client: Client::new(&config),
                agent_runtime_arn: agent_runtime_arn.into(),
            }
        }
    }

    #[async_trait]
    impl RuntimeInvoker for AgentCoreInvoker {
        async fn invoke(&self, session_id: &str, prompt: &str) -> Result<Value> {
            let payload = serde_json::to_vec(&json!({ "prompt": prompt }))?;
            let output = self
                .client
                .invoke_agent_runtime()
                .agent_runtime_arn(&self.agent_runtime_arn)
                .runtime_session_id(session_id)
                .qualifier(DEFAULT_QUALIFIER)
                .content_type("application/json")
                .payload(Blob::new(payload))
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(err)))
                .context("InvokeAgentRuntime failed")?;

            let body = output
                .response
                .collect()
                .await
                .context("failed to read runtime response")?
                .into_bytes();
            serde_json::from_slice(&body).context("runtime returned a non-JSON response")
        }
    }
}

/// One invoke-and-return round trip. A missing session id gets a fresh one.
pub async fn invoke_runtime(
    invoker: &dyn RuntimeInvoker,
    prompt: &str,
    session_id: Option<String>,
) -> Result<(String, Value)> {
    let session_id = session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_runtime_session_id);
    info!(session_id = %session_id, "invoking agent runtime");
    let response = invoker.invoke(&session_id, prompt).await?;
    Ok((session_id, response))
}
