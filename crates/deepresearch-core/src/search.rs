//! Web search tool used by the research sub-agent.
//!
//! [`InternetSearch`] fronts one or more [`SearchBackend`]s (Linkup, Tavily)
//! and picks one per call through an explicit [`SelectionStrategy`] with an
//! injectable random source, so selection is deterministic under test.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::{SeedableRng, rngs::StdRng};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SearchSettings;
use crate::secrets::{SecretsMap, resolve_secret};
use crate::{DeepResearchError, InvocationError, SecretValue, metrics};

const LINKUP_BASE_URL: &str = "https://api.linkup.so";
const TAVILY_BASE_URL: &str = "https://api.tavily.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProvider {
    Linkup,
    Tavily,
}

impl SearchProvider {
    pub fn tool_name(&self) -> &'static str {
        match self {
            SearchProvider::Linkup => "linkup_search",
            SearchProvider::Tavily => "tavily_search",
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            SearchProvider::Linkup => "LINKUP_API_KEY",
            SearchProvider::Tavily => "TAVILY_API_KEY",
        }
    }
}

impl FromStr for SearchProvider {
    type Err = DeepResearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linkup" | "linkup_search" => Ok(SearchProvider::Linkup),
            "tavily" | "tavily_search" => Ok(SearchProvider::Tavily),
            other => Err(DeepResearchError::InvalidConfiguration(format!(
                "unknown search backend '{other}' (expected linkup or tavily)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    #[default]
    Random,
    RoundRobin,
}

impl FromStr for StrategyChoice {
    type Err = DeepResearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(StrategyChoice::Random),
            "round_robin" | "round-robin" => Ok(StrategyChoice::RoundRobin),
            other => Err(DeepResearchError::InvalidConfiguration(format!(
                "unknown search strategy '{other}' (expected random or round_robin)"
            ))),
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Run a query and return the raw textual result.
    async fn search(&self, query: &str) -> Result<String, InvocationError>;
}

pub type DynSearchBackend = Arc<dyn SearchBackend>;

fn http_client() -> Result<reqwest::Client, DeepResearchError> {
    reqwest::Client::builder()
        .timeout(SEARCH_TIMEOUT)
        .build()
        .map_err(|err| DeepResearchError::InvalidConfiguration(format!("http client: {err}")))
}

async fn read_body(backend: &str, response: reqwest::Response) -> Result<String, InvocationError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        warn!(backend, status = status.as_u16(), "search backend returned an error status");
        return Err(InvocationError::other(format!(
            "{backend} returned HTTP {status}: {body}"
        )));
    }
    Ok(body)
}

/// Linkup sourced-answer search.
pub struct LinkupSearch {
    client: reqwest::Client,
    api_key: SecretValue,
    base_url: String,
}

impl LinkupSearch {
    pub fn new(api_key: SecretValue) -> Result<Self, DeepResearchError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: LINKUP_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SearchBackend for LinkupSearch {
    fn name(&self) -> &str {
        SearchProvider::Linkup.tool_name()
    }

    async fn search(&self, query: &str) -> Result<String, InvocationError> {
        let response = self
            .client
            .post(format!("{}/v1/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&json!({
                "q": query,
                "depth": "standard",
                "outputType": "sourcedAnswer",
                "includeImages": false,
                "includeInlineCitations": false,
            }))
            .send()
            .await?;
        read_body(self.name(), response).await
    }
}

/// Tavily web search.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: SecretValue,
    base_url: String,
}

impl TavilySearch {
    pub fn new(api_key: SecretValue) -> Result<Self, DeepResearchError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: TAVILY_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SearchBackend for TavilySearch {
    fn name(&self) -> &str {
        SearchProvider::Tavily.tool_name()
    }

    async fn search(&self, query: &str) -> Result<String, InvocationError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&json!({
                "query": query,
                "search_depth": "basic",
                "include_answer": true,
            }))
            .send()
            .await?;
        read_body(self.name(), response).await
    }
}

/// Canned results for offline runs and tests.
pub struct StaticSearch {
    name: String,
    sources: Vec<String>,
}

impl StaticSearch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: vec![
                "https://example.com/industry-overview".to_string(),
                "https://example.com/recent-analysis".to_string(),
            ],
        }
    }
}

#[async_trait]
impl SearchBackend for StaticSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<String, InvocationError> {
        let mut body = format!("Answer: Offline summary for \"{query}\".\nSources:\n");
        for source in &self.sources {
            body.push_str(&format!("- {source}\n"));
        }
        Ok(body)
    }
}

/// How [`InternetSearch`] picks a backend for each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Uniform random choice.
    Uniform,
    /// Random choice weighted per backend (same order as the backends).
    Weighted(Vec<u32>),
    /// Cycle through the backends in order.
    RoundRobin,
}

impl From<StrategyChoice> for SelectionStrategy {
    fn from(choice: StrategyChoice) -> Self {
        match choice {
            StrategyChoice::Random => SelectionStrategy::Uniform,
            StrategyChoice::RoundRobin => SelectionStrategy::RoundRobin,
        }
    }
}

enum Selector {
    Weighted {
        distribution: WeightedIndex<u32>,
        rng: Mutex<StdRng>,
    },
    RoundRobin(AtomicUsize),
}

/// The `internet_search` tool handed to the research sub-agent.
pub struct InternetSearch {
    backends: Vec<DynSearchBackend>,
    selector: Selector,
}

impl InternetSearch {
    pub const TOOL_NAME: &'static str = "internet_search";

    pub fn new(
        backends: Vec<DynSearchBackend>,
        strategy: SelectionStrategy,
    ) -> Result<Self, DeepResearchError> {
        Self::with_rng(backends, strategy, StdRng::from_entropy())
    }

    /// Same as [`InternetSearch::new`] with an explicit random source.
    pub fn with_rng(
        backends: Vec<DynSearchBackend>,
        strategy: SelectionStrategy,
        rng: StdRng,
    ) -> Result<Self, DeepResearchError> {
        if backends.is_empty() {
            return Err(DeepResearchError::InvalidConfiguration(
                "internet search requires at least one backend".into(),
            ));
        }

        let selector = match strategy {
            SelectionStrategy::RoundRobin => Selector::RoundRobin(AtomicUsize::new(0)),
            SelectionStrategy::Uniform => Self::weighted(vec![1; backends.len()], rng)?,
            SelectionStrategy::Weighted(weights) => {
                if weights.len() != backends.len() {
                    return Err(DeepResearchError::InvalidConfiguration(format!(
                        "{} weights given for {} search backends",
                        weights.len(),
                        backends.len()
                    )));
                }
                Self::weighted(weights, rng)?
            }
        };

        Ok(Self { backends, selector })
    }

    /// Build the configured backends, resolving API keys from loaded secrets.
    pub fn from_settings(
        settings: &SearchSettings,
        secrets: &SecretsMap,
    ) -> Result<Self, DeepResearchError> {
        let backends = settings
            .backends
            .iter()
            .map(|provider| -> Result<DynSearchBackend, DeepResearchError> {
                let api_key = resolve_secret(secrets, provider.api_key_env())?;
                let backend: DynSearchBackend = match provider {
                    SearchProvider::Linkup => Arc::new(LinkupSearch::new(api_key)?),
                    SearchProvider::Tavily => Arc::new(TavilySearch::new(api_key)?),
                };
                Ok(backend)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(backends, settings.strategy.into())
    }

    fn weighted(weights: Vec<u32>, rng: StdRng) -> Result<Selector, DeepResearchError> {
        let distribution = WeightedIndex::new(weights).map_err(|err| {
            DeepResearchError::InvalidConfiguration(format!("invalid search weights: {err}"))
        })?;
        Ok(Selector::Weighted {
            distribution,
            rng: Mutex::new(rng),
        })
    }

    fn select(&self) -> &DynSearchBackend {
        let index = match &self.selector {
            Selector::RoundRobin(next) => next.fetch_add(1, Ordering::Relaxed) % self.backends.len(),
            Selector::Weighted { distribution, rng } => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                distribution.sample(&mut *rng)
            }
        };
        &self.backends[index]
    }
}

#[async_trait]
impl SearchBackend for InternetSearch {
    fn name(&self) -> &str {
        Self::TOOL_NAME
    }

    async fn search(&self, query: &str) -> Result<String, InvocationError> {
        if query.trim().is_empty() {
            return Err(InvocationError::other("search query cannot be empty"));
        }

        let backend = self.select();
        info!(tool = backend.name(), "using search tool");

        let result = backend.search(query).await;
        metrics::record_search(backend.name(), result.is_ok());
        if let Ok(body) = &result {
            debug!(tool = backend.name(), bytes = body.len(), "search completed");
        }
        result
    }
}
