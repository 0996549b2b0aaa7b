//! DeepSearch agent factory and execution on top of `graph_flow`.
//!
//! A lead task plans topics, the research sub-agent searches them one by one
//! and stores source documents, and the citations agent writes the final
//! report with numbered references.

pub mod prompts;
mod tasks;
pub mod tools;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::DeepResearchError;
use crate::error::InvocationError;
use crate::memory::TurnRole;
use crate::search::DynSearchBackend;
use crate::session::SessionManager;
use crate::telemetry::trace_attributes;

use self::tasks::{
    CitationsTask, FAILURE_KEY, HISTORY_KEY, LeadTask, MESSAGE_KEY, PROMPT_KEY,
    ResearchSubagentTask, TODOS_KEY,
};
use self::tools::{FILE_READ, FILE_WRITE, FileTools};

pub use self::tasks::REPORT_FILE;

pub const RESEARCH_SUBAGENT: &str = "research_subagent";
pub const CITATIONS_AGENT: &str = "citations_agent";

const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_SEARCH_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            TodoStatus::Completed => "✅",
            TodoStatus::InProgress => "🔄",
            TodoStatus::Pending => "⏳",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: TodoStatus::Pending,
        }
    }
}

/// Result of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub message: String,
    pub todos: Vec<TodoItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubAgentSpec {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tools: Vec<String>,
}

/// Everything the agent framework needs to assemble the lead agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub instructions: String,
    pub subagents: Vec<SubAgentSpec>,
    pub tools: Vec<String>,
    pub disable_parallel_tool_calling: bool,
    pub session_manager: Option<SessionManager>,
    pub trace_attributes: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub working_dir: PathBuf,
    /// Pause between consecutive search calls.
    pub search_interval: Duration,
    pub history_limit: usize,
}

impl AgentOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            search_interval: DEFAULT_SEARCH_INTERVAL,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.search_interval = interval;
        self
    }
}

/// Build the DeepSearch agent around `research_tool`.
///
/// `tool_name` defaults to the tool's own name and is substituted into the lead
/// and sub-agent prompts.
pub fn create_deepsearch_agent(
    research_tool: DynSearchBackend,
    tool_name: Option<&str>,
    session_manager: Option<SessionManager>,
    session_id: Option<&str>,
    options: AgentOptions,
) -> Result<DeepAgent, DeepResearchError> {
    let tool_name = tool_name
        .unwrap_or_else(|| research_tool.name())
        .trim()
        .to_string();
    if tool_name.is_empty() {
        return Err(DeepResearchError::InvalidConfiguration(
            "tool name not provided and could not be detected from the research tool".into(),
        ));
    }

    let research_subagent = SubAgentSpec {
        name: RESEARCH_SUBAGENT.to_string(),
        description: format!(
            "{} This agent has access to {tool_name} for web search.",
            prompts::RESEARCH_SUBAGENT_DESCRIPTION
        ),
        prompt: prompts::render(prompts::RESEARCH_SUBAGENT_PROMPT, &tool_name),
        tools: vec![tool_name.clone(), FILE_WRITE.to_string()],
    };
    let citations_agent = SubAgentSpec {
        name: CITATIONS_AGENT.to_string(),
        description: prompts::CITATIONS_AGENT_DESCRIPTION.to_string(),
        prompt: prompts::CITATIONS_AGENT_PROMPT.to_string(),
        tools: vec![FILE_READ.to_string(), FILE_WRITE.to_string()],
    };

    let spec = AgentSpec {
        instructions: prompts::render(prompts::RESEARCH_LEAD_PROMPT, &tool_name),
        subagents: vec![research_subagent, citations_agent],
        tools: vec![FILE_READ.to_string(), FILE_WRITE.to_string()],
        disable_parallel_tool_calling: true,
        session_manager,
        trace_attributes: session_id.map(trace_attributes),
    };

    Ok(DeepAgent::new(spec, research_tool, options))
}

/// A runnable research agent: three `graph_flow` tasks wired in sequence.
pub struct DeepAgent {
    spec: AgentSpec,
    graph: Arc<graph_flow::Graph>,
    start_task: String,
    history_limit: usize,
}

impl DeepAgent {
    fn new(spec: AgentSpec, search: DynSearchBackend, options: AgentOptions) -> Self {
        let files = FileTools::new(options.working_dir);
        let lead = Arc::new(LeadTask::new(spec.instructions.clone()));
        let subagent = Arc::new(ResearchSubagentTask::new(
            search,
            files.clone(),
            options.search_interval,
        ));
        let citations = Arc::new(CitationsTask::new(files));

        let graph = GraphBuilder::new("deepsearch_agent")
            .add_task(lead.clone())
            .add_task(subagent.clone())
            .add_task(citations.clone())
            .add_edge(lead.id(), subagent.id())
            .add_edge(subagent.id(), citations.id())
            .set_start_task(lead.id())
            .build();

        Self {
            spec,
            graph: Arc::new(graph),
            start_task: lead.id().to_string(),
            history_limit: options.history_limit,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// Run the agent once for `prompt`.
    #[instrument(name = "agent.invoke", skip(self, prompt), fields(trace = ?self.spec.trace_attributes))]
    pub async fn invoke(&self, prompt: &str) -> Result<AgentOutput, InvocationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(InvocationError::other("prompt cannot be empty"));
        }

        let history: Vec<String> = match &self.spec.session_manager {
            Some(manager) => manager
                .history(self.history_limit)
                .await
                .into_iter()
                .filter(|turn| turn.role == TurnRole::User)
                .map(|turn| turn.text)
                .collect(),
            None => Vec::new(),
        };

        let output = self
            .execute(prompt, &history)
            .await
            .map_err(|err| InvocationError::event_loop(err.to_string()))??;

        if let Some(manager) = &self.spec.session_manager {
            manager.record_exchange(prompt, &output.message).await;
        }
        info!(todos = output.todos.len(), "agent run completed");
        Ok(output)
    }

    /// Outer error: the graph engine itself failed. Inner error: a task failed.
    async fn execute(
        &self,
        prompt: &str,
        history: &[String],
    ) -> anyhow::Result<Result<AgentOutput, InvocationError>> {
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(self.graph.clone(), storage.clone());

        let run_id = Uuid::new_v4().to_string();
        let session = Session::new_from_task(run_id.clone(), &self.start_task);
        session.context.set(PROMPT_KEY, prompt.to_string()).await;
        session.context.set(HISTORY_KEY, history).await;
        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist agent state: {err}"))?;

        loop {
            let result = runner
                .run(&run_id)
                .await
                .map_err(|err| anyhow!("graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(anyhow!(message)),
            }
        }

        let session = storage
            .get(&run_id)
            .await
            .map_err(|err| anyhow!("failed to reload agent state: {err}"))?
            .ok_or_else(|| anyhow!("agent state missing after execution"))?;

        if let Some(failure) = session.context.get::<InvocationError>(FAILURE_KEY).await {
            return Ok(Err(failure));
        }

        let message: String = session
            .context
            .get(MESSAGE_KEY)
            .await
            .ok_or_else(|| anyhow!("agent finished without a response"))?;
        let todos: Vec<TodoItem> = session.context.get(TODOS_KEY).await.unwrap_or_default();

        Ok(Ok(AgentOutput { message, todos }))
    }
}
