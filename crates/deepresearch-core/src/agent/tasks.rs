use std::time::Duration;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::tools::FileTools;
use super::{TodoItem, TodoStatus};
use crate::error::InvocationError;
use crate::outputs::{FINDINGS_PREFIX, RESEARCH_DOCUMENTS_PREFIX};
use crate::search::DynSearchBackend;

pub(crate) const LEAD_TASK_ID: &str = "research_lead";
pub(crate) const SUBAGENT_TASK_ID: &str = "research_subagent";
pub(crate) const CITATIONS_TASK_ID: &str = "citations_agent";

pub(crate) const PROMPT_KEY: &str = "prompt";
pub(crate) const HISTORY_KEY: &str = "history";
pub(crate) const PLAN_KEY: &str = "plan.topics";
pub(crate) const TODOS_KEY: &str = "agent.todos";
pub(crate) const MESSAGE_KEY: &str = "agent.message";
pub(crate) const FAILURE_KEY: &str = "agent.failure";

pub const REPORT_FILE: &str = "research_report.md";

const PLAN_TODO: &str = "plan";
const REPORT_TODO: &str = "report";
const CITATIONS_TODO: &str = "citations";
const SUMMARY_LIMIT: usize = 400;
const SLUG_WORDS: usize = 4;

/// (slug suffix, title, query suffix)
const ANGLES: [(&str, &str, &str); 3] = [
    ("overview", "Overview", ""),
    ("recent_developments", "Recent developments", " recent developments"),
    ("open_challenges", "Open challenges", " open challenges and risks"),
];

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'()\[\]{},]+"#).expect("invalid url regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchTopic {
    pub slug: String,
    pub title: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicFindings {
    pub title: String,
    pub query: String,
    pub summary: String,
    pub sources: Vec<String>,
}

fn slugify(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(SLUG_WORDS)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        "topic".to_string()
    } else {
        words.join("_")
    }
}

pub(crate) fn plan_topics(prompt: &str) -> Vec<ResearchTopic> {
    let base = slugify(prompt);
    let prompt = prompt.trim().trim_end_matches('.');
    ANGLES
        .iter()
        .map(|(suffix, title, query_suffix)| ResearchTopic {
            slug: format!("{base}_{suffix}"),
            title: (*title).to_string(),
            query: format!("{prompt}{query_suffix}"),
        })
        .collect()
}

fn research_todo_id(slug: &str) -> String {
    format!("research:{slug}")
}

fn initial_todos(topics: &[ResearchTopic], history_turns: usize) -> Vec<TodoItem> {
    let mut todos = vec![TodoItem::new(
        PLAN_TODO,
        if history_turns > 0 {
            format!("Plan research strategy ({history_turns} earlier questions in this session)")
        } else {
            "Plan research strategy".to_string()
        },
    )];
    todos.extend(
        topics
            .iter()
            .map(|topic| TodoItem::new(research_todo_id(&topic.slug), format!("Research: {}", topic.query))),
    );
    todos.push(TodoItem::new(REPORT_TODO, "Synthesize findings into research_report.md"));
    todos.push(TodoItem::new(CITATIONS_TODO, "Add citations and references"));
    todos
}

async fn set_todo_status(context: &Context, id: &str, status: TodoStatus) {
    let mut todos: Vec<TodoItem> = context.get(TODOS_KEY).await.unwrap_or_default();
    if let Some(todo) = todos.iter_mut().find(|todo| todo.id == id) {
        todo.status = status;
    }
    context.set(TODOS_KEY, &todos).await;
}

/// Park the failure in the context and stop the graph.
async fn fail(context: &Context, task: &str, error: InvocationError) -> graph_flow::Result<TaskResult> {
    warn!(task, error = %error, "agent task failed");
    context.set(FAILURE_KEY, &error).await;
    Ok(TaskResult::new(Some(error.to_string()), NextAction::End))
}

/// Plans topics and the todo list.
pub struct LeadTask {
    instructions: String,
}

impl LeadTask {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }
}

#[async_trait]
impl Task for LeadTask {
    fn id(&self) -> &str {
        LEAD_TASK_ID
    }

    #[instrument(name = "task.research_lead", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let Some(prompt) = context.get::<String>(PROMPT_KEY).await else {
            return fail(&context, LEAD_TASK_ID, InvocationError::other("no prompt supplied")).await;
        };
        let history: Vec<String> = context.get(HISTORY_KEY).await.unwrap_or_default();

        let topics = plan_topics(&prompt);
        let mut todos = initial_todos(&topics, history.len());
        if let Some(plan) = todos.first_mut() {
            plan.status = TodoStatus::Completed;
        }

        debug!(instructions_len = self.instructions.len(), "lead agent instructions loaded");
        info!(topics = topics.len(), history = history.len(), "research plan created");

        context.set(PLAN_KEY, &topics).await;
        context.set(TODOS_KEY, &todos).await;

        Ok(TaskResult::new(
            Some(format!("Planned {} research topics", topics.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Searches each planned topic in turn and writes documents and findings.
pub struct ResearchSubagentTask {
    search: DynSearchBackend,
    files: FileTools,
    interval: Duration,
}

impl ResearchSubagentTask {
    pub fn new(search: DynSearchBackend, files: FileTools, interval: Duration) -> Self {
        Self {
            search,
            files,
            interval,
        }
    }

    async fn record_topic(
        &self,
        topic: &ResearchTopic,
        body: &str,
    ) -> Result<TopicFindings, crate::DeepResearchError> {
        let sources = extract_sources(body);
        let documents_dir = format!("{RESEARCH_DOCUMENTS_PREFIX}{}", topic.slug);

        if sources.is_empty() {
            let document = source_document(1, None, topic, body);
            self.files
                .write(&format!("{documents_dir}/source_1.md"), &document)
                .await?;
        }
        for (index, url) in sources.iter().enumerate() {
            let n = index + 1;
            let document = source_document(n, Some(url), topic, body);
            self.files
                .write(&format!("{documents_dir}/source_{n}.md"), &document)
                .await?;
        }

        let findings = TopicFindings {
            title: topic.title.clone(),
            query: topic.query.clone(),
            summary: summarize(body),
            sources,
        };
        self.files
            .write(
                &format!("{FINDINGS_PREFIX}{}.md", topic.slug),
                &findings_document(&findings),
            )
            .await?;
        Ok(findings)
    }
}

#[async_trait]
impl Task for ResearchSubagentTask {
    fn id(&self) -> &str {
        SUBAGENT_TASK_ID
    }

    #[instrument(name = "task.research_subagent", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let topics: Vec<ResearchTopic> = context.get(PLAN_KEY).await.unwrap_or_default();
        let mut findings = Vec::with_capacity(topics.len());

        for (index, topic) in topics.iter().enumerate() {
            if index > 0 && !self.interval.is_zero() {
                sleep(self.interval).await;
            }

            let todo_id = research_todo_id(&topic.slug);
            set_todo_status(&context, &todo_id, TodoStatus::InProgress).await;

            let body = match self.search.search(&topic.query).await {
                Ok(body) => body,
                Err(err) => return fail(&context, SUBAGENT_TASK_ID, err).await,
            };

            match self.record_topic(topic, &body).await {
                Ok(topic_findings) => {
                    info!(
                        topic = %topic.slug,
                        sources = topic_findings.sources.len(),
                        "topic research recorded"
                    );
                    findings.push(topic_findings);
                }
                Err(err) => return fail(&context, SUBAGENT_TASK_ID, err.into()).await,
            }

            set_todo_status(&context, &todo_id, TodoStatus::Completed).await;
        }

        Ok(TaskResult::new(
            Some(format!("Researched {} topics", findings.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Writes the cited report and finishes the run.
pub struct CitationsTask {
    files: FileTools,
}

impl CitationsTask {
    pub fn new(files: FileTools) -> Self {
        Self { files }
    }

    /// Load each topic's findings document written by the research sub-agent.
    async fn read_findings(&self, topics: &[ResearchTopic]) -> Result<Vec<TopicFindings>, InvocationError> {
        let mut findings = Vec::with_capacity(topics.len());
        for topic in topics {
            let name = format!("{FINDINGS_PREFIX}{}.md", topic.slug);
            let document = self.files.read(&name).await?;
            let parsed = parse_findings(&document)
                .ok_or_else(|| InvocationError::other(format!("malformed findings document {name}")))?;
            findings.push(parsed);
        }
        Ok(findings)
    }
}

#[async_trait]
impl Task for CitationsTask {
    fn id(&self) -> &str {
        CITATIONS_TASK_ID
    }

    #[instrument(name = "task.citations", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let prompt: String = context.get(PROMPT_KEY).await.unwrap_or_default();
        let history: Vec<String> = context.get(HISTORY_KEY).await.unwrap_or_default();
        let topics: Vec<ResearchTopic> = context.get(PLAN_KEY).await.unwrap_or_default();

        set_todo_status(&context, REPORT_TODO, TodoStatus::InProgress).await;
        let findings = match self.read_findings(&topics).await {
            Ok(findings) => findings,
            Err(err) => return fail(&context, CITATIONS_TASK_ID, err).await,
        };
        let report = compose_report(&prompt, &history, &findings);
        set_todo_status(&context, REPORT_TODO, TodoStatus::Completed).await;

        if let Err(err) = self.files.write(REPORT_FILE, &report).await {
            return fail(&context, CITATIONS_TASK_ID, err.into()).await;
        }
        set_todo_status(&context, CITATIONS_TODO, TodoStatus::Completed).await;

        context.set(MESSAGE_KEY, &report).await;
        info!(topics = findings.len(), "cited report written");

        Ok(TaskResult::new(Some(report), NextAction::End))
    }
}

fn extract_sources(body: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for found in URL_PATTERN.find_iter(body) {
        let url = found.as_str().trim_end_matches(['.', ';', ':']);
        if !sources.iter().any(|seen| seen == url) {
            sources.push(url.to_string());
        }
    }
    sources
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Short summary of a search result: the provider's answer field when the body
/// is JSON, otherwise the first meaningful line.
fn summarize(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(answer) = map.get("answer").and_then(Value::as_str) {
            return truncate(answer.trim());
        }
    }

    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.eq_ignore_ascii_case("sources:"))
        .map(|line| line.strip_prefix("Answer:").unwrap_or(line).trim())
        .map(truncate)
        .unwrap_or_else(|| "No summary available.".to_string())
}

fn source_document(n: usize, url: Option<&str>, topic: &ResearchTopic, body: &str) -> String {
    format!(
        "# Source {n}\n\n- Topic: {}\n- Query: {}\n- URL: {}\n\n## Search result\n\n{}\n",
        topic.title,
        topic.query,
        url.unwrap_or("n/a"),
        body.trim()
    )
}

fn findings_document(findings: &TopicFindings) -> String {
    let mut doc = format!(
        "# Findings: {}\n\nQuery: {}\n\n{}\n\n## Sources\n\n",
        findings.title, findings.query, findings.summary
    );
    if findings.sources.is_empty() {
        doc.push_str("(no sources found)\n");
    }
    for source in &findings.sources {
        doc.push_str(&format!("- {source}\n"));
    }
    doc
}

fn parse_findings(document: &str) -> Option<TopicFindings> {
    let rest = document.strip_prefix("# Findings: ")?;
    let (title, rest) = rest.split_once('\n')?;
    let rest = rest.trim_start().strip_prefix("Query: ")?;
    let (query, rest) = rest.split_once('\n')?;
    let (summary, sources) = rest.rsplit_once("## Sources")?;
    let sources = sources
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(str::to_string)
        .collect();
    Some(TopicFindings {
        title: title.trim().to_string(),
        query: query.trim().to_string(),
        summary: summary.trim().to_string(),
        sources,
    })
}

fn compose_report(prompt: &str, history: &[String], findings: &[TopicFindings]) -> String {
    let mut references: Vec<&str> = Vec::new();
    let mut report = format!("# Research Report: {}\n\n", prompt.trim());

    if !history.is_empty() {
        report.push_str("## Context\n\nEarlier questions in this session:\n\n");
        for question in history {
            report.push_str(&format!("- {question}\n"));
        }
        report.push('\n');
    }

    report.push_str("## Findings\n\n");
    for topic in findings {
        let citations: Vec<String> = topic
            .sources
            .iter()
            .map(|source| {
                let index = match references.iter().position(|seen| *seen == source.as_str()) {
                    Some(index) => index,
                    None => {
                        references.push(source);
                        references.len() - 1
                    }
                };
                format!("[{}]", index + 1)
            })
            .collect();
        report.push_str(&format!("### {}\n\n{}", topic.title, topic.summary));
        if !citations.is_empty() {
            report.push(' ');
            report.push_str(&citations.join(""));
        }
        report.push_str("\n\n");
    }

    report.push_str("## References\n\n");
    if references.is_empty() {
        report.push_str("No sources were found.\n");
    }
    for (index, source) in references.iter().enumerate() {
        report.push_str(&format!("{}. {source}\n", index + 1));
    }
    report
}
