use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use deepresearch_core::outputs::build_object_store;
use deepresearch_core::remote::{
    DEFAULT_REGION, HttpRuntimeInvoker, RuntimeInvoker, invoke_runtime,
};
use deepresearch_core::{
    DEFAULT_PROMPT, InternetSearch, LoggingOptions, OutputKind, OutputUploader, ResearchRuntime,
    RetryPolicy, RuntimeConfig, StaticSearch, init_logging, invoke_with_retry,
    load_dotenv_if_requested,
};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "deepresearch",
    version,
    about = "DeepResearch multi-agent research runtime"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the research agent locally, retrying transient failures.
    Run(RunArgs),
    /// Send one prompt to a deployed runtime and print the response.
    Invoke(InvokeArgs),
    /// Upload a single output file under a session prefix.
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research question.
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Directory the agent writes its documents into (defaults to DEEPRESEARCH_WORKING_DIR or cwd).
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Use canned search results instead of the configured search providers.
    #[arg(long)]
    offline: bool,
}

#[derive(Args, Debug)]
struct InvokeArgs {
    /// Agent runtime ARN.
    #[arg(long, required_unless_present = "endpoint")]
    agent_arn: Option<String>,

    /// Prompt to send to the agent.
    #[arg(long)]
    prompt: String,

    /// AWS region of the runtime.
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// Session id for conversation continuity (generated when omitted).
    #[arg(long)]
    session_id: Option<String>,

    /// Invoke a runtime over HTTP instead, e.g. http://localhost:8080.
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Session id used as the key prefix.
    #[arg(long)]
    session_id: String,

    /// File to upload.
    #[arg(long)]
    path: PathBuf,

    /// `final` or `intermediate`.
    #[arg(long, default_value = "final")]
    output_type: OutputKind,
}

fn main() -> Result<()> {
    load_dotenv_if_requested();
    init_logging(LoggingOptions::default())?;

    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
            Command::Invoke(args) => invoke_command(args).await?,
            Command::Upload(args) => upload_command(args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    let mut config = RuntimeConfig::from_env()?;
    if let Some(dir) = args.working_dir {
        config = config.with_working_dir(dir);
    }
    info!(enabled = config.bypass_tool_consent, "BYPASS_TOOL_CONSENT status");

    let mut runtime = ResearchRuntime::from_config(config).await;
    if args.offline {
        runtime = runtime.with_search(Arc::new(StaticSearch::new(InternetSearch::TOOL_NAME)));
    }

    let agent = runtime.create_local_agent().await?;
    let policy = RetryPolicy::default();
    let output = invoke_with_retry(&policy, |attempt| {
        info!(attempt, max_attempts = policy.max_attempts, "starting agent execution");
        agent.invoke(&args.prompt)
    })
    .await?;

    info!("research completed successfully");
    println!("{}", output.message);

    if !output.todos.is_empty() {
        println!("\nResearch Plan Execution:");
        for todo in &output.todos {
            println!("  {} {}", todo.status.icon(), todo.content);
        }
    }
    Ok(())
}

async fn invoke_command(args: InvokeArgs) -> Result<()> {
    let invoker: Box<dyn RuntimeInvoker> = match (args.endpoint, args.agent_arn) {
        (Some(endpoint), _) => Box::new(HttpRuntimeInvoker::new(endpoint)?),
        (None, Some(arn)) => agentcore_invoker(arn, args.region).await?,
        (None, None) => bail!("either --agent-arn or --endpoint is required"),
    };

    let (session_id, response) =
        invoke_runtime(invoker.as_ref(), &args.prompt, args.session_id).await?;
    info!(session_id = %session_id, "runtime responded");
    println!("Agent Response: {}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(feature = "aws")]
async fn agentcore_invoker(arn: String, region: String) -> Result<Box<dyn RuntimeInvoker>> {
    use deepresearch_core::remote::AgentCoreInvoker;
    Ok(Box::new(AgentCoreInvoker::new(arn, region).await))
}

#[cfg(not(feature = "aws"))]
async fn agentcore_invoker(_arn: String, _region: String) -> Result<Box<dyn RuntimeInvoker>> {
    bail!(
        "invoking by ARN requires building with `--features deepresearch-cli/aws`; use --endpoint for HTTP runtimes"
    )
}

async fn upload_command(args: UploadArgs) -> Result<()> {
    let config = RuntimeConfig::from_env()?;
    let store = build_object_store(&config.outputs.store, config.aws_region.clone()).await;
    let uploader = OutputUploader::new(store, config.outputs.bucket.clone());

    match uploader
        .upload_single_file(&args.session_id, &args.path, args.output_type)
        .await
    {
        Some(uri) => {
            println!("{uri}");
            Ok(())
        }
        None => bail!("upload of {} failed", args.path.display()),
    }
}
