use anyhow::{Context, Result};
use deepresearch_core::{
    LoggingOptions, ResearchRuntime, RuntimeConfig, init_logging, load_dotenv_if_requested,
};
use deepresearch_runtime::{AppState, build_router};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv_if_requested();
    init_logging(LoggingOptions::default())?;

    let config = RuntimeConfig::from_env()?;
    let addr = config.listen_addr.clone();
    let runtime = ResearchRuntime::from_config(config).await;
    runtime
        .load_secrets()
        .await
        .context("failed to load secrets at startup")?;
    let state = AppState::new(runtime);
    info!(
        max_sessions = state.max_sessions,
        "agent runtime ready"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "listening for invocations");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
