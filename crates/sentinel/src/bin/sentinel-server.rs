//! Sentinel service binary.
//!
//! Standalone HTTP service for GitHub issue resolution webhooks.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel::{
    build_router, AiderAgent, AppState, Config, GitHubClient, IssueProcessor, WorkspaceManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sentinel=info".parse()?))
        .init();

    info!("Starting sentinel service...");

    // Load configuration
    let config = Config::default();
    config.validate().context("Invalid configuration")?;

    let github = Arc::new(GitHubClient::new(&config.github).context("GitHub client setup failed")?);

    let agent: Arc<dyn sentinel::CodingAgent> = Arc::new(AiderAgent::new(&config.agent));

    let workspaces = Arc::new(WorkspaceManager::new(
        config.workspace_base_dir.clone(),
        config.git.clone(),
    ));
    workspaces.sweep();

    let processor = Arc::new(IssueProcessor::new(
        github.clone(),
        agent.clone(),
        workspaces,
        config.labels.clone(),
        config.git.clone(),
    ));

    if config.webhook_secret.is_none() {
        info!("GITHUB_WEBHOOK_SECRET not set - webhook signatures will not be verified");
    }

    // Build application state
    let state = AppState {
        config: config.clone(),
        github,
        processor,
        agent,
    };

    // Build router
    let app = build_router(state);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = config.port, "Sentinel service listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
