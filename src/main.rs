// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, SessionsCommands};
use mitto_acp::{AcpConnection, AgentSpawnSpec};
use mitto_core::{
    AgentConnection, AgentConnectionFactory, CoreError, HookPipeline, PendingToolCorrelation,
    PeriodicScheduler, SessionManager, SessionMetadata, DEFAULT_QUEUE_MAX_SIZE,
};
use mitto_config::{Config, ConfigError};
use mitto_toolserver::ToolContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    match &cli.command {
        Commands::ShowConfig => show_config(cli.config.as_deref()),
        Commands::Sessions { command } => match command {
            SessionsCommands::List => sessions_list(cli.config.as_deref()).await,
        },
        Commands::Serve => serve(cli.config.as_deref()).await,
    }
}

/// Load configuration, exiting `2` immediately on a file that parses as
/// YAML but fails schema validation (`ConfigError::Invalid`) per the exit
/// code contract. An unreadable file is returned as an ordinary `anyhow`
/// error so the caller's `main` exits `1`.
fn load_config_or_exit(config_path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match mitto_config::load_with_env_override(config_path) {
        Ok(config) => Ok(config),
        Err(err @ ConfigError::Invalid { .. }) => {
            eprintln!("invalid config: {err}");
            std::process::exit(2);
        }
        Err(err @ ConfigError::Unreadable { .. }) => Err(err.into()),
    }
}

fn init_logging() {
    let level = std::env::var("MITTO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn resolve_state_dir() -> PathBuf {
    std::env::var("MITTO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mitto")
        })
}

fn show_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config_or_exit(config_path)?;
    println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
    Ok(())
}

/// List sessions known to the on-disk store, without starting the
/// scheduler or any agent subprocess.
async fn sessions_list(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let _config = load_config_or_exit(config_path)?;
    let sessions_dir = resolve_state_dir().join("sessions");

    let mut metas: Vec<SessionMetadata> = Vec::new();
    if sessions_dir.is_dir() {
        for entry in std::fs::read_dir(&sessions_dir)
            .with_context(|| format!("reading {}", sessions_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join("metadata.json");
            if let Some(meta) = mitto_core::persistence::read_json_optional::<SessionMetadata>(&meta_path)? {
                metas.push(meta);
            }
        }
    }
    metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if metas.is_empty() {
        println!("No sessions found.");
        println!("Session store: {}", sessions_dir.display());
        return Ok(());
    }

    let id_w = metas.iter().map(|m| m.session_id.len()).max().unwrap_or(10).max(10);
    let name_w = metas.iter().map(|m| m.name.len()).max().unwrap_or(8).max(8);
    println!(
        "{:<id_w$}  {:<name_w$}  {:<8}  LAST MESSAGE",
        "ID", "NAME", "ARCHIVED",
        id_w = id_w,
        name_w = name_w,
    );
    println!("{}", "-".repeat(id_w + name_w + 40));
    for m in &metas {
        let last = m
            .last_user_message_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<id_w$}  {:<name_w$}  {:<8}  {}",
            m.session_id, m.name, m.archived, last,
            id_w = id_w,
            name_w = name_w,
        );
    }
    println!("\nTotal: {} session(s)", metas.len());
    Ok(())
}

/// Start the `SessionManager`, `PeriodicScheduler`, and both tool-server
/// transports; block until SIGINT/SIGTERM, then shut down gracefully.
async fn serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Arc::new(load_config_or_exit(config_path)?);
    let state_dir = resolve_state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;

    let hooks = Arc::new(HookPipeline::new(config.hooks.clone()));
    let agent_factory = build_agent_factory(config.clone());

    let manager = Arc::new(SessionManager::new(
        state_dir,
        DEFAULT_QUEUE_MAX_SIZE,
        hooks,
        agent_factory,
    ));

    let scheduler = Arc::new(PeriodicScheduler::new());
    scheduler.start(manager.clone()).await;

    let correlation = Arc::new(PendingToolCorrelation::new());
    let tool_ctx = Arc::new(ToolContext::new(manager.clone(), correlation, config.clone()));
    let registry = Arc::new(mitto_toolserver::build_tool_registry(tool_ctx.clone(), None));

    let http_host = config.web.host.clone();
    let http_port = config.web.port;
    let http_listener = mitto_toolserver::bind_http(&http_host, http_port)
        .await
        .with_context(|| format!("binding HTTP tool-server transport on {http_host}:{http_port}"))?;

    let http_registry = registry.clone();
    let http_ctx = tool_ctx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(err) = mitto_toolserver::serve_http(http_registry, http_ctx, http_listener).await {
            tracing::error!(%err, "HTTP tool-server transport exited");
        }
    });

    let stdio_registry = registry.clone();
    let stdio_ctx = tool_ctx.clone();
    let stdio_task = tokio::spawn(async move {
        if let Err(err) = mitto_toolserver::serve_stdio(stdio_registry, stdio_ctx).await {
            tracing::warn!(%err, "stdio tool-server transport exited");
        }
    });

    tracing::info!(port = http_port, "mitto serving");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping gracefully");

    scheduler.stop().await;
    http_task.abort();
    stdio_task.abort();

    for meta in manager.list_running().await {
        if let Err(err) = manager
            .close_gracefully(&meta.session_id, "server shutdown", std::time::Duration::from_secs(10))
            .await
        {
            tracing::warn!(session_id = %meta.session_id, %err, "error closing session during shutdown");
        }
    }

    Ok(())
}

/// Build the synchronous [`AgentConnectionFactory`] the manager calls to
/// spawn a fresh [`AgentConnection`] for a named `acp_servers` entry.
/// `AcpConnection::spawn` is async; the factory contract is not, so the
/// spawn is driven to completion on a blocking context inline.
fn build_agent_factory(config: Arc<Config>) -> AgentConnectionFactory {
    Arc::new(move |name: &str| {
        let server = config
            .acp_servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::NotFound(format!("unknown acp_server: {name}")))?;

        let (command, args) = server
            .command
            .split_first()
            .ok_or_else(|| CoreError::Validation(format!("acp_server {name} has an empty command")))?;
        let spec = AgentSpawnSpec::new(command, args.to_vec());

        let connection = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(AcpConnection::spawn(spec))
        })
        .map_err(CoreError::from)?;

        Ok(Arc::new(connection) as Arc<dyn AgentConnection>)
    })
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
