use agreement_sync::config::Config;
use agreement_sync::dispatch::{DispatchSettings, Dispatcher};
use agreement_sync::git::{FetchSettings, GitFetcher};
use agreement_sync::ledger::CommitLedger;
use agreement_sync::pipeline::{CommitHandler, CommitProcessor};
use agreement_sync::server::{self, AppState};
use agreement_sync::storage::HttpObjectStore;
use agreement_sync::types::{CommitRef, validate_commit_hash};
use agreement_sync::upload::{
    Credentials, GraphQlUploadApi, SessionManager, UploadOrchestrator, UploadSettings,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "agreement-sync",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_COMMIT_HASH"),
        ", built ",
        env!("BUILD_TIMESTAMP"),
        ")"
    ),
    about = "Publishes agreement documents changed by pushed commits"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "AGREEMENT_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook server (default)
    Serve {
        /// Listen address, overrides `server.listen`
        #[arg(long)]
        listen: Option<String>,
    },
    /// Process one commit in the foreground and print its report
    Process {
        /// Commit hash to publish
        commit: String,
    },
    /// Print the effective configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
                config.validate()?;
            }
            serve(config).await
        }
        Command::Process { commit } => process(config, commit).await,
        Command::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn build_processor(config: &Config) -> Result<CommitProcessor> {
    let credentials = Credentials::from_config(config)?;
    let api = GraphQlUploadApi::new(config.record_store.endpoint.clone(), config.request_timeout())?;
    let store = HttpObjectStore::new(config.transfer_timeout())?;
    let session = SessionManager::new(credentials, config.session_ttl());
    let orchestrator = UploadOrchestrator::new(
        Arc::new(api),
        Arc::new(store),
        Arc::new(session),
        UploadSettings::from_config(config)?,
    );
    let fetcher = GitFetcher::new(FetchSettings::from_config(config));

    Ok(CommitProcessor::new(Arc::new(fetcher), Arc::new(orchestrator)))
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        version = agreement_sync::VERSION,
        commit = agreement_sync::GIT_COMMIT,
        built_at = agreement_sync::BUILD_TIMESTAMP,
        "Starting agreement-sync"
    );

    let ledger = if config.ledger.persist {
        CommitLedger::open(&config.ledger.path, config.replay_window())
            .with_context(|| format!("failed to open ledger {}", config.ledger.path.display()))?
    } else {
        CommitLedger::in_memory()
    };

    let processor = build_processor(&config)?;
    let (dispatcher, handle) = Dispatcher::start(
        Arc::new(processor),
        DispatchSettings::from_config(&config),
        config.shutdown_grace(),
    );

    let ledger = Arc::new(ledger);
    let state = Arc::new(AppState::new(Arc::clone(&ledger), dispatcher));
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    server::serve(listener, server::create_router(state), server::shutdown_signal()).await?;

    tracing::info!("HTTP server stopped, draining commit queue");
    if handle.shutdown().await {
        tracing::info!("agreement-sync shut down cleanly");
    } else {
        tracing::warn!("agreement-sync shut down with unfinished commits");
    }
    if let Err(e) = ledger.persist().await {
        tracing::warn!(error = %e, "Failed to persist commit ledger at shutdown");
    }
    Ok(())
}

async fn process(config: Config, commit: String) -> Result<()> {
    validate_commit_hash(&commit)?;
    let commit = commit.to_ascii_lowercase();
    let processor = build_processor(&config)?;

    let report = processor.handle(CommitRef::new(commit, String::new())).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.uploads.is_clean() {
        anyhow::bail!("{} file(s) failed to upload", report.uploads.failed.len());
    }
    Ok(())
}
