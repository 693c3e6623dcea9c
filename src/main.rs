//! opsdeck - module ordering and offline sync service for the operations
//! dashboard

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use opsdeck::api;
use opsdeck::config::Config;
use opsdeck::connectivity::{self, Connectivity};
use opsdeck::handlers::{HandlerTable, RestHandler};
use opsdeck::order::ModuleOrderEngine;
use opsdeck::orchestrator::SyncOrchestrator;
use opsdeck::queue::SyncQueue;
use opsdeck::registry::Role;
use opsdeck::store::Store;

#[derive(Parser)]
#[command(name = "opsdeck")]
#[command(about = "Module ordering and offline sync service for the operations dashboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the local API and sync orchestrator
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the module order for a role
    Modules {
        /// Role to show modules for (admin, manager, technician)
        #[arg(short, long)]
        role: Role,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect or clear persisted sync state
    Sync {
        #[command(subcommand)]
        action: SyncCommand,

        /// Config file path
        #[arg(short, long, global = true)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Show pending changes and the last drain
    Status,
    /// Show drain history, most recent first
    History,
    /// Clear drain history (pending changes are kept)
    ClearHistory,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("opsdeck=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, bind } => {
            let mut cfg = load_config(config)?;

            // Override with CLI args
            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            Config::default().save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Set [backend] url to the API queued changes are replayed against");
            println!("  2. Start the service: opsdeck serve --config {}", path.display());

            Ok(())
        }

        Commands::Modules { role, config } => {
            let cfg = load_config(config)?;
            let store = Arc::new(Store::open(&cfg.storage.path));
            let engine = ModuleOrderEngine::new(store, Arc::new(cfg.registry()?));

            println!("Modules for {}:", role);
            println!();
            for (position, entry) in engine.ordered_modules(role).iter().enumerate() {
                let mut flags = Vec::new();
                if entry.is_pinned {
                    flags.push("pinned");
                }
                if entry.is_in_progress {
                    flags.push("in progress");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                println!(
                    "  {:>2}. {} ({}){}",
                    position + 1,
                    entry.module.title,
                    entry.module.id,
                    flags
                );
            }

            Ok(())
        }

        Commands::Sync { action, config } => {
            let cfg = load_config(config)?;
            let store = Arc::new(Store::open(&cfg.storage.path));
            let queue = SyncQueue::new(store).with_history_capacity(cfg.sync.history_capacity);

            match action {
                SyncCommand::Status => {
                    let pending = queue.pending_items();
                    println!("Pending changes: {}", pending.len());
                    for item in &pending {
                        println!("  {} {}", item.timestamp.to_rfc3339(), item.label());
                    }
                    match queue.history().first() {
                        Some(last) => println!(
                            "Last drain: {} ({} ok, {} failed)",
                            last.timestamp.to_rfc3339(),
                            last.success_count,
                            last.error_count
                        ),
                        None => println!("Last drain: never"),
                    }
                }
                SyncCommand::History => {
                    let history = queue.history();
                    if history.is_empty() {
                        println!("No sync history.");
                    }
                    for entry in history {
                        println!(
                            "{}  {} items, {} ok, {} failed",
                            entry.timestamp.to_rfc3339(),
                            entry.total_items,
                            entry.success_count,
                            entry.error_count
                        );
                        for line in &entry.details {
                            println!("    {}", line);
                        }
                    }
                }
                SyncCommand::ClearHistory => {
                    queue.clear_history();
                    println!("Sync history cleared.");
                }
            }

            Ok(())
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(Store::open(&config.storage.path));
    let registry = Arc::new(config.registry()?);
    let engine = ModuleOrderEngine::new(store.clone(), registry);

    let queue = Arc::new(
        SyncQueue::new(store)
            .with_history_capacity(config.sync.history_capacity)
            .with_failed_items(config.sync.failed_items),
    );

    // Replay target; without one every queued change fails
    let handlers = match &config.backend.url {
        Some(url) => RestHandler::new(url, config.backend.timeout())
            .context("Failed to set up backend handler")?
            .into_table(),
        None => {
            tracing::warn!("No backend url configured, queued changes cannot be replayed");
            HandlerTable::new()
        }
    };

    let connectivity = Connectivity::new(config.connectivity.initially_online);
    let orchestrator = SyncOrchestrator::new(
        queue,
        handlers,
        connectivity.clone(),
        config.sync.settle_delay(),
    );

    // Start background tasks
    let cancel = CancellationToken::new();
    let watcher = orchestrator.spawn(cancel.clone());

    if let (Some(secs), Some(url)) = (config.connectivity.probe_interval_secs, &config.backend.url) {
        tokio::spawn(connectivity::probe_loop(
            connectivity,
            url.clone(),
            Duration::from_secs(secs),
            config.backend.timeout(),
            cancel.clone(),
        ));
    }

    // Create router
    let state = api::AppState::new(engine, orchestrator);
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("🚀 opsdeck listening on http://{}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            shutdown.cancel();
        })
        .await?;

    // Let an in-flight drain finish before exiting
    cancel.cancel();
    watcher.await.context("Sync orchestrator task failed")?;
    tracing::info!("Shut down cleanly");

    Ok(())
}
