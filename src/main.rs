//! dynproxy control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!   seed file ──(config::seed)──┐
//!   admin writes ───────────────┤
//!                               ▼
//!                        ┌─────────────┐   snapshot / watch   ┌──────────────┐
//!                        │   KvStore   │─────────────────────▶│    Engine    │
//!                        └─────────────┘                      └──────┬───────┘
//!                                                                    │ Change
//!                                                                    ▼
//!                        ┌─────────────┐      apply           ┌──────────────┐
//!                        │  Topology   │◀─────────────────────│  Reconciler  │
//!                        └──────┬──────┘                      └──────────────┘
//!                               │ read-only
//!                               ▼
//!                          admin API
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use dynproxy::admin::{self, AdminState};
use dynproxy::config::loader::load_config;
use dynproxy::config::validation::validate_config;
use dynproxy::config::watcher::{apply_updates, SeedWatcher};
use dynproxy::config::{apply_seed, ControlConfig, SeedFile};
use dynproxy::lifecycle::signals::spawn_signal_handler;
use dynproxy::lifecycle::startup::build_engine;
use dynproxy::lifecycle::{Shutdown, Supervisor};
use dynproxy::observability::{logging, metrics};
use dynproxy::secret::AeadBox;
use dynproxy::store::MemoryStore;
use dynproxy::{Reconciler, Topology};

#[derive(Parser)]
#[command(name = "dynproxy")]
#[command(about = "Control plane for a dynamically reconfigurable reverse proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Topology seed file (overrides `seed.path`).
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Key prefix of the configuration namespace (overrides `engine.root`).
    #[arg(long)]
    root: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane (default)
    Run,
    /// Print a fresh base64 sealing key
    GenerateKey,
    /// Validate the configuration and seed file, then exit
    Check,
}

fn resolve_config(cli: &Cli) -> Result<ControlConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ControlConfig::default(),
    };
    if let Some(seed) = &cli.seed {
        config.seed.path = Some(seed.clone());
    }
    if let Some(root) = &cli.root {
        config.engine.root = root.clone();
    }
    validate_config(&config).map_err(dynproxy::config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateKey) => {
            println!("{}", AeadBox::generate_key());
            return Ok(());
        }
        Some(Commands::Check) => {
            let config = resolve_config(&cli)?;
            if let Some(path) = &config.seed.path {
                let seed = SeedFile::load(path)?;
                println!(
                    "seed ok: {} hosts, {} listeners, {} backends, {} frontends",
                    seed.hosts.len(),
                    seed.listeners.len(),
                    seed.backends.len(),
                    seed.frontends.len()
                );
            }
            println!("config ok");
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = resolve_config(&cli)?;
    logging::init_logging(config.observability.log_level.as_deref());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dynproxy starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let store = Arc::new(MemoryStore::new());
    let engine = build_engine(store, &config)?;

    if let Some(path) = &config.seed.path {
        let seed = SeedFile::load(path)?;
        apply_seed(&engine, &seed).await?;
    }

    let shutdown = Arc::new(Shutdown::new());
    let signals = spawn_signal_handler(shutdown.clone());

    // The watcher handle stops watching when dropped.
    let _seed_watcher = match (&config.seed.path, config.seed.watch) {
        (Some(path), true) => {
            let (watcher, updates) = SeedWatcher::new(path);
            let handle = watcher.run()?;
            tokio::spawn(apply_updates(engine.clone(), updates, shutdown.subscribe()));
            Some(handle)
        }
        _ => None,
    };

    let topology = Arc::new(Topology::new());

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(topology.clone(), &config.admin.api_key);
        Some(tokio::spawn(admin::serve(listener, state, shutdown.subscribe())))
    } else {
        None
    };

    let supervisor = Supervisor::new(
        engine,
        Reconciler::new(topology.clone()),
        config.supervisor_settings(),
    );
    let reconciler = supervisor.run(shutdown.subscribe()).await;

    // The supervisor may also stop because the store went away.
    shutdown.trigger();
    signals.abort();
    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "Admin API failed");
        }
    }

    tracing::info!(revision = reconciler.revision(), "Shutdown complete");
    Ok(())
}
