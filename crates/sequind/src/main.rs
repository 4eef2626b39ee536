//! `sequind` — the Sequin daemon.
//!
//! Runs the epoch sequencer of a key transparency directory: drains signed
//! mutations from the queue, advances the verifiable map one revision per
//! epoch, anchors each new signed map root into the append-only log, and
//! fans epoch summaries out to subscribers.
//!
//! # Usage
//!
//! ```text
//! sequind start                       # sequencer with in-process trees
//! sequind start -c sequin.toml        # with a config file
//! sequind start -e <endpoint_id>      # against a remote tree service
//! sequind trees                       # host dev trees over QUIC
//! ```

mod admin;
mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iroh::{EndpointAddr, SecretKey};
use prometheus::Registry;
use sequin_queue::MemoryQueue;
use sequin_sequencer::{Sequencer, SequencerConfig, SequencerMetrics};
use sequin_trees::{
    LogClient, MapClient, MemoryLog, MemoryMap, RemoteLog, RemoteMap, TreeService, TreeTransport,
};
use sequin_types::EntryMutator;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "sequind",
    version,
    about = "Sequin key transparency epoch sequencer"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the epoch sequencer.
    Start {
        /// Override the admin listen address (e.g. "127.0.0.1:4860").
        #[arg(short = 'l', long)]
        admin_addr: Option<String>,

        /// Tree service endpoint for remote mode.
        ///
        /// Format: `<endpoint_id>` or `<endpoint_id>@<host:port>`.
        /// Implies `[trees] mode = "remote"`.
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Host in-memory map and log trees over QUIC for development clusters.
    Trees,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    // Env vars override TOML values for OTel configuration.
    telemetry::init(&telemetry::TelemetryConfig {
        level: config.log.level.clone(),
        otlp_endpoint: std::env::var("OTLP_ENDPOINT")
            .ok()
            .or_else(|| config.telemetry.otlp_endpoint.clone()),
        otlp_headers: std::env::var("OTLP_HEADERS")
            .ok()
            .or_else(|| config.telemetry.otlp_headers.clone())
            .unwrap_or_default(),
        service_name: std::env::var("OTLP_SERVICE_NAME")
            .ok()
            .or_else(|| config.telemetry.service_name.clone())
            .unwrap_or_default(),
        map_id: config.trees.map_id,
        log_id: config.trees.log_id,
    });

    match cli.command {
        Commands::Start {
            admin_addr,
            endpoint,
        } => {
            // CLI args override config file values.
            if let Some(addr) = admin_addr {
                config.admin.listen_addr = addr;
            }
            if let Some(endpoint) = endpoint {
                config.trees.endpoint = Some(endpoint);
                config.trees.mode = "remote".to_string();
            }
            cmd_start(config).await
        }
        Commands::Trees => cmd_trees(config).await,
    }
}

// -----------------------------------------------------------------------
// sequind start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting sequind");
    info!(
        mode = %config.trees.mode,
        map_id = config.trees.map_id,
        log_id = config.trees.log_id,
        min_interval_ms = config.sequencer.min_interval_ms,
        max_interval_ms = config.sequencer.max_interval_ms,
        "sequencer configuration"
    );

    // --- Tree clients ---
    let (map, log): (Arc<dyn MapClient>, Arc<dyn LogClient>) = match config.trees.mode.as_str() {
        "remote" => {
            let endpoint = config
                .trees
                .endpoint
                .as_deref()
                .context("remote mode requires [trees] endpoint or --endpoint")?;
            let addr = parse_endpoint(endpoint)?;

            std::fs::create_dir_all(&config.node.data_dir)
                .context("failed to create data directory")?;
            let secret_key = load_or_create_secret_key(&config.node.data_dir)?;

            let transport = Arc::new(
                TreeTransport::bind(secret_key, iroh::RelayMode::Default)
                    .await
                    .context("failed to bind tree transport")?,
            );
            info!(endpoint = %endpoint, "using remote tree service");
            (
                Arc::new(RemoteMap::new(transport.clone(), addr.clone())),
                Arc::new(RemoteLog::new(transport, addr)),
            )
        }
        _ => {
            info!("using in-process trees");
            (
                Arc::new(MemoryMap::new(config.trees.map_id)),
                Arc::new(MemoryLog::new(config.trees.log_id)),
            )
        }
    };

    // --- Mutation queue ---
    // In-process intake, fed via the admin API. A production deployment
    // substitutes a MutationSource backed by the directory's database.
    let queue = MemoryQueue::new();

    // --- Metrics ---
    let registry = Registry::new();
    let metrics = Arc::new(
        SequencerMetrics::register(&registry).context("failed to register sequencer metrics")?,
    );

    // --- Sequencer ---
    let sequencer = Arc::new(Sequencer::new(
        SequencerConfig {
            min_interval: config.min_interval(),
            max_interval: config.max_interval(),
        },
        map,
        log,
        Arc::new(EntryMutator::new()),
        Arc::new(queue.clone()),
        metrics,
    ));

    // --- Latest-epoch cache for the admin API ---
    let latest = Arc::new(RwLock::new(None));
    let (summary_tx, mut summary_rx) = mpsc::channel(16);
    sequencer.register(summary_tx).await;
    {
        let latest = latest.clone();
        tokio::spawn(async move {
            while let Some(summary) = summary_rx.recv().await {
                info!(
                    epoch = summary.epoch,
                    mutations = summary.mutations.len(),
                    "epoch completed"
                );
                *latest.write().await = Some(summary);
            }
        });
    }

    // --- Epoch loop ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let sequencer = sequencer.clone();
        tokio::spawn(async move {
            sequencer.run(shutdown_rx).await;
        });
    }

    // --- Admin HTTP API ---
    let state = admin::AdminState {
        registry,
        latest,
        queue,
    };
    let listener = tokio::net::TcpListener::bind(&config.admin.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.admin.listen_addr))?;
    info!(addr = %config.admin.listen_addr, "admin API ready");

    axum::serve(listener, admin::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("admin server failed")?;

    // Stop the epoch loop once the admin server has drained.
    let _ = shutdown_tx.send(true);

    info!("shutdown complete");
    Ok(())
}

// -----------------------------------------------------------------------
// sequind trees
// -----------------------------------------------------------------------

async fn cmd_trees(config: CliConfig) -> Result<()> {
    std::fs::create_dir_all(&config.node.data_dir).context("failed to create data directory")?;
    let secret_key = load_or_create_secret_key(&config.node.data_dir)?;

    let transport = Arc::new(
        TreeTransport::bind(secret_key, iroh::RelayMode::Default)
            .await
            .context("failed to bind tree transport")?,
    );

    let map = Arc::new(MemoryMap::new(config.trees.map_id));
    let log = Arc::new(MemoryLog::new(config.trees.log_id));
    let service = Arc::new(TreeService::new(map, log));

    info!(
        "to use these trees: sequind start --endpoint {}",
        transport.endpoint_id()
    );

    let server = tokio::spawn(service.serve(transport));

    shutdown_signal().await;
    server.abort();
    info!("tree service stopped");
    Ok(())
}

// -----------------------------------------------------------------------
// Signal handling
// -----------------------------------------------------------------------

/// Wait for a SIGTERM or SIGINT (Ctrl-C) signal.
///
/// The first signal resolves this future; the caller then stops the admin
/// server and the epoch loop. An epoch already past its map write still
/// finishes anchoring (the loop only stops between ticks), so draining can
/// take a moment — a second signal during that window exits immediately.
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, stopping the sequencer"),
        () = sigterm() => info!("received SIGTERM, stopping the sequencer"),
    }

    tokio::spawn(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = sigterm() => {}
        }
        warn!("second signal while draining, exiting without anchoring");
        std::process::exit(1);
    });
}

/// Resolve when SIGTERM is delivered (never, off unix).
#[cfg(unix)]
async fn sigterm() {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler")
        .recv()
        .await;
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await
}

// -----------------------------------------------------------------------
// Networking helpers
// -----------------------------------------------------------------------

/// Parse a tree service endpoint string.
///
/// Formats:
/// - `<endpoint_id>` — hex-encoded public key (iroh relay used for discovery)
/// - `<endpoint_id>@<host:port>` — with an explicit direct address
fn parse_endpoint(raw: &str) -> Result<EndpointAddr> {
    let (id_str, addr_str) = match raw.split_once('@') {
        Some((id, addr)) => (id, Some(addr)),
        None => (raw, None),
    };

    let endpoint_id: iroh::EndpointId = id_str
        .parse()
        .context("invalid endpoint ID (expected hex-encoded public key)")?;

    let mut endpoint_addr = EndpointAddr::new(endpoint_id);
    if let Some(addr) = addr_str {
        let socket_addr: SocketAddr = addr
            .parse()
            .context("invalid socket address in endpoint (expected host:port)")?;
        endpoint_addr = endpoint_addr.with_ip_addr(socket_addr);
    }

    Ok(endpoint_addr)
}

// -----------------------------------------------------------------------
// Key management
// -----------------------------------------------------------------------

/// Load or create the sequencer's transport key at `data_dir/node.key`.
///
/// The key only authenticates QUIC connections to the tree service; the
/// directory's trust anchors live in the trees themselves, so losing this
/// file costs nothing but a new endpoint ID. It is persisted anyway to
/// keep `--endpoint` invocations stable across restarts.
fn load_or_create_secret_key(data_dir: &Path) -> Result<SecretKey> {
    let key_path = data_dir.join("node.key");

    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("failed to read node.key")?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("node.key must be exactly 32 bytes"))?;
        let key = SecretKey::from_bytes(&seed);
        info!(
            endpoint_id = %key.public().fmt_short(),
            "loaded sequencer transport key"
        );
        return Ok(key);
    }

    use rand::RngCore;
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let key = SecretKey::from(seed);
    std::fs::write(&key_path, key.to_bytes()).context("failed to write node.key")?;
    info!(
        path = %key_path.display(),
        endpoint_id = %key.public().fmt_short(),
        "generated sequencer transport key"
    );
    Ok(key)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
