// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Endorsement Agent Node
//!
//! Entry point for the `endorse-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the record store, and serves the
//! HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the agent node
//! - `init`    — initialize the data directory and generate the agent key
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;

use endorse_protocol::config::ManagerConfig;
use endorse_protocol::crypto::AgentKeypair;
use endorse_protocol::storage::{EndorseDb, MemoryCache};
use endorse_protocol::{
    ConnectionRegistry, InboundHandler, LocalIdentity, ManagerContext, OutboundMessage,
    QueuedTransport, TransactionManager,
};

use cli::{Commands, EndorseNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// File inside the data directory holding the hex-encoded agent key.
const AGENT_KEY_FILE: &str = "agent.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EndorseNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the agent: record store, inbound handling, outbound queue drain,
/// API server, and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        label = %args.label,
        "starting endorse-node"
    );

    // --- Agent key ---
    let keypair = load_keypair(args.agent_key.as_deref(), &args.data_dir)?;
    tracing::info!(verkey = %keypair.verkey(), "agent key loaded");

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = Arc::new(
        EndorseDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(
        path = %db_path.display(),
        transactions = db.transaction_count(),
        "database opened"
    );

    // --- Protocol ---
    let registry = Arc::new(ConnectionRegistry::new());
    let (transport, outbox) = QueuedTransport::new();
    let config = ManagerConfig {
        max_transition_retries: args.max_retries.max(1),
        cache_ttl: (args.cache_ttl_secs > 0).then(|| Duration::from_secs(args.cache_ttl_secs)),
        ..ManagerConfig::default()
    };
    let ctx = ManagerContext::new(
        db.clone(),
        Arc::new(MemoryCache::new()),
        registry.clone(),
        Arc::new(transport),
        LocalIdentity::new(args.label.clone(), keypair),
    )
    .with_config(config);
    let manager = Arc::new(TransactionManager::new(ctx));
    let handler = Arc::new(InboundHandler::new(Arc::clone(&manager)));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let recorder = tokio::spawn(metrics::record_events(
        Arc::clone(&node_metrics),
        manager.subscribe(),
    ));

    // --- Outbound queue ---
    let drain = tokio::spawn(drain_outbound(outbox));

    // --- Application state ---
    let app_state = api::AppState {
        manager,
        handler,
        registry,
        metrics: Arc::clone(&node_metrics),
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            endorse_protocol::config::PROTOCOL_VERSION,
        ),
        label: args.label,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    drain.abort();
    recorder.abort();
    db.flush().await.context("failed to flush database")?;
    tracing::info!("endorse-node stopped");
    Ok(())
}

/// Log every queued outbound message. Delivery to the peer belongs to the
/// transport layer in front of this node.
async fn drain_outbound(mut outbox: UnboundedReceiver<OutboundMessage>) {
    while let Some(out) = outbox.recv().await {
        match out.message.to_json() {
            Ok(bytes) => tracing::info!(
                connection_id = %out.connection_id,
                message_type = out.message.short_name(),
                thread_id = out.message.thread_id(),
                body = %String::from_utf8_lossy(&bytes),
                "outbound message"
            ),
            Err(e) => tracing::error!(
                connection_id = %out.connection_id,
                error = %e,
                "failed to encode outbound message"
            ),
        }
    }
}

/// The agent key from `--agent-key`, or from the key file written by `init`.
fn load_keypair(explicit: Option<&str>, data_dir: &Path) -> Result<AgentKeypair> {
    if let Some(hex_key) = explicit {
        return AgentKeypair::from_hex(hex_key.trim()).context("invalid --agent-key");
    }
    let key_path = data_dir.join(AGENT_KEY_FILE);
    let contents = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "failed to read agent key from {} (run `endorse-node init` first)",
            key_path.display()
        )
    })?;
    AgentKeypair::from_hex(contents.trim())
        .with_context(|| format!("invalid agent key in {}", key_path.display()))
}

/// Initializes a data directory and generates the agent signing key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("endorse_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(AGENT_KEY_FILE);
    if key_path.exists() && !args.force {
        bail!(
            "agent key already exists at {} (pass --force to replace it)",
            key_path.display()
        );
    }

    let keypair = AgentKeypair::generate();
    std::fs::write(&key_path, keypair.secret_key_hex())
        .with_context(|| format!("failed to write agent key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let verkey = keypair.verkey();
    tracing::info!(
        verkey = %verkey,
        key_path = %key_path.display(),
        "agent keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Agent key      : {}", key_path.display());
    println!("  Verkey         : {}", verkey);

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("endorse-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", endorse_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
