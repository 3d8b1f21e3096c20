// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # KEYLESS Node
//!
//! Entry point for the `keyless-node` binary. Parses CLI arguments,
//! initializes logging and metrics, runs the Groth16 setup, and serves the
//! HTTP API alongside a background sweep of expired challenges.
//!
//! The binary supports five subcommands:
//!
//! - `run`             start the server
//! - `init`            create the data directory and the server key
//! - `keygen`          print a fresh client keypair
//! - `hash-credential` print the registrable hash of a raw credential
//! - `version`         print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use keyless_auth::clock;
use keyless_auth::crypto::{hash_credential, KeyPair};
use keyless_auth::storage::{KeyedStore, MemoryStore, SledStore};
use keyless_auth::AuthOrchestrator;

use cli::{Commands, KeylessNodeCli, StoreKind};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeylessNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Keygen => {
            keygen();
            Ok(())
        }
        Commands::HashCredential(args) => {
            println!("{}", hash_credential(args.credential.as_bytes()));
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the server: store, orchestrator, API, metrics and the sweep loop.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    let config = args.auth_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        store = ?args.store,
        max_depth = config.max_tree_depth,
        "starting keyless-node"
    );

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    // --- Server key ---
    let server_key = load_or_create_server_key(&args.server_key_path())?;
    tracing::info!(public_key = %server_key.public_key().to_hex(), "server key loaded");

    // --- Persistent storage ---
    let mut sled_handle = None;
    let store: Arc<dyn KeyedStore> = match args.store {
        StoreKind::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Sled => {
            let db_path = args.data_dir.join("db");
            let sled = Arc::new(
                SledStore::open(&db_path)
                    .with_context(|| format!("failed to open database at {}", db_path.display()))?,
            );
            tracing::info!(path = %db_path.display(), "database opened");
            sled_handle = Some(Arc::clone(&sled));
            sled
        }
    };

    // --- Orchestrator (runs the circuit setup) ---
    let orchestrator = tokio::task::spawn_blocking(move || {
        AuthOrchestrator::from_entropy(store, clock::system(), server_key, config)
    })
    .await
    .context("circuit setup task panicked")?
    .context("failed to build the auth orchestrator")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            keyless_auth::config::PROTOCOL_VERSION,
        ),
        orchestrator: orchestrator.clone(),
        metrics: Arc::clone(&node_metrics),
    };
    let summary = orchestrator
        .merkle_root()
        .context("failed to read the credential tree")?;
    node_metrics
        .registered_credentials
        .set(summary.leaf_count as i64);
    api::refresh_active_challenges(&app_state);

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("{}:{}", args.bind, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Expiry sweep ---
    let sweep_state = app_state.clone();
    let sweep_interval = args.sweep_interval();
    let sweep_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match sweep_state.orchestrator.prune_expired() {
                Ok(0) => {}
                Ok(removed) => {
                    sweep_state
                        .metrics
                        .expired_entries_pruned_total
                        .inc_by(removed as u64);
                    tracing::debug!(removed, "expired entries pruned");
                }
                Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
            }
            api::refresh_active_challenges(&sweep_state);
        }
    });

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

    sweep_loop.abort();
    if let Some(sled) = sled_handle {
        sled.flush().context("failed to flush database")?;
    }
    tracing::info!("keyless-node stopped");
    Ok(())
}

/// Reads the hex server key at `path`, or generates and writes one.
fn load_or_create_server_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server key from {}", path.display()))?;
        return KeyPair::from_hex(contents.trim())
            .with_context(|| format!("server key at {} is malformed", path.display()));
    }

    tracing::warn!(path = %path.display(), "no server key found, generating one");
    let key = KeyPair::generate();
    write_server_key(path, &key)?;
    Ok(key)
}

fn write_server_key(path: &Path, key: &KeyPair) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, key.secret_hex().as_bytes())
        .with_context(|| format!("failed to write server key to {}", path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Initializes a data directory and generates the server key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("keyless_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(cli::SERVER_KEY_FILE);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            key_path.display()
        );
    }

    let key = KeyPair::generate();
    write_server_key(&key_path, &key)?;
    let pubkey_hex = key.public_key().to_hex();

    tracing::info!(
        public_key = %pubkey_hex,
        key_path = %key_path.display(),
        "server key generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Server key     : {}", key_path.display());
    println!("  Public key     : {}", pubkey_hex);

    Ok(())
}

/// Prints a fresh client keypair. The secret goes to stdout; handle with care.
fn keygen() {
    let key = KeyPair::generate();
    println!("public_key  {}", key.public_key().to_hex());
    println!("private_key {}", key.secret_hex().as_str());
}

/// Prints version information to stdout.
fn print_version() {
    println!("keyless-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", keyless_auth::config::PROTOCOL_VERSION);
    println!(
        "curves       {} (challenges), {} (proofs)",
        keyless_auth::config::KEY_EXCHANGE_CURVE,
        keyless_auth::config::ZKP_CURVE
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
