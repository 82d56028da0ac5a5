//! clustermirror
//!
//! Mirrors objects from a set of member clusters into local storage and
//! serves reads over them, passing everything else to an upstream API
//! server.
//!
//! Usage:
//!   clustermirror --config clustermirror.toml

use anyhow::{Context, Result};
use clap::Parser;
use clustermirror_apiserver::{build_router, DiscoveryManager, ResourceHandler, ServerConfig, UpstreamProxy};
use clustermirror_storage::{new_storage_factory, CollectionRegistry};
use clustermirror_sync::{ClusterRegistry, ClusterSpec, HttpClusterClient, LeaderGate, SynchroManager};
use clustermirror_types::Scheme;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "clustermirror")]
#[command(about = "Multi-cluster object mirror and read API")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "clustermirror.toml")]
    config: PathBuf,

    /// Address to serve on, overriding the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Serve reads only; do not synchronize clusters
    #[arg(long)]
    no_sync: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    let listen = args.listen.unwrap_or_else(|| config.listen.clone());
    info!("clustermirror starting...");

    let scheme = Arc::new(Scheme::default());
    let collections = CollectionRegistry::with_collections(config.collections.clone())
        .context("Failed to register collections")?;
    let storage = config.storage.as_ref().context("Missing [storage] section")?;
    let factory = new_storage_factory(storage, Arc::clone(&scheme), collections)
        .context("Failed to open storage backend")?;

    let registry = Arc::new(ClusterRegistry::new());
    for cluster in &config.clusters {
        let client = HttpClusterClient::new(&cluster.server, cluster.token.clone())
            .with_context(|| format!("Failed to create client for cluster {}", cluster.name))?;
        registry.upsert(ClusterSpec::new(&cluster.name, Arc::new(client), cluster.gvrs()?));
    }

    let discovery = Arc::new(DiscoveryManager::new());
    let manager = SynchroManager::new(
        registry,
        Arc::clone(&factory),
        Arc::clone(&scheme),
        discovery.clone(),
        config.sync.synchro_config(),
    );

    let upstream = config.upstream.as_ref().context("Missing [upstream] section")?;
    let delegate = UpstreamProxy::new(&upstream.url, upstream.token.clone())?;
    let handler = Arc::new(ResourceHandler::new(
        discovery,
        factory,
        scheme,
        Arc::new(delegate),
        config.min_request_timeout(),
    ));

    let shutdown = CancellationToken::new();
    // No lease is configured: this instance always leads.
    let (leading, leadership) = watch::channel(true);
    let sync = if args.no_sync {
        info!("Synchronization disabled, serving stored objects only");
        None
    } else {
        let gate = LeaderGate::new(leadership);
        Some(tokio::spawn(gate.run(manager, config.sync.concurrency, shutdown.clone())))
    };

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    info!("Serving on {}", listen);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, build_router(handler))
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    if let Some(sync) = sync {
        if let Err(e) = sync.await {
            error!("Synchronization task failed: {}", e);
        }
    }
    drop(leading);
    info!("clustermirror stopped");
    Ok(())
}
