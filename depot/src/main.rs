//! # Depot
//!
//! Media ingestion daemon: watches a source directory ("barn") for closed
//! files, publishes them onto a durable broker queue, and drives a per-file
//! pipeline that deduplicates, probes, stocks into a content-addressed
//! warehouse, and records a catalog entry in a document database.
//!
//! ## Architecture
//!
//! A single process composes all the moving parts on one Tokio runtime:
//! - `depot_core::watch` observes the barn and feeds an mpsc channel.
//! - `depot_core::broker` durably publishes/consumes over AMQP.
//! - `depot_core::orchestrator` drives the per-file pipeline against the
//!   warehouse (`depot_core::store`) and the document catalog
//!   (`depot_core::catalog`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use depot_core::broker::{BrokerClient, Role};
use depot_core::catalog::{Catalog, CatalogStore};
use depot_core::config::Config;
use depot_core::orchestrator::Orchestrator;
use depot_core::store::Store;
use depot_core::watch::Watcher;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the depot ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Watches a barn directory and ingests media into a content-addressed warehouse and catalog")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_logging(&config);

    info!(config = %args.config.display(), "configuration loaded");

    if !config.dirs.barn.is_dir() {
        anyhow::bail!("barn directory does not exist: {}", config.dirs.barn.display());
    }
    tokio::fs::create_dir_all(&config.dirs.warehouse).await?;

    let store = Store::new(config.dirs.warehouse.clone());
    let catalog: Arc<dyn CatalogStore> = Arc::new(Catalog::connect(&config.mongodb).await?);

    let publisher = Arc::new(BrokerClient::new(
        config.rabbitmq.amqp_uri(),
        config.rabbitmq.queue.clone(),
        Role::Publisher,
    ));
    let consumer = BrokerClient::new(config.rabbitmq.amqp_uri(), config.rabbitmq.queue.clone(), Role::Consumer);

    let orchestrator = Arc::new(Orchestrator::new(config.clone(), store, catalog, publisher.clone()));

    info!("running startup inventory sweep");
    if let Err(e) = orchestrator.sweep().await {
        warn!(error = %e, "startup inventory sweep failed");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::spawn(&config.dirs.barn, tx, &config.watch)?;
    info!(barn = %config.dirs.barn.display(), "watcher started");

    let forward_publisher = publisher.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = forward_publisher.publish_event(&event).await {
                error!(path = %event.path().display(), error = %e, "failed to publish watched file event");
            }
        }
    });

    let consume_orchestrator = orchestrator.clone();
    let consume_task = tokio::spawn(async move {
        consumer
            .consume(|event| {
                let orchestrator = consume_orchestrator.clone();
                async move { orchestrator.process(event).await }
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        result = consume_task => {
            match result {
                Ok(Ok(())) => info!("consume loop exited"),
                Ok(Err(e)) => error!(error = %e, "consume loop failed"),
                Err(e) => error!(error = %e, "consume task panicked"),
            }
        }
    }

    watcher.stop();
    forward_task.abort();

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
