//! Blueshift service
//!
//! Watches an S3 bucket for load directories and ingests their data files
//! into the warehouse. Runs until SIGINT/SIGTERM.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use blueshift::config::{Configuration, DEFAULT_CONFIG_PATH};
use blueshift::loader::WarehouseLoader;
use blueshift::metrics::ImportMetrics;
use blueshift::status::StatusDb;
use blueshift::storage;
use blueshift::watcher::{BucketWatcher, KeyWatcherSpawner, WatcherContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config_path = std::path::Path::new(&args.config);
    if !config_path.exists() {
        log::info!("Configuration file {} not found, using defaults", args.config);
    }
    let config = Configuration::load_from_path(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    let key_pattern = config.validate()?;

    log::info!(
        "Starting blueshift: bucket {}, key pattern {}, poll interval {:?} (+{:?} jitter)",
        config.s3.bucket,
        config.s3.key_pattern,
        config.s3.poll_interval,
        config.s3.poll_jitter
    );

    let store = storage::bucket_store(&config.s3.bucket)?;
    let metrics = ImportMetrics::new();

    let status_db = match &config.status_db {
        Some(status_config) => Some(StatusDb::connect(status_config).await?),
        None => {
            log::info!("No status_db configured, lifecycle stamping disabled");
            None
        }
    };

    let (new_directories_tx, new_directories_rx) = mpsc::channel::<BTreeSet<String>>(1);

    let spawner = KeyWatcherSpawner::spawn(
        WatcherContext {
            store: store.clone(),
            bucket: config.s3.bucket.clone(),
            loader: Arc::new(WarehouseLoader::new(metrics.clone())),
            status_db,
            metrics: metrics.clone(),
            poll_interval: config.s3.poll_interval,
            poll_jitter: config.s3.poll_jitter,
        },
        new_directories_rx,
    );
    let bucket_watcher = BucketWatcher::spawn(
        store,
        key_pattern,
        config.s3.poll_interval,
        new_directories_tx,
    );

    log::info!("Blueshift running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Shutting down watchers");
    bucket_watcher.stop().await;
    spawner.stop().await;
    metrics.log_summary();

    log::info!("Blueshift stopped");
    Ok(())
}
