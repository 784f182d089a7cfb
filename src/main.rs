//! `workervisord`: hosts the workers persisted in a JSON store.
//!
//! Environment:
//! - `RUST_LOG`              log filter (default `workervisor=info`)
//! - `WORKERVISOR_STORE`     path of the JSON store (default `workers.json`)
//! - `WORKERVISOR_*`         see [`workervisor::Config::from_env`]

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use workervisor::{Config, JsonFileStore, LogWriter, Subscribe, Supervisor};

const DEFAULT_STORE: &str = "workers.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("workervisor=info")),
        )
        .init();

    let cfg = Config::from_env().context("invalid configuration")?;
    let store_path = std::env::var("WORKERVISOR_STORE").unwrap_or_else(|_| DEFAULT_STORE.into());
    let store = JsonFileStore::open(&store_path)
        .await
        .with_context(|| format!("opening store {store_path}"))?;

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = Supervisor::builder(cfg)
        .with_store(Arc::new(store))
        .with_subscribers(subs)
        .build();

    let resumed = sup.resume().await.context("resuming workers")?;
    tracing::info!(
        started = resumed.started.len(),
        failed = resumed.failed.len(),
        "resumed persisted workers"
    );

    sup.run_until_shutdown().await?;
    Ok(())
}
