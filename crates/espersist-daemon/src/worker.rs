//! Worker role wiring
//!
//! Performs the per-worker initialization (store connections, persister
//! construction) and hands off to the core worker loop. Every worker owns
//! its state outright; nothing here is shared with siblings.

use anyhow::{anyhow, Context, Result};
use espersist_core::config::Config;
use espersist_core::persist::build_persister;
use espersist_core::queue::{open_store, PersistQueue};
use espersist_core::worker::{PersistWorker, Shutdown};
use tracing::info;

/// Run one worker until signalled.
pub async fn run(config: &Config, qname: &str, number: Option<usize>) -> Result<()> {
    let spec = config.queue_spec(qname)?;

    // workers of a sharded queue drain their per-ordinal sibling
    let worker_qname = if spec.workers > 1 {
        let number = number.ok_or_else(|| {
            anyhow!("--number is required for multi-worker queue '{qname}'")
        })?;
        format!("{qname}_{number}")
    } else {
        qname.to_string()
    };

    let shutdown = Shutdown::install()?;
    let store = open_store(&config.espersistd_uri)
        .await
        .context("cannot reach the queue store")?;
    let queue = PersistQueue::open(&worker_qname, store).await?;
    let persister = build_persister(spec.class, config).await?;

    info!(queue = %worker_qname, class = %spec.class, "worker starting");
    let mut worker = PersistWorker::new(&worker_qname, queue, persister, shutdown);
    worker.run().await?;
    Ok(())
}
