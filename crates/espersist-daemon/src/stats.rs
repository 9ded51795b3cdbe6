//! Queue counter dashboard
//!
//! Polls every configured queue's counters on a fixed cadence and prints a
//! five-column table: queue name, pending items, items added and consumed
//! since the previous tick, and the current high-water mark. Multi-worker
//! queues are expanded per ordinal.

use anyhow::Result;
use espersist_core::config::Config;
use espersist_core::queue::inspector::{expand_queue_names, QueueStats};
use espersist_core::queue::open_store;
use espersist_core::worker::Shutdown;
use std::time::Duration;

/// Seconds between dashboard refreshes
const STATS_POLL: Duration = Duration::from_secs(15);

/// Print the dashboard until signalled.
pub async fn run(config: &Config) -> Result<()> {
    let store = open_store(&config.espersistd_uri).await?;
    let shutdown = Shutdown::install()?;

    let mut stats: Vec<QueueStats> = expand_queue_names(&config.persist_queues)
        .iter()
        .map(|qname| QueueStats::new(qname, store.clone()))
        .collect();
    for entry in &mut stats {
        entry.update().await?;
    }

    while !shutdown.is_set() {
        println!(
            "{:>10} {:>8} {:>8} {:>8} {:>8}",
            "queue", "pending", "new", "done", "max"
        );
        for entry in &mut stats {
            entry.update().await?;
            let (qname, pending, new, done, max) = entry.row();
            println!("{qname:>10} {pending:>8} {new:>8} {done:>8} {max:>8}");
        }
        println!();

        tokio::time::sleep(STATS_POLL).await;
    }

    Ok(())
}
