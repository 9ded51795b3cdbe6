//! Read-only queue counter inspection
//!
//! [`QueueStats`] tracks the last two readings of a queue's counters and
//! derives the dashboard row printed by the `stats` role: pending items,
//! newly added and newly consumed since the previous tick, and the current
//! high-water mark. Absence of a queue in the store is warned about once.

use super::{CounterStore, KEY_PREFIX};
use crate::error::Result;
use std::sync::Arc;
use tracing::warn;

/// One dashboard row: `(queue, pending, new, done, max)`
pub type StatsRow = (String, u64, u64, u64, u64);

/// Counter readings for one queue, current and previous tick
pub struct QueueStats {
    qname: String,
    store: Arc<dyn CounterStore>,
    last_added: [u64; 2],
    last_read: [u64; 2],
    warned: bool,
}

impl QueueStats {
    /// Track the queue named `qname`
    pub fn new(qname: &str, store: Arc<dyn CounterStore>) -> Self {
        Self {
            qname: qname.to_string(),
            store,
            last_added: [0, 0],
            last_read: [0, 0],
            warned: false,
        }
    }

    /// Queue name
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// Read both counters, shifting the previous readings back one slot.
    ///
    /// A queue with no counters in the store yet is warned about once and
    /// left at its previous readings.
    pub async fn update(&mut self) -> Result<()> {
        for (suffix, slots) in [
            ("last_added", &mut self.last_added),
            ("last_read", &mut self.last_read),
        ] {
            let key = format!("{KEY_PREFIX}_{}_{suffix}", self.qname);
            match self.store.get(&key).await? {
                Some(bytes) => {
                    let value = std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0);
                    slots[1] = slots[0];
                    slots[0] = value;
                }
                None => {
                    if !self.warned {
                        warn!(queue = %self.qname, "no stats, no work queue in store");
                        self.warned = true;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// The current dashboard row
    pub fn row(&self) -> StatsRow {
        (
            self.qname.clone(),
            self.last_added[0].saturating_sub(self.last_read[0]),
            self.last_added[0].saturating_sub(self.last_added[1]),
            self.last_read[0].saturating_sub(self.last_read[1]),
            self.last_added[0],
        )
    }
}

/// Expand the configured queues into the concrete queue names to inspect:
/// multi-worker queues contribute one name per ordinal.
pub fn expand_queue_names(
    persist_queues: &std::collections::HashMap<String, crate::config::QueueSpec>,
) -> Vec<String> {
    let mut names = Vec::new();
    for (qname, spec) in persist_queues {
        if spec.workers == 1 {
            names.push(qname.clone());
        } else {
            for i in 1..=spec.workers {
                names.push(format!("{qname}_{i}"));
            }
        }
    }
    names.sort();
    names
}
