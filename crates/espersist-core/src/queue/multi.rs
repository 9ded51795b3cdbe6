//! Sticky sharding across sibling queues
//!
//! A [`MultiWorkerQueue`] wraps N sibling [`PersistQueue`]s named
//! `{prefix}_1 … {prefix}_N` and exposes only `put`. Results are sharded by
//! `(oidset_name, device_name)`: the first sighting of a key claims the
//! current round-robin ordinal and every later result with that key lands
//! on the same sibling. This keeps one device/OID-set's samples arriving at
//! one worker in submission order, which the time-series aggregator's rate
//! check depends on.
//!
//! Assignments are per-process state and are not persisted.

use super::{CounterStore, PersistQueue};
use crate::error::Result;
use crate::poll::PollResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

struct ShardState {
    /// Sharding key -> assigned ordinal in `[1..=num_workers]`
    worker_map: HashMap<String, usize>,
    /// Next ordinal handed to an unseen key
    cur_worker: usize,
}

/// N sibling queues with sticky per-source assignment
pub struct MultiWorkerQueue {
    qprefix: String,
    num_workers: usize,
    queues: Vec<PersistQueue>,
    state: Mutex<ShardState>,
}

impl MultiWorkerQueue {
    /// Open the sibling queues `{qprefix}_1 … {qprefix}_{num_workers}`
    pub async fn open(
        qprefix: &str,
        num_workers: usize,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        let mut queues = Vec::with_capacity(num_workers);
        for i in 1..=num_workers {
            let name = format!("{qprefix}_{i}");
            queues.push(PersistQueue::open(&name, store.clone()).await?);
        }

        Ok(Self {
            qprefix: qprefix.to_string(),
            num_workers,
            queues,
            state: Mutex::new(ShardState {
                worker_map: HashMap::new(),
                cur_worker: 1,
            }),
        })
    }

    /// Ordinal assigned to `result`'s sharding key, claiming the next
    /// round-robin slot on first sight. Ordinals wrap 1 -> N -> 1.
    pub fn get_worker(&self, result: &PollResult) -> usize {
        let key = result.shard_key();
        let mut state = self.state.lock().unwrap();

        if let Some(&worker) = state.worker_map.get(&key) {
            return worker;
        }

        let worker = state.cur_worker;
        state.worker_map.insert(key.clone(), worker);
        state.cur_worker += 1;
        if state.cur_worker > self.num_workers {
            state.cur_worker = 1;
        }
        debug!(queue = %self.qprefix, key = %key, worker, "worker assigned");

        worker
    }

    /// Enqueue `result` on its assigned sibling
    pub async fn put(&self, result: &PollResult) -> Result<()> {
        let worker = self.get_worker(result);
        self.queues[worker - 1].put(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollData;
    use crate::queue::MemoryStore;
    use std::collections::BTreeMap;

    fn result(oidset: &str, device: &str) -> PollResult {
        PollResult {
            oidset_name: oidset.to_string(),
            device_name: device.to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp: 1_200_000_000,
            data: PollData::Tables(BTreeMap::new()),
            metadata: HashMap::new(),
        }
    }

    async fn open_multi(workers: usize) -> (MultiWorkerQueue, Arc<dyn CounterStore>) {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let multi = MultiWorkerQueue::open("mq", workers, store.clone())
            .await
            .unwrap();
        (multi, store)
    }

    #[tokio::test]
    async fn test_sticky_assignment() {
        let (multi, _store) = open_multi(3).await;
        let r = result("FastPoll", "router1");
        let first = multi.get_worker(&r);
        for _ in 0..10 {
            assert_eq!(multi.get_worker(&r), first);
        }
    }

    #[tokio::test]
    async fn test_round_robin_covers_all_ordinals() {
        let (multi, _store) = open_multi(3).await;
        let mut seen = Vec::new();
        for device in ["d1", "d2", "d3"] {
            seen.push(multi.get_worker(&result("FastPoll", device)));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);

        // the cursor wrapped; a fourth key starts over at 1
        assert_eq!(multi.get_worker(&result("FastPoll", "d4")), 1);
    }

    #[tokio::test]
    async fn test_shard_distribution() {
        // six results over three keys: each sibling gets exactly two,
        // and the two share a key
        let (multi, store) = open_multi(3).await;
        let keys = [("A", "d1"), ("B", "d2"), ("C", "d3")];
        for (oidset, device) in keys.iter().chain(keys.iter()) {
            multi.put(&result(oidset, device)).await.unwrap();
        }

        for i in 1..=3 {
            let queue = PersistQueue::open(&format!("mq_{i}"), store.clone())
                .await
                .unwrap();
            assert_eq!(queue.len().await.unwrap(), 2);
            let a = queue.get().await.unwrap().unwrap();
            let b = queue.get().await.unwrap().unwrap();
            assert_eq!(a.shard_key(), b.shard_key());
        }
    }
}
