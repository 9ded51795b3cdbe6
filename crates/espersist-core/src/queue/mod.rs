//! Persistence queues
//!
//! A [`PersistQueue`] is a FIFO layered over the external counter store:
//! two monotonically increasing counters (`last_added`, `last_read`) plus a
//! sparse map of serialized payloads keyed by sequence number. Counters
//! survive worker restarts; losing the store loses outstanding items, which
//! the pipeline tolerates.
//!
//! - [`store`] - the counter store port and its backends
//! - [`multi`] - sticky sharding across sibling queues
//! - [`router`] - OID-set based routing and the in-process persist client
//! - [`inspector`] - read-only dashboard rows over queue counters

pub mod inspector;
pub mod multi;
pub mod router;
pub mod store;

pub use multi::MultiWorkerQueue;
pub use router::{PersistClient, PersistRouter};
pub use store::{open_store, CounterStore, MemoryStore, RedisStore, StoreError};

use crate::error::Result;
use crate::poll::PollResult;
use std::sync::Arc;
use tracing::{debug, error};

/// Key prefix shared by every queue structure in the counter store
pub const KEY_PREFIX: &str = "_mcpq";

/// A single named FIFO over the counter store.
///
/// Multi-producer, single-consumer: at most one consumer per queue name is
/// a configuration rule, not enforced here. Two consumers racing the same
/// name can duplicate or drop sequence numbers.
pub struct PersistQueue {
    qname: String,
    store: Arc<dyn CounterStore>,
    last_added_key: String,
    last_read_key: String,
}

impl PersistQueue {
    /// Open the queue named `qname`, initializing absent counters to zero.
    ///
    /// Initialization uses set-if-absent so an existing queue's counters are
    /// never clobbered.
    pub async fn open(qname: &str, store: Arc<dyn CounterStore>) -> Result<Self> {
        let last_added_key = format!("{KEY_PREFIX}_{qname}_last_added");
        let last_read_key = format!("{KEY_PREFIX}_{qname}_last_read");

        store.set_if_absent(&last_added_key, b"0").await?;
        store.set_if_absent(&last_read_key, b"0").await?;

        Ok(Self {
            qname: qname.to_string(),
            store,
            last_added_key,
            last_read_key,
        })
    }

    /// Queue name
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// Serialize `result` and append it to the queue.
    ///
    /// A result that cannot be serialized is logged and dropped.
    pub async fn put(&self, result: &PollResult) -> Result<()> {
        let payload = match serde_json::to_vec(result) {
            Ok(payload) => payload,
            Err(e) => {
                error!(queue = %self.qname, error = %e, "failed to serialize poll result");
                return Ok(());
            }
        };

        let seq = self.store.incr(&self.last_added_key).await?;
        let key = format!("{KEY_PREFIX}_{}_{seq}", self.qname);
        self.store.set(&key, &payload).await?;
        Ok(())
    }

    /// Pop the oldest result, or `None` when the queue is empty.
    ///
    /// The sequence number is consumed even when the payload is missing or
    /// fails to decode; such slots are logged and reported as empty.
    pub async fn get(&self) -> Result<Option<PollResult>> {
        if self.len().await? == 0 {
            return Ok(None);
        }

        let seq = self.store.incr(&self.last_read_key).await?;
        let key = format!("{KEY_PREFIX}_{}_{seq}", self.qname);
        let payload = self.store.get(&key).await?;
        self.store.delete(&key).await?;

        match payload {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(result) => Ok(Some(result)),
                Err(e) => {
                    error!(queue = %self.qname, seq, error = %e, "failed to deserialize queue payload");
                    Ok(None)
                }
            },
            None => {
                error!(queue = %self.qname, seq, "queue payload missing");
                Ok(None)
            }
        }
    }

    /// Advisory queue length.
    ///
    /// Concurrent `put`/`get` can make the raw difference briefly negative;
    /// it is clamped to zero.
    pub async fn len(&self) -> Result<u64> {
        let added = self.read_counter(&self.last_added_key).await?;
        let read = self.read_counter(&self.last_read_key).await?;
        Ok(added.saturating_sub(read))
    }

    /// Zero both counters
    pub async fn reset(&self) -> Result<()> {
        debug!(queue = %self.qname, "resetting queue counters");
        self.store.set(&self.last_added_key, b"0").await?;
        self.store.set(&self.last_read_key, b"0").await?;
        Ok(())
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        let bytes = self.store.get(key).await?;
        Ok(bytes
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollData;
    use std::collections::HashMap;

    fn result_with_device(device: &str) -> PollResult {
        PollResult {
            oidset_name: "FastPoll".to_string(),
            device_name: device.to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp: 1_200_000_000,
            data: PollData::Samples(vec![(
                "ifInOctets.1".to_string(),
                serde_json::json!(100),
            )]),
            metadata: HashMap::from([("tsdb_flags".to_string(), "1".to_string())]),
        }
    }

    async fn open_queue(name: &str) -> PersistQueue {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        PersistQueue::open(name, store).await.unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = open_queue("fifo").await;
        for device in ["d1", "d2", "d3"] {
            queue.put(&result_with_device(device)).await.unwrap();
        }

        for device in ["d1", "d2", "d3"] {
            let popped = queue.get().await.unwrap().unwrap();
            assert_eq!(popped.device_name, device);
        }
        assert_eq!(queue.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_len_tracks_puts_and_gets() {
        let queue = open_queue("len").await;
        assert_eq!(queue.len().await.unwrap(), 0);

        for i in 0..5 {
            queue.put(&result_with_device(&format!("d{i}"))).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 5);

        queue.get().await.unwrap();
        queue.get().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_get_on_empty_queue() {
        let queue = open_queue("empty").await;
        assert_eq!(queue.get().await.unwrap(), None);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let queue = PersistQueue::open("restart", store.clone()).await.unwrap();
        queue.put(&result_with_device("d1")).await.unwrap();
        queue.put(&result_with_device("d2")).await.unwrap();
        drop(queue);

        // a restarted worker reopens the queue and finds the backlog intact
        let queue = PersistQueue::open("restart", store).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let popped = queue.get().await.unwrap().unwrap();
        assert_eq!(popped.device_name, "d1");
    }

    #[tokio::test]
    async fn test_corrupt_payload_consumes_slot() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let queue = PersistQueue::open("corrupt", store.clone()).await.unwrap();

        queue.put(&result_with_device("d1")).await.unwrap();
        queue.put(&result_with_device("d2")).await.unwrap();
        // clobber the first payload
        store
            .set(&format!("{KEY_PREFIX}_corrupt_1"), b"} not json {")
            .await
            .unwrap();

        assert_eq!(queue.get().await.unwrap(), None);
        // the slot was consumed; the second item is still reachable
        let popped = queue.get().await.unwrap().unwrap();
        assert_eq!(popped.device_name, "d2");
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_zeroes_counters() {
        let queue = open_queue("reset").await;
        queue.put(&result_with_device("d1")).await.unwrap();
        queue.reset().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_payload() {
        let queue = open_queue("roundtrip").await;
        let original = result_with_device("d1");
        queue.put(&original).await.unwrap();
        let popped = queue.get().await.unwrap().unwrap();
        assert_eq!(popped, original);
    }
}
