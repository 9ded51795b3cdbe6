//! The queue-draining worker loop
//!
//! A worker owns one persistence queue and one persister, and processes
//! results strictly sequentially: a result is fully persisted before the
//! next is fetched. The external queue has no blocking interface, so an
//! empty poll is followed by a one-second sleep. Shutdown is cooperative:
//! SIGINT/SIGTERM flip a flag and the worker finishes the current store
//! before exiting.

use crate::error::Result;
use crate::persist::Persister;
use crate::queue::PersistQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

/// Idle sleep between polls of an empty queue
pub const PERSIST_SLEEP: Duration = Duration::from_secs(1);

/// Interval between throughput stat emissions
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Cooperative shutdown flag flipped by SIGINT/SIGTERM
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    /// A flag with no signal handlers attached (tests, embedding)
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGTERM handlers that flip the flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be registered.
    pub fn install() -> Result<Self> {
        let shutdown = Self::new();
        let flag = shutdown.flag.clone();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            debug!("stop");
            flag.store(true, Ordering::SeqCst);
        });

        Ok(shutdown)
    }

    /// Flip the flag by hand
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drains one queue into one persister and emits throughput stats
pub struct PersistWorker {
    qname: String,
    queue: PersistQueue,
    persister: Box<dyn Persister>,
    shutdown: Shutdown,
    data_count: usize,
    last_stats: Instant,
}

impl PersistWorker {
    /// Assemble a worker over an opened queue and a built persister
    pub fn new(
        qname: &str,
        queue: PersistQueue,
        persister: Box<dyn Persister>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            qname: qname.to_string(),
            queue,
            persister,
            shutdown,
            data_count: 0,
            last_stats: Instant::now(),
        }
    }

    /// Run until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        debug!(queue = %self.qname, "run");

        while !self.shutdown.is_set() {
            if !self.tick().await? {
                tokio::time::sleep(PERSIST_SLEEP).await;
            }
        }

        info!(queue = %self.qname, "exiting");
        Ok(())
    }

    /// Fetch and persist at most one result; returns whether one was there.
    ///
    /// Store failures are logged and the offending result dropped; the
    /// worker keeps draining. Queue fetch failures are treated as an empty
    /// poll (transient store trouble).
    pub async fn tick(&mut self) -> Result<bool> {
        let item = match self.queue.get().await {
            Ok(item) => item,
            Err(e) => {
                error!(queue = %self.qname, error = %e, "queue fetch failed");
                return Ok(false);
            }
        };
        let Some(result) = item else {
            return Ok(false);
        };

        let data_len = result.data.len();
        match self.persister.store(&result).await {
            Ok(()) => self.data_count += data_len,
            Err(e) => {
                error!(
                    queue = %self.qname,
                    result = %result,
                    error = %e,
                    "failed to store result"
                );
            }
        }

        self.maybe_emit_stats();
        Ok(true)
    }

    fn maybe_emit_stats(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_stats) > STATS_INTERVAL {
            let elapsed = now.duration_since(self.last_stats).as_secs_f64();
            info!(
                queue = %self.qname,
                records = self.data_count,
                records_per_sec = %(self.data_count as f64 / elapsed),
                "records written"
            );
            self.data_count = 0;
            self.last_stats = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::StreamingPersister;
    use crate::poll::{PollData, PollResult};
    use crate::queue::{CounterStore, MemoryStore};
    use std::collections::HashMap;

    fn result(device: &str) -> PollResult {
        PollResult {
            oidset_name: "FastPoll".to_string(),
            device_name: device.to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp: 1_199_145_600,
            data: PollData::Samples(vec![(
                "ifInOctets.1".to_string(),
                serde_json::json!(100),
            )]),
            metadata: HashMap::new(),
        }
    }

    async fn streaming_worker(dir: &std::path::Path) -> (PersistWorker, PersistQueue) {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let queue = PersistQueue::open("workq", store.clone()).await.unwrap();
        let producer = PersistQueue::open("workq", store).await.unwrap();
        let persister = Box::new(StreamingPersister::new(dir.to_path_buf()));
        (
            PersistWorker::new("workq", queue, persister, Shutdown::new()),
            producer,
        )
    }

    #[tokio::test]
    async fn test_tick_drains_one_result() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, producer) = streaming_worker(dir.path()).await;

        producer.put(&result("d1")).await.unwrap();
        producer.put(&result("d2")).await.unwrap();

        assert!(worker.tick().await.unwrap());
        assert!(worker.tick().await.unwrap());
        assert!(!worker.tick().await.unwrap());

        let contents = std::fs::read_to_string(dir.path().join("20080101_00")).unwrap();
        assert_eq!(contents.trim_end().split("\n\n").count(), 2);
        assert_eq!(worker.data_count, 2);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, producer) = streaming_worker(dir.path()).await;
        producer.put(&result("d1")).await.unwrap();

        let shutdown = worker.shutdown.clone();
        let handle = tokio::spawn(async move {
            worker.run().await.unwrap();
            worker
        });

        // let the worker drain the item, then ask it to stop
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.request();
        let worker = handle.await.unwrap();
        assert_eq!(worker.data_count, 1);
    }
}
