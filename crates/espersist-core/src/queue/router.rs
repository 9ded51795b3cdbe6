//! Routing of poll results onto persistence queues
//!
//! The [`PersistRouter`] classifies each incoming poll result by its
//! (lower-cased) OID-set name and forwards it to every queue mapped in
//! `persist_map`. Queues configured with more than one worker are wrapped
//! in a [`MultiWorkerQueue`]. A result whose OID-set is not mapped is
//! logged at error level and dropped; that is the only supported dropping
//! rule outside explicit failure.
//!
//! The [`PersistClient`] is the fan-out used by a poller running in the
//! same process: a list of sinks built from `espoll_persist_uri`.

use super::{open_store, MultiWorkerQueue, PersistQueue};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::poll::PollResult;
use std::collections::HashMap;
use tracing::{error, warn};

enum RoutedQueue {
    Single(PersistQueue),
    Sharded(MultiWorkerQueue),
}

impl RoutedQueue {
    async fn put(&self, result: &PollResult) -> Result<()> {
        match self {
            Self::Single(queue) => queue.put(result).await,
            Self::Sharded(multi) => multi.put(result).await,
        }
    }
}

/// Maps OID-set names to their target queues and forwards results
pub struct PersistRouter {
    queues: HashMap<String, RoutedQueue>,
    persist_map: HashMap<String, Vec<String>>,
}

impl PersistRouter {
    /// Build the router for every configured queue over the counter store
    /// at `store_uri`.
    pub async fn open(config: &Config, store_uri: &str) -> Result<Self> {
        let store = open_store(store_uri).await?;

        let mut queues = HashMap::new();
        for (qname, spec) in &config.persist_queues {
            let routed = if spec.workers > 1 {
                RoutedQueue::Sharded(
                    MultiWorkerQueue::open(qname, spec.workers, store.clone()).await?,
                )
            } else {
                RoutedQueue::Single(PersistQueue::open(qname, store.clone()).await?)
            };
            queues.insert(qname.clone(), routed);
        }

        Ok(Self {
            queues,
            persist_map: config.persist_map.clone(),
        })
    }

    /// Route `result` to every queue mapped for its OID-set.
    ///
    /// An unmapped OID-set is logged at error level and the result dropped.
    pub async fn put(&self, result: &PollResult) -> Result<()> {
        let Some(qnames) = self.persist_map.get(&result.oidset_name.to_lowercase()) else {
            error!(oidset = %result.oidset_name, "unknown oidset");
            return Ok(());
        };

        for qname in qnames {
            // validated against persist_queues at config load
            if let Some(queue) = self.queues.get(qname) {
                queue.put(result).await?;
            }
        }
        Ok(())
    }
}

/// In-process fan-out from a poller to its configured persistence sinks.
///
/// Sinks are listed in `espoll_persist_uri` as `kind:uri` specs. The only
/// recognized kind is `queue`, which routes through a [`PersistRouter`]
/// over the counter store at `uri`. An empty sink list warns once and all
/// data is silently discarded afterwards.
pub struct PersistClient {
    sinks: Vec<PersistRouter>,
}

impl PersistClient {
    /// Build the client from `config.espoll_persist_uri`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed spec or an unknown
    /// sink kind.
    pub async fn open(config: &Config) -> Result<Self> {
        if config.espoll_persist_uri.is_empty() {
            warn!("espoll_persist_uri not defined: all data will be discarded");
            return Ok(Self { sinks: Vec::new() });
        }

        let mut sinks = Vec::new();
        for spec in &config.espoll_persist_uri {
            let (kind, uri) = spec.split_once(':').ok_or_else(|| {
                Error::config(format!("Malformed espoll_persist_uri entry '{spec}'"))
            })?;
            match kind {
                "queue" => sinks.push(PersistRouter::open(config, uri).await?),
                other => {
                    return Err(Error::config(format!(
                        "Unknown persist sink kind '{other}' in '{spec}'"
                    )));
                }
            }
        }

        Ok(Self { sinks })
    }

    /// Hand `result` to every sink
    pub async fn put(&self, result: &PollResult) -> Result<()> {
        for sink in &self.sinks {
            sink.put(result).await?;
        }
        Ok(())
    }
}
