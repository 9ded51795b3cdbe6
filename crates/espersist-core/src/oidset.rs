//! OID-set configuration
//!
//! An OID-set is a named bundle of OIDs collected together by the poller.
//! The time-series persister needs each set's sampling frequency, chunk
//! mapping policy and per-OID row types to create variables on demand. The
//! table is loaded from configuration once at worker start and never
//! refreshed while the worker runs.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chunk mapping policy for a time-series variable: which file a sample at a
/// given timestamp lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkMapper {
    /// One chunk per calendar month
    #[serde(rename = "YYYYMM")]
    Monthly,
    /// One chunk per calendar day
    #[serde(rename = "YYYYMMDD")]
    Daily,
}

impl ChunkMapper {
    /// Chunk name for a timestamp (seconds since the epoch, UTC)
    pub fn chunk_name(&self, timestamp: i64) -> String {
        let when = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
        match self {
            Self::Monthly => when.format("%Y%m").to_string(),
            Self::Daily => when.format("%Y%m%d").to_string(),
        }
    }
}

/// Storage row type of an OID, from the OID type table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowType {
    /// 32-bit wrapping counter
    Counter32,
    /// 64-bit wrapping counter
    Counter64,
    /// 32-bit gauge
    Gauge32,
    /// Hundredths of a second since agent restart
    TimeTicks,
    /// Plain integer
    Integer,
}

/// Per-OID configuration within a set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidConfig {
    /// Storage row type for samples of this OID
    pub row_type: RowType,
    /// Whether rate aggregates are derived from this OID
    #[serde(default)]
    pub aggregate: bool,
}

/// Configuration of one OID-set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidSetConfig {
    /// Sampling frequency in seconds; also the base aggregation period
    pub frequency: u32,
    /// Chunk mapping policy for variables of this set
    pub chunk_mapper: ChunkMapper,
    /// Overrides the set name in variable paths when present
    #[serde(default)]
    pub set_name: Option<String>,
    /// Additional aggregation periods beyond the base frequency, seconds
    #[serde(default)]
    pub aggregates: Vec<u32>,
    /// OID name -> per-OID configuration
    #[serde(default)]
    pub oids: HashMap<String, OidConfig>,
}

impl OidSetConfig {
    /// Effective set name used in variable paths
    pub fn effective_set_name<'a>(&'a self, oidset_name: &'a str) -> &'a str {
        self.set_name.as_deref().unwrap_or(oidset_name)
    }

    /// Look up an OID's configuration, case-insensitively
    pub fn oid(&self, oid_name: &str) -> Option<&OidConfig> {
        self.oids.get(&oid_name.to_lowercase())
    }
}

/// The in-memory OID-set table held by a time-series worker.
///
/// Set and OID lookups are case-insensitive: configuration sources do not
/// reliably preserve key case, and routing already treats set names as
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct OidSetTable {
    sets: HashMap<String, OidSetConfig>,
}

impl OidSetTable {
    /// Build the table from the configured sets, normalizing lookup keys
    pub fn new(sets: HashMap<String, OidSetConfig>) -> Self {
        let sets = sets
            .into_iter()
            .map(|(name, mut set)| {
                let oids = set
                    .oids
                    .drain()
                    .map(|(oid, cfg)| (oid.to_lowercase(), cfg))
                    .collect();
                set.oids = oids;
                (name.to_lowercase(), set)
            })
            .collect();
        Self { sets }
    }

    /// Look up a set by its name
    pub fn get(&self, oidset_name: &str) -> Option<&OidSetConfig> {
        self.sets.get(&oidset_name.to_lowercase())
    }

    /// Number of configured sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no sets are configured
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
