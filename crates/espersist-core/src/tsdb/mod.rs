//! Time-series store port and backends
//!
//! The time-series persister talks to a hierarchical store of *variables*
//! (periodic series addressed by a `/`-separated path) through the [`Tsdb`]
//! trait. Variables are created on demand and may carry derived
//! *aggregates*: rate series computed from consecutive samples at a given
//! period, guarded against counter resets (via an uptime reference) and
//! absurd rates (hard cap with an informational callback).
//!
//! - [`fs`] - filesystem-rooted backend (`tsdb_root` path)
//! - [`memory`] - in-memory backend for tests and the embedded harness

pub mod fs;
pub mod memory;

pub use fs::FsTsdb;
pub use memory::MemoryTsdb;

use crate::oidset::{ChunkMapper, RowType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the time-series store
#[derive(Debug, Error)]
pub enum TsdbError {
    /// The variable has not been created yet
    #[error("TSDB variable does not exist: {path}")]
    VarDoesNotExist {
        /// Path of the missing variable
        path: String,
    },

    /// The requested aggregate has not been created yet
    #[error("TSDB aggregate does not exist: {path} period {period}")]
    AggregateDoesNotExist {
        /// Path of the variable
        path: String,
        /// Requested aggregation period
        period: u32,
    },

    /// The variable's metadata document cannot be understood
    #[error("Invalid TSDB metadata for {path}: {reason}")]
    InvalidMetadata {
        /// Path of the damaged variable
        path: String,
        /// What is wrong with the metadata
        reason: String,
    },

    /// The aggregate already exists
    #[error("TSDB aggregate already exists: {path} period {period}")]
    AggregateExists {
        /// Path of the variable
        path: String,
        /// Conflicting aggregation period
        period: u32,
    },

    /// Filesystem error
    #[error("TSDB I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk or metadata encoding error
    #[error("TSDB encoding error: {0}")]
    Encoding(String),
}

/// Result type for time-series store operations
pub type TsdbResult<T> = std::result::Result<T, TsdbError>;

/// One stored sample: `(timestamp, flags, value)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Collection time, seconds since the epoch
    pub timestamp: i64,
    /// Poller flags carried alongside the value
    pub flags: u16,
    /// The sample value
    pub value: f64,
}

/// Aggregation functions derivable from a base variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    /// Per-second rate averaged over the interval
    Average,
    /// Raw difference between consecutive samples
    Delta,
    /// Minimum rate over the period
    Min,
    /// Maximum rate over the period
    Max,
}

/// Declaration of one aggregate attached to a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Aggregation period, seconds
    pub period: u32,
    /// Chunk mapping policy for the aggregate series
    pub chunk_mapper: ChunkMapper,
    /// Functions computed for each aggregate row
    pub functions: Vec<AggFunc>,
}

/// Metadata of a variable as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarMeta {
    /// Storage row type
    pub row_type: RowType,
    /// Sampling frequency, seconds
    pub frequency: u32,
    /// Chunk mapping policy
    pub chunk_mapper: ChunkMapper,
    /// Declared aggregates
    pub aggregates: Vec<AggregateSpec>,
}

/// Callback invoked for rates above the hard cap; purely informational
pub type MaxRateCallback = Arc<dyn Fn(&str, i64, f64) + Send + Sync>;

/// Parameters of one rate-aggregation run
#[derive(Clone)]
pub struct RateUpdate {
    /// Path of the sibling uptime variable used to detect counter resets,
    /// when one exists
    pub uptime_path: Option<String>,
    /// Oldest previous-sample timestamp still considered adjacent
    pub min_last_update: i64,
    /// Hard cap; rates above it are discarded
    pub max_rate: f64,
    /// Invoked with `(path, timestamp, rate)` for each discarded rate
    pub on_max_rate: Option<MaxRateCallback>,
}

/// One computed aggregate row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggRow {
    /// Timestamp of the newer of the two samples the row derives from
    pub timestamp: i64,
    /// Function name -> computed value
    pub values: BTreeMap<String, f64>,
}

/// Hierarchical time-series store
#[async_trait]
pub trait Tsdb: Send + Sync {
    /// Fetch the metadata of the variable at `path`
    async fn get_var(&self, path: &str) -> TsdbResult<VarMeta>;

    /// Create the variable at `path`
    async fn add_var(
        &self,
        path: &str,
        row_type: RowType,
        frequency: u32,
        chunk_mapper: ChunkMapper,
    ) -> TsdbResult<()>;

    /// Attach an aggregate to the variable at `path`
    async fn add_aggregate(&self, path: &str, spec: AggregateSpec) -> TsdbResult<()>;

    /// Append a sample to the variable at `path`
    async fn insert(&self, path: &str, sample: Sample) -> TsdbResult<()>;

    /// Run rate aggregation for the aggregate at `period`
    async fn update_aggregate(
        &self,
        path: &str,
        period: u32,
        update: RateUpdate,
    ) -> TsdbResult<()>;

    /// Flush buffered state for the variable at `path`
    async fn flush(&self, path: &str) -> TsdbResult<()>;
}

/// Open the time-series store rooted at `root`.
///
/// The literal root `memory:` selects the in-memory backend (embedded
/// harness); anything else is a filesystem path.
pub async fn open_tsdb(root: &str) -> TsdbResult<Arc<dyn Tsdb>> {
    if root == "memory:" {
        Ok(Arc::new(MemoryTsdb::new()))
    } else {
        Ok(Arc::new(FsTsdb::open(root)?))
    }
}

/// Full per-variable record shared by the backends: caller-visible metadata
/// plus the rolling state the rate aggregator needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VarRecord {
    pub(crate) meta: VarMeta,
    /// Most recently inserted sample
    pub(crate) last: Option<Sample>,
    /// The sample before `last`
    pub(crate) previous: Option<Sample>,
    /// Period -> last sample already consumed by that aggregate
    pub(crate) agg_state: HashMap<u32, Sample>,
}

impl VarRecord {
    pub(crate) fn new(row_type: RowType, frequency: u32, chunk_mapper: ChunkMapper) -> Self {
        Self {
            meta: VarMeta {
                row_type,
                frequency,
                chunk_mapper,
                aggregates: Vec::new(),
            },
            last: None,
            previous: None,
            agg_state: HashMap::new(),
        }
    }

    pub(crate) fn record_sample(&mut self, sample: Sample) {
        self.previous = self.last;
        self.last = Some(sample);
    }

    /// Advance the aggregate at `period` by one step.
    ///
    /// Returns the computed row, or `None` when there is nothing to emit:
    /// no new sample, a too-old previous sample, a counter reset, or a rate
    /// above the hard cap (the latter invokes the informational callback).
    pub(crate) fn apply_aggregate_update(
        &mut self,
        path: &str,
        period: u32,
        update: &RateUpdate,
        uptime: Option<(f64, f64)>,
    ) -> TsdbResult<Option<AggRow>> {
        let spec = self
            .meta
            .aggregates
            .iter()
            .find(|spec| spec.period == period)
            .cloned()
            .ok_or_else(|| TsdbError::AggregateDoesNotExist {
                path: path.to_string(),
                period,
            })?;

        let Some(last) = self.last else {
            return Ok(None);
        };

        let prev = match self.agg_state.get(&period).copied() {
            Some(prev) => prev,
            None => {
                self.agg_state.insert(period, last);
                return Ok(None);
            }
        };

        if last.timestamp <= prev.timestamp {
            return Ok(None);
        }
        self.agg_state.insert(period, last);

        // the previous sample is too old to form an adjacent pair
        if prev.timestamp < update.min_last_update {
            return Ok(None);
        }

        // uptime going backwards means the device restarted and its
        // counters started over
        if let Some((uptime_prev, uptime_last)) = uptime {
            if uptime_last < uptime_prev {
                return Ok(None);
            }
        }

        let delta = last.value - prev.value;
        if delta < 0.0 {
            // counter reset without an uptime reference to confirm it
            return Ok(None);
        }

        let dt = (last.timestamp - prev.timestamp) as f64;
        let rate = delta / dt;
        if rate > update.max_rate {
            if let Some(callback) = &update.on_max_rate {
                callback(path, last.timestamp, rate);
            }
            return Ok(None);
        }

        let mut values = BTreeMap::new();
        for func in &spec.functions {
            match func {
                AggFunc::Average => {
                    values.insert("average".to_string(), rate);
                }
                AggFunc::Delta => {
                    values.insert("delta".to_string(), delta);
                }
                AggFunc::Min => {
                    values.insert("min".to_string(), rate);
                }
                AggFunc::Max => {
                    values.insert("max".to_string(), rate);
                }
            }
        }

        Ok(Some(AggRow {
            timestamp: last.timestamp,
            values,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_agg() -> VarRecord {
        let mut record = VarRecord::new(RowType::Counter64, 30, ChunkMapper::Daily);
        record.meta.aggregates.push(AggregateSpec {
            period: 30,
            chunk_mapper: ChunkMapper::Daily,
            functions: vec![AggFunc::Average, AggFunc::Delta],
        });
        record
    }

    fn update() -> RateUpdate {
        RateUpdate {
            uptime_path: None,
            min_last_update: 0,
            max_rate: 110e9,
            on_max_rate: None,
        }
    }

    fn sample(timestamp: i64, value: f64) -> Sample {
        Sample {
            timestamp,
            flags: 1,
            value,
        }
    }

    #[test]
    fn test_first_update_emits_nothing() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 100.0));
        let row = record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_second_update_emits_rate() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 100.0));
        record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap();

        record.record_sample(sample(1030, 400.0));
        let row = record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap()
            .unwrap();

        assert_eq!(row.timestamp, 1030);
        assert_eq!(row.values["delta"], 300.0);
        assert_eq!(row.values["average"], 10.0);
    }

    #[test]
    fn test_unknown_period_is_missing_aggregate() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 100.0));
        assert!(matches!(
            record.apply_aggregate_update("v", 300, &update(), None),
            Err(TsdbError::AggregateDoesNotExist { period: 300, .. })
        ));
    }

    #[test]
    fn test_rate_above_cap_is_discarded() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 0.0));
        record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap();

        record.record_sample(sample(1030, 120e9 * 30.0));
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let mut update = update();
        update.on_max_rate = Some(Arc::new(move |_path, _ts, _rate| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));

        let row = record
            .apply_aggregate_update("v", 30, &update, None)
            .unwrap();
        assert!(row.is_none());
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_counter_reset_is_skipped() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 500.0));
        record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap();

        // device restarted: uptime went backwards, counter started over
        record.record_sample(sample(1030, 10.0));
        let row = record
            .apply_aggregate_update("v", 30, &update(), Some((3000.0, 30.0)))
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_stale_previous_sample_is_skipped() {
        let mut record = record_with_agg();
        record.record_sample(sample(1000, 100.0));
        record
            .apply_aggregate_update("v", 30, &update(), None)
            .unwrap();

        record.record_sample(sample(50_000, 400.0));
        let mut update = update();
        update.min_last_update = 50_000 - 40 * 30;
        let row = record
            .apply_aggregate_update("v", 30, &update, None)
            .unwrap();
        assert!(row.is_none());
    }
}
