//! In-memory time-series backend
//!
//! Backs tests and the embedded harness. Keeps every sample and aggregate
//! row reachable so tests can assert on what a persister stored, and can
//! poison a variable's metadata to exercise the invalid-metadata paths.

use super::{
    AggRow, AggregateSpec, RateUpdate, Sample, Tsdb, TsdbError, TsdbResult, VarMeta, VarRecord,
};
use crate::oidset::{ChunkMapper, RowType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

struct VarEntry {
    record: VarRecord,
    samples: Vec<Sample>,
    agg_rows: HashMap<u32, Vec<AggRow>>,
    poisoned: bool,
}

/// Whole-store-in-RAM [`Tsdb`] backend
#[derive(Default)]
pub struct MemoryTsdb {
    vars: Mutex<HashMap<String, VarEntry>>,
}

impl MemoryTsdb {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a variable exists
    pub fn has_var(&self, path: &str) -> bool {
        self.vars.lock().unwrap().contains_key(path)
    }

    /// Samples stored for a variable, in insertion order
    pub fn samples(&self, path: &str) -> Vec<Sample> {
        self.vars
            .lock()
            .unwrap()
            .get(path)
            .map(|entry| entry.samples.clone())
            .unwrap_or_default()
    }

    /// Aggregate rows stored for a variable's aggregate at `period`
    pub fn agg_rows(&self, path: &str, period: u32) -> Vec<AggRow> {
        self.vars
            .lock()
            .unwrap()
            .get(path)
            .and_then(|entry| entry.agg_rows.get(&period).cloned())
            .unwrap_or_default()
    }

    /// Declared aggregates of a variable
    pub fn aggregates(&self, path: &str) -> Vec<AggregateSpec> {
        self.vars
            .lock()
            .unwrap()
            .get(path)
            .map(|entry| entry.record.meta.aggregates.clone())
            .unwrap_or_default()
    }

    /// Mark a variable's metadata as unreadable; subsequent operations on
    /// it fail with `InvalidMetadata`
    pub fn poison_metadata(&self, path: &str) {
        if let Some(entry) = self.vars.lock().unwrap().get_mut(path) {
            entry.poisoned = true;
        }
    }
}

fn invalid(path: &str) -> TsdbError {
    TsdbError::InvalidMetadata {
        path: path.to_string(),
        reason: "metadata poisoned".to_string(),
    }
}

#[async_trait]
impl Tsdb for MemoryTsdb {
    async fn get_var(&self, path: &str) -> TsdbResult<VarMeta> {
        let vars = self.vars.lock().unwrap();
        let entry = vars.get(path).ok_or_else(|| TsdbError::VarDoesNotExist {
            path: path.to_string(),
        })?;
        if entry.poisoned {
            return Err(invalid(path));
        }
        Ok(entry.record.meta.clone())
    }

    async fn add_var(
        &self,
        path: &str,
        row_type: RowType,
        frequency: u32,
        chunk_mapper: ChunkMapper,
    ) -> TsdbResult<()> {
        let mut vars = self.vars.lock().unwrap();
        vars.entry(path.to_string()).or_insert_with(|| VarEntry {
            record: VarRecord::new(row_type, frequency, chunk_mapper),
            samples: Vec::new(),
            agg_rows: HashMap::new(),
            poisoned: false,
        });
        Ok(())
    }

    async fn add_aggregate(&self, path: &str, spec: AggregateSpec) -> TsdbResult<()> {
        let mut vars = self.vars.lock().unwrap();
        let entry = vars
            .get_mut(path)
            .ok_or_else(|| TsdbError::VarDoesNotExist {
                path: path.to_string(),
            })?;
        if entry.poisoned {
            return Err(invalid(path));
        }
        if entry
            .record
            .meta
            .aggregates
            .iter()
            .any(|existing| existing.period == spec.period)
        {
            return Err(TsdbError::AggregateExists {
                path: path.to_string(),
                period: spec.period,
            });
        }
        entry.record.meta.aggregates.push(spec);
        Ok(())
    }

    async fn insert(&self, path: &str, sample: Sample) -> TsdbResult<()> {
        let mut vars = self.vars.lock().unwrap();
        let entry = vars
            .get_mut(path)
            .ok_or_else(|| TsdbError::VarDoesNotExist {
                path: path.to_string(),
            })?;
        if entry.poisoned {
            return Err(invalid(path));
        }
        entry.record.record_sample(sample);
        entry.samples.push(sample);
        Ok(())
    }

    async fn update_aggregate(
        &self,
        path: &str,
        period: u32,
        update: RateUpdate,
    ) -> TsdbResult<()> {
        let mut vars = self.vars.lock().unwrap();

        let uptime = update
            .uptime_path
            .as_deref()
            .and_then(|uptime_path| vars.get(uptime_path))
            .and_then(|entry| match (entry.record.previous, entry.record.last) {
                (Some(prev), Some(last)) => Some((prev.value, last.value)),
                _ => None,
            });

        let entry = vars
            .get_mut(path)
            .ok_or_else(|| TsdbError::VarDoesNotExist {
                path: path.to_string(),
            })?;
        if entry.poisoned {
            return Err(invalid(path));
        }

        if let Some(row) = entry
            .record
            .apply_aggregate_update(path, period, &update, uptime)?
        {
            entry.agg_rows.entry(period).or_default().push(row);
        }
        Ok(())
    }

    async fn flush(&self, _path: &str) -> TsdbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsdb::AggFunc;

    fn sample(timestamp: i64, value: f64) -> Sample {
        Sample {
            timestamp,
            flags: 1,
            value,
        }
    }

    #[tokio::test]
    async fn test_var_lifecycle() {
        let tsdb = MemoryTsdb::new();
        assert!(matches!(
            tsdb.get_var("r1/FastPoll/ifInOctets.1").await,
            Err(TsdbError::VarDoesNotExist { .. })
        ));

        tsdb.add_var(
            "r1/FastPoll/ifInOctets.1",
            RowType::Counter64,
            30,
            ChunkMapper::Daily,
        )
        .await
        .unwrap();

        let meta = tsdb.get_var("r1/FastPoll/ifInOctets.1").await.unwrap();
        assert_eq!(meta.frequency, 30);
        assert!(meta.aggregates.is_empty());

        tsdb.insert("r1/FastPoll/ifInOctets.1", sample(1000, 100.0))
            .await
            .unwrap();
        assert_eq!(tsdb.samples("r1/FastPoll/ifInOctets.1").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_aggregate_rejected() {
        let tsdb = MemoryTsdb::new();
        tsdb.add_var("v", RowType::Counter64, 30, ChunkMapper::Daily)
            .await
            .unwrap();

        let spec = AggregateSpec {
            period: 30,
            chunk_mapper: ChunkMapper::Daily,
            functions: vec![AggFunc::Average, AggFunc::Delta],
        };
        tsdb.add_aggregate("v", spec.clone()).await.unwrap();
        assert!(matches!(
            tsdb.add_aggregate("v", spec).await,
            Err(TsdbError::AggregateExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_aggregation_with_uptime_reset() {
        let tsdb = MemoryTsdb::new();
        tsdb.add_var("v", RowType::Counter64, 30, ChunkMapper::Daily)
            .await
            .unwrap();
        tsdb.add_aggregate(
            "v",
            AggregateSpec {
                period: 30,
                chunk_mapper: ChunkMapper::Daily,
                functions: vec![AggFunc::Average, AggFunc::Delta],
            },
        )
        .await
        .unwrap();
        tsdb.add_var("up", RowType::TimeTicks, 30, ChunkMapper::Daily)
            .await
            .unwrap();

        let update = RateUpdate {
            uptime_path: Some("up".to_string()),
            min_last_update: 0,
            max_rate: 110e9,
            on_max_rate: None,
        };

        tsdb.insert("up", sample(1000, 100_000.0)).await.unwrap();
        tsdb.insert("v", sample(1000, 500.0)).await.unwrap();
        tsdb.update_aggregate("v", 30, update.clone()).await.unwrap();

        // uptime went backwards: the counter reset, no rate row
        tsdb.insert("up", sample(1030, 10.0)).await.unwrap();
        tsdb.insert("v", sample(1030, 20.0)).await.unwrap();
        tsdb.update_aggregate("v", 30, update).await.unwrap();

        assert!(tsdb.agg_rows("v", 30).is_empty());
    }

    #[tokio::test]
    async fn test_poisoned_metadata() {
        let tsdb = MemoryTsdb::new();
        tsdb.add_var("v", RowType::Counter64, 30, ChunkMapper::Daily)
            .await
            .unwrap();
        tsdb.poison_metadata("v");
        assert!(matches!(
            tsdb.get_var("v").await,
            Err(TsdbError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            tsdb.insert("v", sample(1000, 1.0)).await,
            Err(TsdbError::InvalidMetadata { .. })
        ));
    }
}
