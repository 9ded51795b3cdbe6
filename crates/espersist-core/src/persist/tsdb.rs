//! Time-series persister
//!
//! Writes every sample of a poll result into the time-series store,
//! creating variables and their aggregates on demand, and keeps the rate
//! aggregates of aggregate-flagged OIDs up to date. The OID-set table is
//! loaded once at worker start.

use super::Persister;
use crate::error::{Error, Result};
use crate::oidset::{OidConfig, OidSetConfig, OidSetTable};
use crate::poll::PollResult;
use crate::tsdb::{AggFunc, AggregateSpec, RateUpdate, Sample, Tsdb, TsdbError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Hard cap on computed rates; anything above it is bad data
const MAX_RATE: f64 = 110e9;

/// How many sampling intervals back the aggregator still pairs samples
const STALE_INTERVALS: i64 = 40;

/// Legacy calibration: values of this set are stored as floats x100
const SPARKY_SET: &str = "SparkySet";

/// Stores samples and derived aggregates into the time-series store
pub struct TsdbPersister {
    tsdb: Arc<dyn Tsdb>,
    oidsets: OidSetTable,
}

impl TsdbPersister {
    /// Build the persister over an opened store and the worker's OID-set
    /// table
    pub fn new(tsdb: Arc<dyn Tsdb>, oidsets: OidSetTable) -> Self {
        Self { tsdb, oidsets }
    }

    fn coerce_value(value: &serde_json::Value, sparky: bool) -> Result<f64> {
        let raw = match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| Error::data(format!("unrepresentable sample value: {n}")))?,
            serde_json::Value::String(s) => s
                .parse::<f64>()
                .map_err(|_| Error::data(format!("non-numeric sample value: '{s}'")))?,
            other => {
                return Err(Error::data(format!("unusable sample value: {other}")));
            }
        };
        if sparky {
            Ok(raw * 100.0)
        } else {
            Ok(raw)
        }
    }

    async fn create_var(&self, path: &str, set: &OidSetConfig, oid: &OidConfig) -> Result<()> {
        debug!(var = %path, "creating TSDB variable");
        self.tsdb
            .add_var(path, oid.row_type, set.frequency, set.chunk_mapper)
            .await?;

        if oid.aggregate {
            self.create_aggs(path, set).await;
        }

        self.tsdb.flush(path).await?;
        Ok(())
    }

    async fn create_agg(&self, path: &str, set: &OidSetConfig, period: u32) {
        let functions = if period == set.frequency {
            vec![AggFunc::Average, AggFunc::Delta]
        } else {
            vec![AggFunc::Average, AggFunc::Delta, AggFunc::Min, AggFunc::Max]
        };
        let spec = AggregateSpec {
            period,
            chunk_mapper: set.chunk_mapper,
            functions,
        };
        if let Err(e) = self.tsdb.add_aggregate(path, spec).await {
            error!(var = %path, period, error = %e, "couldn't create aggregate");
        }
    }

    async fn create_aggs(&self, path: &str, set: &OidSetConfig) {
        self.create_agg(path, set, set.frequency).await;
        for period in &set.aggregates {
            self.create_agg(path, set, *period).await;
        }
    }

    // TODO: repair the metadata document instead of skipping the sample
    fn repair_var_metadata(&self, path: &str) {
        error!(var = %path, "var needs repair, skipping");
    }

    async fn aggregate(
        &self,
        path: &str,
        uptime_name: &str,
        timestamp: i64,
        set: &OidSetConfig,
    ) -> Result<()> {
        let uptime_path = match self.tsdb.get_var(uptime_name).await {
            Ok(_) => Some(uptime_name.to_string()),
            Err(TsdbError::VarDoesNotExist { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let update = RateUpdate {
            uptime_path,
            min_last_update: timestamp - i64::from(set.frequency) * STALE_INTERVALS,
            max_rate: MAX_RATE,
            on_max_rate: Some(Arc::new(|path: &str, timestamp: i64, rate: f64| {
                debug!(var = %path, timestamp, rate, "bad data");
            })),
        };

        match self
            .tsdb
            .update_aggregate(path, set.frequency, update.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(TsdbError::AggregateDoesNotExist { .. }) => {
                error!(var = %path, "creating missing aggregate");
                self.create_agg(path, set, set.frequency).await;
                self.tsdb.flush(path).await?;
                self.tsdb
                    .update_aggregate(path, set.frequency, update)
                    .await?;
                Ok(())
            }
            Err(TsdbError::InvalidMetadata { .. }) => {
                error!(var = %path, "bad metadata");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Persister for TsdbPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        let set = self
            .oidsets
            .get(&result.oidset_name)
            .ok_or_else(|| Error::data(format!("unknown oidset '{}'", result.oidset_name)))?;
        let set_name = set.effective_set_name(&result.oidset_name);
        let basename = format!("{}/{}", result.device_name, set_name);
        let sparky = set_name == SPARKY_SET;

        let oid = set
            .oid(&result.oid_name)
            .ok_or_else(|| Error::data(format!("unknown oid '{}'", result.oid_name)))?;

        let flags: u16 = result
            .metadata
            .get("tsdb_flags")
            .and_then(|flags| flags.parse().ok())
            .ok_or_else(|| Error::data("missing or invalid tsdb_flags metadata"))?;

        let samples = result
            .data
            .as_samples()
            .ok_or_else(|| Error::data("TSDB persister requires sample data"))?;

        let t0 = Instant::now();
        let mut nvar = 0;

        for (var, value) in samples {
            let value = Self::coerce_value(value, sparky)?;
            nvar += 1;

            let var_name = format!("{basename}/{var}");

            match self.tsdb.get_var(&var_name).await {
                Ok(_) => {}
                Err(TsdbError::VarDoesNotExist { .. }) => {
                    self.create_var(&var_name, set, oid).await?;
                }
                Err(TsdbError::InvalidMetadata { .. }) => {
                    self.repair_var_metadata(&var_name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            self.tsdb
                .insert(
                    &var_name,
                    Sample {
                        timestamp: result.timestamp,
                        flags,
                        value,
                    },
                )
                .await?;

            if oid.aggregate {
                let uptime_name = format!("{basename}/sysUpTime");
                if let Err(e) = self
                    .aggregate(&var_name, &uptime_name, result.timestamp, set)
                    .await
                {
                    error!(
                        device = %result.device_name,
                        oidset = %result.oidset_name,
                        error = %e,
                        "error aggregating"
                    );
                }
            }
        }

        debug!(
            nvar,
            elapsed_ms = %t0.elapsed().as_millis(),
            result = %result,
            "stored vars"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidset::{ChunkMapper, RowType};
    use crate::poll::PollData;
    use crate::tsdb::MemoryTsdb;
    use std::collections::HashMap;

    fn oidset(name: &str, set_name: Option<&str>, aggregate: bool) -> OidSetTable {
        let set = OidSetConfig {
            frequency: 30,
            chunk_mapper: ChunkMapper::Daily,
            set_name: set_name.map(String::from),
            aggregates: vec![300],
            oids: HashMap::from([
                (
                    "ifInOctets".to_string(),
                    OidConfig {
                        row_type: RowType::Counter64,
                        aggregate,
                    },
                ),
                (
                    "sysUpTime".to_string(),
                    OidConfig {
                        row_type: RowType::TimeTicks,
                        aggregate: false,
                    },
                ),
            ]),
        };
        OidSetTable::new(HashMap::from([(name.to_string(), set)]))
    }

    fn result(oidset_name: &str, timestamp: i64, value: i64) -> PollResult {
        PollResult {
            oidset_name: oidset_name.to_string(),
            device_name: "router1".to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp,
            data: PollData::Samples(vec![(
                "ifInOctets.1".to_string(),
                serde_json::json!(value),
            )]),
            metadata: HashMap::from([("tsdb_flags".to_string(), "1".to_string())]),
        }
    }

    fn persister(tsdb: Arc<MemoryTsdb>, oidsets: OidSetTable) -> TsdbPersister {
        TsdbPersister::new(tsdb, oidsets)
    }

    #[tokio::test]
    async fn test_store_creates_var_and_inserts() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, false));

        p.store(&result("FastPoll", 1_199_145_600, 100)).await.unwrap();

        let path = "router1/FastPoll/ifInOctets.1";
        assert!(tsdb.has_var(path));
        let samples = tsdb.samples(path);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp, 1_199_145_600);
        assert_eq!(samples[0].flags, 1);
        assert_eq!(samples[0].value, 100.0);
        // not an aggregate OID: no aggregates created
        assert!(tsdb.aggregates(path).is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_var_creation_declares_aggregates() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, true));

        p.store(&result("FastPoll", 1_199_145_600, 100)).await.unwrap();

        let aggs = tsdb.aggregates("router1/FastPoll/ifInOctets.1");
        assert_eq!(aggs.len(), 2);
        // base aggregate at the sampling frequency, average + delta only
        assert_eq!(aggs[0].period, 30);
        assert_eq!(aggs[0].functions, vec![AggFunc::Average, AggFunc::Delta]);
        // the extra period carries min/max as well
        assert_eq!(aggs[1].period, 300);
        assert_eq!(
            aggs[1].functions,
            vec![AggFunc::Average, AggFunc::Delta, AggFunc::Min, AggFunc::Max]
        );
    }

    #[tokio::test]
    async fn test_rate_row_after_two_stores() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, true));

        p.store(&result("FastPoll", 1_199_145_600, 100)).await.unwrap();
        p.store(&result("FastPoll", 1_199_145_630, 400)).await.unwrap();

        let rows = tsdb.agg_rows("router1/FastPoll/ifInOctets.1", 30);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["delta"], 300.0);
        assert_eq!(rows[0].values["average"], 10.0);
    }

    #[tokio::test]
    async fn test_sparky_values_are_scaled() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("Sparky", Some("SparkySet"), false));

        p.store(&result("Sparky", 1_199_145_600, 47)).await.unwrap();

        let samples = tsdb.samples("router1/SparkySet/ifInOctets.1");
        assert_eq!(samples[0].value, 4700.0);
    }

    #[tokio::test]
    async fn test_unknown_oidset_is_a_data_error() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb, oidset("FastPoll", None, false));

        let err = p.store(&result("SlowPoll", 1_199_145_600, 1)).await.unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[tokio::test]
    async fn test_missing_flags_is_a_data_error() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb, oidset("FastPoll", None, false));

        let mut bad = result("FastPoll", 1_199_145_600, 1);
        bad.metadata.clear();
        assert!(matches!(p.store(&bad).await, Err(Error::Data(_))));
    }

    #[tokio::test]
    async fn test_invalid_metadata_skips_sample() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, false));

        p.store(&result("FastPoll", 1_199_145_600, 100)).await.unwrap();
        tsdb.poison_metadata("router1/FastPoll/ifInOctets.1");

        // repair is not implemented: the sample is skipped, not an error
        p.store(&result("FastPoll", 1_199_145_630, 200)).await.unwrap();
        assert_eq!(tsdb.samples("router1/FastPoll/ifInOctets.1").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_aggregate_is_created_and_retried() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let path = "router1/FastPoll/ifInOctets.1";
        // variable exists but was created without its aggregates
        tsdb.add_var(path, RowType::Counter64, 30, ChunkMapper::Daily)
            .await
            .unwrap();

        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, true));
        p.store(&result("FastPoll", 1_199_145_600, 100)).await.unwrap();

        let aggs = tsdb.aggregates(path);
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].period, 30);
    }

    #[tokio::test]
    async fn test_excessive_rate_is_discarded() {
        let tsdb = Arc::new(MemoryTsdb::new());
        let mut p = persister(tsdb.clone(), oidset("FastPoll", None, true));

        p.store(&result("FastPoll", 1_199_145_600, 0)).await.unwrap();
        // 120 Gbit/s for 30 seconds: over the 110e9 cap
        p.store(&result("FastPoll", 1_199_145_630, 120_000_000_000 * 30))
            .await
            .unwrap();

        assert!(tsdb.agg_rows("router1/FastPoll/ifInOctets.1", 30).is_empty());
    }
}
