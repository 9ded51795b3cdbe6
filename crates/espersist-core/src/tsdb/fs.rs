//! Filesystem time-series backend
//!
//! Each variable lives in a directory under the store root named by its
//! `/`-separated path. The directory holds a `metadata.json` document (the
//! caller-visible metadata plus the aggregator's rolling state) and
//! append-only chunk files: `data.<chunk>` for samples and
//! `agg.<period>.<chunk>` for aggregate rows, one JSON record per line.
//! Chunk names come from the variable's chunk mapper.

use super::{
    AggRow, AggregateSpec, RateUpdate, Sample, Tsdb, TsdbError, TsdbResult, VarMeta, VarRecord,
};
use crate::oidset::{ChunkMapper, RowType};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";

/// [`Tsdb`] backend rooted at a directory
pub struct FsTsdb {
    root: PathBuf,
}

impl FsTsdb {
    /// Open (creating if needed) the store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> TsdbResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn var_dir(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn load_record(&self, path: &str) -> TsdbResult<VarRecord> {
        let meta_path = self.var_dir(path).join(METADATA_FILE);
        let bytes = match std::fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TsdbError::VarDoesNotExist {
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|e| TsdbError::InvalidMetadata {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn save_record(&self, path: &str, record: &VarRecord) -> TsdbResult<()> {
        let bytes = serde_json::to_vec(record).map_err(|e| TsdbError::Encoding(e.to_string()))?;
        std::fs::write(self.var_dir(path).join(METADATA_FILE), bytes)?;
        Ok(())
    }

    fn append_line(&self, file: &Path, line: &[u8]) -> TsdbResult<()> {
        let mut fd = OpenOptions::new().create(true).append(true).open(file)?;
        fd.write_all(line)?;
        fd.write_all(b"\n")?;
        Ok(())
    }

    fn uptime_values(&self, uptime_path: Option<&str>) -> Option<(f64, f64)> {
        let record = self.load_record(uptime_path?).ok()?;
        match (record.previous, record.last) {
            (Some(prev), Some(last)) => Some((prev.value, last.value)),
            _ => None,
        }
    }
}

#[async_trait]
impl Tsdb for FsTsdb {
    async fn get_var(&self, path: &str) -> TsdbResult<VarMeta> {
        Ok(self.load_record(path)?.meta)
    }

    async fn add_var(
        &self,
        path: &str,
        row_type: RowType,
        frequency: u32,
        chunk_mapper: ChunkMapper,
    ) -> TsdbResult<()> {
        let dir = self.var_dir(path);
        std::fs::create_dir_all(&dir)?;
        if dir.join(METADATA_FILE).exists() {
            return Ok(());
        }
        self.save_record(path, &VarRecord::new(row_type, frequency, chunk_mapper))
    }

    async fn add_aggregate(&self, path: &str, spec: AggregateSpec) -> TsdbResult<()> {
        let mut record = self.load_record(path)?;
        if record
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
        record.meta.aggregates.push(spec);
        self.save_record(path, &record)
    }

    async fn insert(&self, path: &str, sample: Sample) -> TsdbResult<()> {
        let mut record = self.load_record(path)?;
        record.record_sample(sample);

        let chunk = record.meta.chunk_mapper.chunk_name(sample.timestamp);
        let line = serde_json::to_vec(&sample).map_err(|e| TsdbError::Encoding(e.to_string()))?;
        self.append_line(&self.var_dir(path).join(format!("data.{chunk}")), &line)?;

        self.save_record(path, &record)
    }

    async fn update_aggregate(
        &self,
        path: &str,
        period: u32,
        update: RateUpdate,
    ) -> TsdbResult<()> {
        let uptime = self.uptime_values(update.uptime_path.as_deref());
        let mut record = self.load_record(path)?;

        if let Some(row) = record.apply_aggregate_update(path, period, &update, uptime)? {
            let chunk_mapper = record
                .meta
                .aggregates
                .iter()
                .find(|spec| spec.period == period)
                .map_or(record.meta.chunk_mapper, |spec| spec.chunk_mapper);
            let chunk = chunk_mapper.chunk_name(row.timestamp);
            let line =
                serde_json::to_vec(&row).map_err(|e| TsdbError::Encoding(e.to_string()))?;
            self.append_line(
                &self.var_dir(path).join(format!("agg.{period}.{chunk}")),
                &line,
            )?;
        }

        self.save_record(path, &record)
    }

    async fn flush(&self, _path: &str) -> TsdbResult<()> {
        // records and chunks are written through on every operation
        Ok(())
    }
}
