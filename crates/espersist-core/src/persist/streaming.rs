//! Streaming log persister
//!
//! Appends each poll result as a JSON record to an hourly file in the
//! configured directory. File names derive from the result's timestamp in
//! UTC (`YYYYMMDD_HH`); when a result maps to a different name than the
//! open file, the file is rotated. Records are separated by a blank line.

use super::Persister;
use crate::error::Result;
use crate::poll::PollResult;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Appends poll results to an hourly-rotated log
pub struct StreamingPersister {
    log_dir: PathBuf,
    filename: Option<String>,
    fd: Option<File>,
}

impl StreamingPersister {
    /// Persist into `log_dir`; the directory is created on first write
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            filename: None,
            fd: None,
        }
    }

    fn rotate_file(&mut self, dst: &str) -> Result<()> {
        // dropping the previous handle closes it
        self.fd = None;

        std::fs::create_dir_all(&self.log_dir)?;
        let fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join(dst))?;

        self.filename = Some(dst.to_string());
        self.fd = Some(fd);
        Ok(())
    }

    fn file_name_for(timestamp: i64) -> String {
        Utc.timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
            .format("%Y%m%d_%H")
            .to_string()
    }
}

#[async_trait]
impl Persister for StreamingPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        let dst = Self::file_name_for(result.timestamp);
        if self.filename.as_deref() != Some(dst.as_str()) {
            self.rotate_file(&dst)?;
        }

        if let Some(fd) = self.fd.as_mut() {
            serde_json::to_writer(&mut *fd, result)?;
            fd.write_all(b"\n\n")?;
        }

        debug!(
            oidset = %result.oidset_name,
            oid = %result.oid_name,
            device = %result.device_name,
            "stored poll result to streaming log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollData;
    use std::collections::HashMap;

    fn result_at(timestamp: i64) -> PollResult {
        PollResult {
            oidset_name: "FastPoll".to_string(),
            device_name: "router1".to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp,
            data: PollData::Samples(vec![(
                "ifInOctets.1".to_string(),
                serde_json::json!(100),
            )]),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_file_name_for() {
        // 2008-01-01 00:00:30 UTC
        assert_eq!(StreamingPersister::file_name_for(1_199_145_630), "20080101_00");
        // 2008-01-01 13:00:00 UTC
        assert_eq!(StreamingPersister::file_name_for(1_199_192_400), "20080101_13");
    }

    #[tokio::test]
    async fn test_records_are_blank_line_separated() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamingPersister::new(dir.path().to_path_buf());

        persister.store(&result_at(1_199_145_600)).await.unwrap();
        persister.store(&result_at(1_199_145_630)).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("20080101_00")).unwrap();
        let records: Vec<&str> = contents.trim_end().split("\n\n").collect();
        assert_eq!(records.len(), 2);
        let decoded: PollResult = serde_json::from_str(records[0]).unwrap();
        assert_eq!(decoded.timestamp, 1_199_145_600);
    }

    #[tokio::test]
    async fn test_rotation_on_hour_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamingPersister::new(dir.path().to_path_buf());

        persister.store(&result_at(1_199_145_600)).await.unwrap();
        // one hour later
        persister.store(&result_at(1_199_149_200)).await.unwrap();

        assert!(dir.path().join("20080101_00").exists());
        assert!(dir.path().join("20080101_01").exists());
    }

    #[tokio::test]
    async fn test_rotation_reopens_in_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamingPersister::new(dir.path().to_path_buf());

        persister.store(&result_at(1_199_145_600)).await.unwrap();
        drop(persister);

        // a restarted worker appends rather than truncating
        let mut persister = StreamingPersister::new(dir.path().to_path_buf());
        persister.store(&result_at(1_199_145_630)).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("20080101_00")).unwrap();
        assert_eq!(contents.trim_end().split("\n\n").count(), 2);
    }
}
