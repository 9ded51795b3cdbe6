//! Core configuration structure and implementations

use crate::error::{Error, Result};
use crate::oidset::OidSetConfig;
use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::defaults;
use super::types::QueueSpec;

/// Main configuration structure for espersist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Counter-store URI backing the persistence queues
    #[serde(default = "default_espersistd_uri")]
    pub espersistd_uri: String,
    /// Relational store URI
    #[serde(default = "default_db_uri")]
    pub db_uri: String,
    /// Time-series store root
    #[serde(default = "default_tsdb_root")]
    pub tsdb_root: String,
    /// Directory receiving the hourly-rotated streaming log
    #[serde(default = "default_streaming_log_dir")]
    pub streaming_log_dir: PathBuf,
    /// Directory for pid files
    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,
    /// Syslog facility recorded for the daemon's log output
    #[serde(default = "default_syslog_facility")]
    pub syslog_facility: String,
    /// Default log priority (trace, debug, info, warn, error)
    #[serde(default = "default_syslog_priority")]
    pub syslog_priority: String,
    /// Sink specs (`kind:uri`) for the in-process persist client
    #[serde(default)]
    pub espoll_persist_uri: Vec<String>,
    /// Queue name -> persister class and worker count
    #[serde(default)]
    pub persist_queues: HashMap<String, QueueSpec>,
    /// Lower-cased OID-set name -> target queue names
    #[serde(default)]
    pub persist_map: HashMap<String, Vec<String>>,
    /// OID-set name -> set configuration
    #[serde(default)]
    pub oidsets: HashMap<String, OidSetConfig>,
}

fn default_espersistd_uri() -> String {
    defaults::store::DEFAULT_ESPERSISTD_URI.to_string()
}

fn default_db_uri() -> String {
    defaults::database::DEFAULT_DB_URI.to_string()
}

fn default_tsdb_root() -> String {
    defaults::paths::DEFAULT_TSDB_ROOT.to_string()
}

fn default_streaming_log_dir() -> PathBuf {
    PathBuf::from(defaults::paths::DEFAULT_STREAMING_LOG_DIR)
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from(defaults::paths::DEFAULT_PID_DIR)
}

fn default_syslog_facility() -> String {
    defaults::logging::DEFAULT_SYSLOG_FACILITY.to_string()
}

fn default_syslog_priority() -> String {
    defaults::logging::DEFAULT_SYSLOG_PRIORITY.to_string()
}

impl Config {
    /// Loads configuration from a TOML file, applies the embedded-database
    /// override when `ESXSNMP_TESTING` is truthy, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            Error::config(format!(
                "Configuration file path contains invalid UTF-8: {}",
                path.as_ref().display()
            ))
        })?;

        let config = ConfigBuilder::builder()
            .add_source(File::with_name(path_str))
            .build()
            .map_err(|e| {
                Error::config(format!(
                    "Failed to load configuration from '{path_str}': {e}"
                ))
            })?;

        let mut config: Self = config.try_deserialize().map_err(|e| {
            Error::config(format!(
                "Failed to parse configuration from '{path_str}': {e}"
            ))
        })?;

        if testing_env() {
            config.apply_embedded_overrides();
        }
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Swaps in the embedded backends used by the test harness
    pub fn apply_embedded_overrides(&mut self) {
        self.db_uri = defaults::database::EMBEDDED_DB_URI.to_string();
        self.espersistd_uri = defaults::store::EMBEDDED_ESPERSISTD_URI.to_string();
    }

    /// Lower-cases the `persist_map` keys; routing is case-insensitive
    fn normalize(&mut self) {
        let lowered = self
            .persist_map
            .drain()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self.persist_map = lowered;
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any values are invalid: empty store URIs, a queue
    /// with zero workers, or a `persist_map` entry naming an unknown queue.
    pub fn validate(&self) -> Result<()> {
        if self.db_uri.is_empty() {
            return Err(Error::config("db_uri cannot be empty"));
        }

        let store_uri = url::Url::parse(&self.espersistd_uri).map_err(|e| {
            Error::config(format!(
                "Invalid espersistd_uri '{}': {e}",
                self.espersistd_uri
            ))
        })?;
        match store_uri.scheme() {
            "redis" | "rediss" | "memory" => {}
            other => {
                return Err(Error::config(format!(
                    "Unsupported espersistd_uri scheme '{other}'"
                )));
            }
        }

        for (qname, spec) in &self.persist_queues {
            if spec.workers == 0 {
                return Err(Error::config(format!(
                    "Queue '{qname}' must have at least one worker"
                )));
            }
        }

        for (oidset, qnames) in &self.persist_map {
            for qname in qnames {
                if !self.persist_queues.contains_key(qname) {
                    return Err(Error::config(format!(
                        "persist_map entry '{oidset}' targets unknown queue '{qname}'"
                    )));
                }
            }
        }

        crate::logging::validate_log_level(&self.syslog_priority)?;

        Ok(())
    }

    /// Look up the spec of a configured queue
    pub fn queue_spec(&self, qname: &str) -> Result<&QueueSpec> {
        self.persist_queues
            .get(qname)
            .ok_or_else(|| Error::config(format!("Unknown queue '{qname}'")))
    }
}

/// Whether the `ESXSNMP_TESTING` environment variable is truthy
fn testing_env() -> bool {
    match std::env::var("ESXSNMP_TESTING") {
        Ok(v) => !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        espersistd_uri = "memory://test"
        db_uri = "sqlite::memory:"
        tsdb_root = "/tmp/tsdb"
        streaming_log_dir = "/tmp/streaming"

        [persist_queues.tsdb]
        class = "TSDBPollPersister"
        workers = 3

        [persist_queues.ifref]
        class = "IfRefPollPersister"

        [persist_map]
        FastPoll = ["tsdb"]
        ifrefpoll = ["ifref"]
    "#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_sample_config() {
        let file = write_config(SAMPLE);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.espersistd_uri, "memory://test");
        assert_eq!(config.persist_queues["tsdb"].workers, 3);
        assert_eq!(config.persist_queues["ifref"].workers, 1);
        // persist_map keys are lowered at load
        assert_eq!(config.persist_map["fastpoll"], vec!["tsdb".to_string()]);
        assert!(config.persist_map.contains_key("ifrefpoll"));
    }

    #[test]
    fn test_unknown_queue_target_rejected() {
        let file = write_config(
            r#"
            espersistd_uri = "memory://test"

            [persist_map]
            fastpoll = ["nosuchqueue"]
            "#,
        );
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("unknown queue"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let file = write_config(
            r#"
            espersistd_uri = "memory://test"

            [persist_queues.tsdb]
            class = "TSDBPollPersister"
            workers = 0
            "#,
        );
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_bad_store_scheme_rejected() {
        let file = write_config(r#"espersistd_uri = "ftp://nope""#);
        assert!(Config::from_file(file.path()).is_err());
    }
}
