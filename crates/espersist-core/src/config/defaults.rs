//! Default configuration values for espersist

/// Queue store defaults
pub mod store {
    /// Default counter-store URI
    pub const DEFAULT_ESPERSISTD_URI: &str = "redis://127.0.0.1:6379/";
    /// Counter-store URI used when `ESXSNMP_TESTING` is set
    pub const EMBEDDED_ESPERSISTD_URI: &str = "memory://embedded";
}

/// Relational store defaults
pub mod database {
    /// Default relational store URI
    pub const DEFAULT_DB_URI: &str = "postgres://localhost/espersist";
    /// Relational store URI used when `ESXSNMP_TESTING` is set
    pub const EMBEDDED_DB_URI: &str = "sqlite::memory:";
}

/// Filesystem defaults
pub mod paths {
    /// Default time-series store root
    pub const DEFAULT_TSDB_ROOT: &str = "/var/lib/espersist/tsdb";
    /// Default streaming log directory
    pub const DEFAULT_STREAMING_LOG_DIR: &str = "/var/log/espersist/streaming";
    /// Default pid file directory
    pub const DEFAULT_PID_DIR: &str = "/var/run/espersist";
}

/// Logging defaults
pub mod logging {
    /// Default syslog facility
    pub const DEFAULT_SYSLOG_FACILITY: &str = "daemon";
    /// Default log priority
    pub const DEFAULT_SYSLOG_PRIORITY: &str = "info";
}
