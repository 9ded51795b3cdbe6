//! Error types for espersist Core

use thiserror::Error;

/// espersist Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Counter store error
    #[error("Store error: {0}")]
    Store(#[from] crate::queue::store::StoreError),

    /// Time-series store error
    #[error("TSDB error: {0}")]
    Tsdb(#[from] crate::tsdb::TsdbError),

    /// A poll result that cannot be persisted (unknown OID-set, missing
    /// device, malformed snapshot); the offending result is dropped
    #[error("Bad poll result: {0}")]
    Data(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error from any displayable message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Build a database error from any displayable message
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Build a data error from any displayable message
    pub fn data<S: Into<String>>(msg: S) -> Self {
        Self::Data(msg.into())
    }
}

impl From<sea_orm::DbErr> for Error {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Database(e.to_string())
    }
}

/// espersist Core result type
pub type Result<T> = std::result::Result<T, Error>;
