//! Persister strategies
//!
//! A persister commits poll results to their final resting place. Which
//! persister drains a queue is configured by class name; the names map
//! through an explicit registry ([`PersisterKind`]) and unknown names are
//! rejected when the configuration loads.
//!
//! - [`tsdb`] - samples and derived aggregates into the time-series store
//! - [`history`] - interval-row reconciliation against the relational store
//! - [`streaming`] - append-only hourly-rotated log

pub mod history;
pub mod streaming;
pub mod tsdb;

pub use history::{AluSapPersister, IfRefPersister, IfRefVariant, LspOpStatusPersister};
pub use streaming::StreamingPersister;
pub use tsdb::TsdbPersister;

use crate::config::Config;
use crate::error::Result;
use crate::oidset::OidSetTable;
use crate::poll::PollResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A storage method for poll results
#[async_trait]
pub trait Persister: Send {
    /// Commit one poll result
    async fn store(&mut self, result: &PollResult) -> Result<()>;
}

/// Registry of persister classes, keyed by their configured class names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersisterKind {
    /// Time-series samples and aggregates
    #[serde(rename = "TSDBPollPersister")]
    Tsdb,
    /// Interface reference history
    #[serde(rename = "IfRefPollPersister")]
    IfRef,
    /// Interface reference history, ALU ifDescr conventions
    #[serde(rename = "ALUIfRefPollPersister")]
    AluIfRef,
    /// Interface reference history emulated for Infinera gear
    #[serde(rename = "InfIfRefPollPersister")]
    InfIfRef,
    /// ALU service access point history
    #[serde(rename = "ALUSAPRefPersister")]
    AluSap,
    /// LSP operational status history
    #[serde(rename = "LSPOpStatusPersister")]
    LspOpStatus,
    /// Streaming log
    #[serde(rename = "StreamingPollPersister")]
    Streaming,
}

impl PersisterKind {
    /// The configured class name of this kind
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Tsdb => "TSDBPollPersister",
            Self::IfRef => "IfRefPollPersister",
            Self::AluIfRef => "ALUIfRefPollPersister",
            Self::InfIfRef => "InfIfRefPollPersister",
            Self::AluSap => "ALUSAPRefPersister",
            Self::LspOpStatus => "LSPOpStatusPersister",
            Self::Streaming => "StreamingPollPersister",
        }
    }
}

impl std::fmt::Display for PersisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Construct the persister of the given kind.
///
/// Performs the per-worker initialization: opening the time-series store,
/// loading the OID-set table, or connecting a dedicated database session.
/// State built here is owned by one worker and never shared.
pub async fn build_persister(kind: PersisterKind, config: &Config) -> Result<Box<dyn Persister>> {
    match kind {
        PersisterKind::Tsdb => {
            let tsdb = crate::tsdb::open_tsdb(&config.tsdb_root).await?;
            let oidsets = OidSetTable::new(config.oidsets.clone());
            Ok(Box::new(TsdbPersister::new(tsdb, oidsets)))
        }
        PersisterKind::IfRef => {
            let db = crate::sql::setup_db(&config.db_uri).await?;
            Ok(Box::new(IfRefPersister::new(db, IfRefVariant::Plain)))
        }
        PersisterKind::AluIfRef => {
            let db = crate::sql::setup_db(&config.db_uri).await?;
            Ok(Box::new(IfRefPersister::new(db, IfRefVariant::Alu)))
        }
        PersisterKind::InfIfRef => {
            let db = crate::sql::setup_db(&config.db_uri).await?;
            Ok(Box::new(IfRefPersister::new(db, IfRefVariant::Infinera)))
        }
        PersisterKind::AluSap => {
            let db = crate::sql::setup_db(&config.db_uri).await?;
            Ok(Box::new(AluSapPersister::new(db)))
        }
        PersisterKind::LspOpStatus => {
            let db = crate::sql::setup_db(&config.db_uri).await?;
            Ok(Box::new(LspOpStatusPersister::new(db)))
        }
        PersisterKind::Streaming => Ok(Box::new(StreamingPersister::new(
            config.streaming_log_dir.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names_round_trip() {
        for kind in [
            PersisterKind::Tsdb,
            PersisterKind::IfRef,
            PersisterKind::AluIfRef,
            PersisterKind::InfIfRef,
            PersisterKind::AluSap,
            PersisterKind::LspOpStatus,
            PersisterKind::Streaming,
        ] {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.class_name()));
            let decoded: PersisterKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn test_unknown_class_name_rejected() {
        let result: std::result::Result<PersisterKind, _> =
            serde_json::from_str("\"MysteryPersister\"");
        assert!(result.is_err());
    }
}
