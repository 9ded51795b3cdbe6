//! Poll result data model
//!
//! A [`PollResult`] is the immutable record of one polling run: one device,
//! one OID-set, one timestamp. Pollers create them, the router fans them out
//! to persistence queues, and a persister drops them once stored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The payload of a poll result.
///
/// Time-series persisters require the `Samples` form; history-table
/// persisters require the `Tables` form. The payload is opaque to the queue
/// layer and round-trips the wire encoding verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollData {
    /// `(var_suffix, value)` pairs destined for the time-series store
    Samples(Vec<(String, serde_json::Value)>),
    /// OID name -> `(dotted_index, value)` rows for history reconciliation
    Tables(BTreeMap<String, Vec<(String, String)>>),
}

impl PollData {
    /// Number of individual values carried by this payload
    pub fn len(&self) -> usize {
        match self {
            Self::Samples(samples) => samples.len(),
            Self::Tables(tables) => tables.values().map(Vec::len).sum(),
        }
    }

    /// Whether the payload carries no values at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the payload as time-series samples
    pub fn as_samples(&self) -> Option<&[(String, serde_json::Value)]> {
        match self {
            Self::Samples(samples) => Some(samples),
            Self::Tables(_) => None,
        }
    }

    /// Borrow the payload as history tables
    pub fn as_tables(&self) -> Option<&BTreeMap<String, Vec<(String, String)>>> {
        match self {
            Self::Tables(tables) => Some(tables),
            Self::Samples(_) => None,
        }
    }
}

/// The results of one polling run.
///
/// `oidset_name` determines which persistence queues store this result
/// (case-insensitive when routed). `metadata` carries additional data about
/// the payload; some persisters require specific keys to exist (the
/// time-series persister requires `tsdb_flags`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    /// Name of the logical SNMP bundle this result belongs to
    pub oidset_name: String,
    /// Device the values were collected from
    pub device_name: String,
    /// OID this result covers
    pub oid_name: String,
    /// Collection time, seconds since the epoch
    pub timestamp: i64,
    /// The collected values
    pub data: PollData,
    /// Additional data about the payload
    pub metadata: HashMap<String, String>,
}

impl PollResult {
    /// Sharding key used by multi-worker queues: results with the same key
    /// must land on the same worker so samples stay in submission order.
    pub fn shard_key(&self) -> String {
        format!("{}:{}", self.oidset_name, self.device_name)
    }
}

impl std::fmt::Display for PollResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} {}",
            self.device_name, self.oidset_name, self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> PollResult {
        PollResult {
            oidset_name: "FastPoll".to_string(),
            device_name: "router1".to_string(),
            oid_name: "ifInOctets".to_string(),
            timestamp: 1_200_000_000,
            data: PollData::Samples(vec![(
                "ifInOctets.1".to_string(),
                serde_json::json!(100),
            )]),
            metadata: HashMap::from([("tsdb_flags".to_string(), "1".to_string())]),
        }
    }

    #[test]
    fn test_poll_data_len() {
        let samples = PollData::Samples(vec![
            ("a.1".to_string(), serde_json::json!(1)),
            ("a.2".to_string(), serde_json::json!(2)),
        ]);
        assert_eq!(samples.len(), 2);

        let tables = PollData::Tables(BTreeMap::from([
            (
                "ifDescr".to_string(),
                vec![("ifDescr.1".to_string(), "Gi0/1".to_string())],
            ),
            (
                "ifSpeed".to_string(),
                vec![
                    ("ifSpeed.1".to_string(), "1000".to_string()),
                    ("ifSpeed.2".to_string(), "1000".to_string()),
                ],
            ),
        ]));
        assert_eq!(tables.len(), 3);
        assert!(!tables.is_empty());
    }

    #[test]
    fn test_shard_key() {
        let result = sample_result();
        assert_eq!(result.shard_key(), "FastPoll:router1");
    }

    #[test]
    fn test_serde_round_trip() {
        let result = sample_result();
        let encoded = serde_json::to_vec(&result).unwrap();
        let decoded: PollResult = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_display() {
        let result = sample_result();
        assert_eq!(result.to_string(), "router1.FastPoll 1200000000");
    }
}
