//! Configuration type definitions

use crate::persist::PersisterKind;
use serde::{Deserialize, Serialize};

fn default_workers() -> usize {
    1
}

/// One entry of the `persist_queues` table: which persister drains a queue
/// and with how many worker processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    /// Persister class draining this queue
    pub class: PersisterKind,
    /// Number of worker processes; queues with more than one worker are
    /// sharded with sticky per-source assignment
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_spec_decoding() {
        let spec: QueueSpec =
            toml::from_str(r#"class = "TSDBPollPersister""#).unwrap();
        assert_eq!(spec.class, PersisterKind::Tsdb);
        assert_eq!(spec.workers, 1);

        let spec: QueueSpec =
            toml::from_str(r#"class = "IfRefPollPersister"
workers = 4"#)
            .unwrap();
        assert_eq!(spec.class, PersisterKind::IfRef);
        assert_eq!(spec.workers, 4);
    }

    #[test]
    fn test_unknown_class_rejected() {
        let result: std::result::Result<QueueSpec, _> =
            toml::from_str(r#"class = "NoSuchPersister""#);
        assert!(result.is_err());
    }
}
