//! Interval-row history reconciliation
//!
//! A history table keeps one row per entity with `end_time` in the far
//! future (the *live* row) and closed rows recording past state. The
//! reconciler compares a fresh snapshot against the live rows and emits a
//! minimal add/change/delete diff: a changed entity closes its live row and
//! inserts a fresh one, a vanished entity closes its row, an unseen entity
//! inserts one. One reconcile runs inside one transaction.
//!
//! - [`ifref`] - interface references (plain, ALU and Infinera variants)
//! - [`sap`] - ALU service access points
//! - [`lsp`] - LSP operational status

pub mod ifref;
pub mod lsp;
pub mod sap;

pub use ifref::{IfRefPersister, IfRefVariant};
pub use lsp::LspOpStatusPersister;
pub use sap::AluSapPersister;

use crate::error::Result;
use async_trait::async_trait;
use sea_orm::prelude::DateTimeUtc;
use std::collections::BTreeMap;
use tracing::error;

/// Attribute name -> value for one entity, compared structurally
pub type AttrMap = BTreeMap<String, serde_json::Value>;

/// A fresh snapshot keyed by the table's natural key
pub type Snapshot = BTreeMap<String, AttrMap>;

/// One live row as seen by the diff: its storage id plus its attributes
#[derive(Debug, Clone)]
pub struct LiveRow {
    /// Storage id used to close the row
    pub id: i32,
    /// Attribute values, shaped like the snapshot side
    pub attrs: AttrMap,
}

/// Counts of writes emitted by one reconcile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    /// Entities inserted for the first time
    pub adds: usize,
    /// Entities whose live row was replaced
    pub changes: usize,
    /// Entities whose live row was closed with no replacement
    pub deletes: usize,
}

impl std::fmt::Display for ReconcileCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.adds, self.changes, self.deletes)
    }
}

/// Row operations of one history table, scoped to one device and one open
/// transaction
#[async_trait]
pub trait HistoryTable: Send {
    /// The attribute holding the table's natural key
    fn key_attr(&self) -> &'static str;

    /// All live rows for the device
    async fn live_rows(&mut self, device_id: i32) -> Result<Vec<LiveRow>>;

    /// Set `end_time` of the row `row_id` to `now`
    async fn close_row(&mut self, row_id: i32, now: DateTimeUtc) -> Result<()>;

    /// Insert a live row (`begin_time = now`, `end_time` = far future)
    async fn insert_row(&mut self, device_id: i32, attrs: &AttrMap, now: DateTimeUtc)
        -> Result<()>;
}

/// Compare the live rows against `new_data` and apply the minimal diff.
///
/// An attribute present in the snapshot but unknown to the row shape is
/// logged and skipped during comparison. The caller owns the surrounding
/// transaction and commits after this returns.
pub async fn reconcile<T: HistoryTable + ?Sized>(
    table: &mut T,
    device_id: i32,
    mut new_data: Snapshot,
) -> Result<ReconcileCounts> {
    let now = chrono::Utc::now();
    let mut counts = ReconcileCounts::default();

    for old in table.live_rows(device_id).await? {
        let key = match old.attrs.get(table.key_attr()).and_then(|v| v.as_str()) {
            Some(key) => key.to_string(),
            None => {
                error!(row_id = old.id, key_attr = table.key_attr(), "live row has no key attribute");
                continue;
            }
        };

        if let Some(new) = new_data.remove(&key) {
            let mut changed = false;
            for (attr, new_value) in &new {
                if attr == table.key_attr() {
                    continue;
                }
                match old.attrs.get(attr) {
                    None => {
                        error!(attr = %attr, row_id = old.id, "field is not contained in the row");
                    }
                    Some(old_value) if old_value != new_value => {
                        changed = true;
                        break;
                    }
                    Some(_) => {}
                }
            }

            if changed {
                table.close_row(old.id, now).await?;
                table.insert_row(device_id, &new, now).await?;
                counts.changes += 1;
            }
        } else {
            // the entity has vanished
            table.close_row(old.id, now).await?;
            counts.deletes += 1;
        }
    }

    // anything left in the snapshot is new
    for (_key, new) in new_data {
        table.insert_row(device_id, &new, now).await?;
        counts.adds += 1;
    }

    Ok(counts)
}

/// Parse an integer-typed OID value; failures are data errors that drop
/// the offending result
pub(crate) fn parse_int(val: &str) -> crate::error::Result<i64> {
    val.trim()
        .parse::<i64>()
        .map_err(|_| crate::error::Error::data(format!("non-integer value '{val}'")))
}

/// Split a table entry name into its OID prefix and dotted index
pub(crate) fn split_index(name: &str) -> crate::error::Result<(&str, &str)> {
    name.split_once('.')
        .ok_or_else(|| crate::error::Error::data(format!("unindexed table entry '{name}'")))
}

/// Extract a text attribute; JSON null maps to `None`
pub(crate) fn attr_str(attrs: &AttrMap, name: &str) -> Option<String> {
    attrs.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Extract an i32 attribute
pub(crate) fn attr_i32(attrs: &AttrMap, name: &str) -> Option<i32> {
    attrs
        .get(name)
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok())
}

/// Extract an i64 attribute
pub(crate) fn attr_i64(attrs: &AttrMap, name: &str) -> Option<i64> {
    attrs.get(name).and_then(|v| v.as_i64())
}
