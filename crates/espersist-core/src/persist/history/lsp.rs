//! LSP operational status history
//!
//! LSP OID names map through a small rename table; the state value is
//! integer-coerced and everything else kept as text. The entity key is the
//! LSP name: the last dotted component of the entry index, quotes
//! stripped.

use super::{
    attr_i32, attr_str, parse_int, reconcile, AttrMap, HistoryTable, LiveRow, ReconcileCounts,
    Snapshot,
};
use crate::error::{Error, Result};
use crate::persist::Persister;
use crate::poll::PollResult;
use crate::sql::{find_live_device, infinity, lspopstatus};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeUtc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

type Tables = BTreeMap<String, Vec<(String, String)>>;

fn rename_oid(oid: &str) -> Result<&'static str> {
    match oid {
        "mplsLspInfoState" => Ok("state"),
        "mplsLspInfoFrom" => Ok("srcaddr"),
        "mplsLspInfoTo" => Ok("dstaddr"),
        other => Err(Error::data(format!("unknown LSP oid '{other}'"))),
    }
}

/// Build the snapshot keyed by LSP name
pub(crate) fn build_snapshot(tables: &Tables) -> Result<Snapshot> {
    let mut objs = Snapshot::new();

    for (oid, entries) in tables {
        let attr = rename_oid(oid)?;
        for (index, val) in entries {
            let name = index
                .rsplit('.')
                .next()
                .unwrap_or(index.as_str())
                .replace('\'', "");

            let value = if oid == "mplsLspInfoState" {
                json!(parse_int(val)?)
            } else {
                json!(val)
            };

            let obj = objs.entry(name.clone()).or_insert_with(|| {
                AttrMap::from([("name".to_string(), json!(name))])
            });
            obj.insert(attr.to_string(), value);
        }
    }

    Ok(objs)
}

fn attr_map(model: &lspopstatus::Model) -> AttrMap {
    AttrMap::from([
        ("name".to_string(), json!(model.name)),
        ("state".to_string(), json!(model.state)),
        ("srcaddr".to_string(), json!(model.srcaddr)),
        ("dstaddr".to_string(), json!(model.dstaddr)),
    ])
}

struct LspTable<'a> {
    txn: &'a DatabaseTransaction,
}

#[async_trait]
impl HistoryTable for LspTable<'_> {
    fn key_attr(&self) -> &'static str {
        "name"
    }

    async fn live_rows(&mut self, device_id: i32) -> Result<Vec<LiveRow>> {
        let models = lspopstatus::Entity::find()
            .filter(lspopstatus::Column::Deviceid.eq(device_id))
            .filter(lspopstatus::Column::EndTime.gt(Utc::now()))
            .all(self.txn)
            .await?;
        Ok(models
            .into_iter()
            .map(|model| LiveRow {
                id: model.id,
                attrs: attr_map(&model),
            })
            .collect())
    }

    async fn close_row(&mut self, row_id: i32, now: DateTimeUtc) -> Result<()> {
        lspopstatus::ActiveModel {
            id: Set(row_id),
            end_time: Set(now),
            ..Default::default()
        }
        .update(self.txn)
        .await?;
        Ok(())
    }

    async fn insert_row(
        &mut self,
        device_id: i32,
        attrs: &AttrMap,
        now: DateTimeUtc,
    ) -> Result<()> {
        let name = attr_str(attrs, "name")
            .ok_or_else(|| Error::data("LSP snapshot entry has no name"))?;

        lspopstatus::ActiveModel {
            deviceid: Set(device_id),
            begin_time: Set(now),
            end_time: Set(infinity()),
            name: Set(name),
            state: Set(attr_i32(attrs, "state")),
            srcaddr: Set(attr_str(attrs, "srcaddr")),
            dstaddr: Set(attr_str(attrs, "dstaddr")),
            ..Default::default()
        }
        .insert(self.txn)
        .await?;
        Ok(())
    }
}

/// Reconciles LSP status snapshots against the `lspopstatus` history table
pub struct LspOpStatusPersister {
    db: DatabaseConnection,
}

impl LspOpStatusPersister {
    /// Build the persister over a worker-owned database session
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Run one reconcile and report the emitted diff
    pub async fn reconcile_snapshot(&self, result: &PollResult) -> Result<ReconcileCounts> {
        let t0 = Instant::now();
        let tables = result
            .data
            .as_tables()
            .ok_or_else(|| Error::data("history persister requires table data"))?;
        let new_data = build_snapshot(tables)?;
        let nvar = new_data.len();

        let txn = self.db.begin().await?;
        let device = find_live_device(&txn, &result.device_name).await?;
        let counts = {
            let mut table = LspTable { txn: &txn };
            reconcile(&mut table, device.id, new_data).await?
        };
        txn.commit().await?;

        debug!(
            nvar,
            counts = %counts,
            elapsed_ms = %t0.elapsed().as_millis(),
            result = %result,
            "processed LSP vars"
        );
        Ok(counts)
    }
}

#[async_trait]
impl Persister for LspOpStatusPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        self.reconcile_snapshot(result).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, val: &str) -> (String, String) {
        (name.to_string(), val.to_string())
    }

    #[test]
    fn test_snapshot_renames_and_coerces() {
        let tables = Tables::from([
            (
                "mplsLspInfoState".to_string(),
                vec![entry("mplsLspInfoState.'to-chicago'", "2")],
            ),
            (
                "mplsLspInfoFrom".to_string(),
                vec![entry("mplsLspInfoFrom.'to-chicago'", "10.0.0.1")],
            ),
            (
                "mplsLspInfoTo".to_string(),
                vec![entry("mplsLspInfoTo.'to-chicago'", "10.0.0.2")],
            ),
        ]);

        let snapshot = build_snapshot(&tables).unwrap();
        assert_eq!(snapshot.len(), 1);
        let lsp = &snapshot["to-chicago"];
        assert_eq!(lsp["name"], json!("to-chicago"));
        assert_eq!(lsp["state"], json!(2));
        assert_eq!(lsp["srcaddr"], json!("10.0.0.1"));
        assert_eq!(lsp["dstaddr"], json!("10.0.0.2"));
    }

    #[test]
    fn test_unknown_oid_is_a_data_error() {
        let tables = Tables::from([(
            "mplsLspInfoBandwidth".to_string(),
            vec![entry("mplsLspInfoBandwidth.'x'", "100")],
        )]);
        assert!(matches!(build_snapshot(&tables), Err(Error::Data(_))));
    }

    #[test]
    fn test_non_integer_state_is_a_data_error() {
        let tables = Tables::from([(
            "mplsLspInfoState".to_string(),
            vec![entry("mplsLspInfoState.'x'", "up")],
        )]);
        assert!(matches!(build_snapshot(&tables), Err(Error::Data(_))));
    }
}
