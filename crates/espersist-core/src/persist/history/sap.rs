//! ALU service access point history
//!
//! SAP entries are indexed by the dotted tuple `(_, vpls, port, vlan)`;
//! the entity key is synthesized as `<vlan>-<decoded_port>-<vlan>`. The
//! port decoder is pluggable; the default understands the TiMOS packed
//! port id.

use super::{
    attr_i32, attr_str, parse_int, reconcile, AttrMap, HistoryTable, LiveRow, ReconcileCounts,
    Snapshot,
};
use crate::error::{Error, Result};
use crate::persist::Persister;
use crate::poll::PollResult;
use crate::sql::{alusapref, find_live_device, infinity};
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

/// Integer-typed SAP OIDs, coerced before comparison
const INT_OIDS: [&str; 2] = ["sapIngressQosPolicyId", "sapEgressQosPolicyId"];

/// Decodes a vendor port identifier into a human-readable port name
pub type PortDecoder = fn(&str) -> String;

/// Default decoder for the TiMOS packed port id (`slot/mda/port`).
///
/// Values that do not parse as a packed id are passed through unchanged.
pub fn decode_alu_port(port: &str) -> String {
    match port.parse::<u32>() {
        Ok(id) => {
            let slot = (id >> 25) & 0x0f;
            let mda = (id >> 21) & 0x0f;
            let port = (id >> 15) & 0x3f;
            format!("{slot}/{mda}/{port}")
        }
        Err(_) => port.to_string(),
    }
}

type Tables = BTreeMap<String, Vec<(String, String)>>;

/// Build the snapshot keyed by the synthesized SAP name
pub(crate) fn build_snapshot(tables: &Tables, decode_port: PortDecoder) -> Result<Snapshot> {
    let mut objs = Snapshot::new();

    for (oid, entries) in tables {
        for (key, val) in entries {
            let parts: Vec<&str> = key.split('.').collect();
            let [_, _vpls, port, vlan] = parts[..] else {
                return Err(Error::data(format!("malformed SAP index '{key}'")));
            };
            let name = format!("{vlan}-{}-{vlan}", decode_port(port));

            let value = if INT_OIDS.contains(&oid.as_str()) {
                json!(parse_int(val)?)
            } else {
                json!(val)
            };

            let obj = objs.entry(name.clone()).or_insert_with(|| {
                AttrMap::from([("name".to_string(), json!(name))])
            });
            obj.insert(oid.to_lowercase(), value);
        }
    }

    Ok(objs)
}

fn attr_map(model: &alusapref::Model) -> AttrMap {
    AttrMap::from([
        ("name".to_string(), json!(model.name)),
        ("sapdescription".to_string(), json!(model.sapdescription)),
        (
            "sapingressqospolicyid".to_string(),
            json!(model.sapingressqospolicyid),
        ),
        (
            "sapegressqospolicyid".to_string(),
            json!(model.sapegressqospolicyid),
        ),
        ("sapadminstatus".to_string(), json!(model.sapadminstatus)),
        ("sapoperstatus".to_string(), json!(model.sapoperstatus)),
    ])
}

struct AluSapTable<'a> {
    txn: &'a DatabaseTransaction,
}

#[async_trait]
impl HistoryTable for AluSapTable<'_> {
    fn key_attr(&self) -> &'static str {
        "name"
    }

    async fn live_rows(&mut self, device_id: i32) -> Result<Vec<LiveRow>> {
        let models = alusapref::Entity::find()
            .filter(alusapref::Column::Deviceid.eq(device_id))
            .filter(alusapref::Column::EndTime.gt(Utc::now()))
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
        alusapref::ActiveModel {
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
            .ok_or_else(|| Error::data("SAP snapshot entry has no name"))?;

        alusapref::ActiveModel {
            deviceid: Set(device_id),
            begin_time: Set(now),
            end_time: Set(infinity()),
            name: Set(name),
            sapdescription: Set(attr_str(attrs, "sapdescription")),
            sapingressqospolicyid: Set(attr_i32(attrs, "sapingressqospolicyid")),
            sapegressqospolicyid: Set(attr_i32(attrs, "sapegressqospolicyid")),
            sapadminstatus: Set(attr_str(attrs, "sapadminstatus")),
            sapoperstatus: Set(attr_str(attrs, "sapoperstatus")),
            ..Default::default()
        }
        .insert(self.txn)
        .await?;
        Ok(())
    }
}

/// Reconciles SAP snapshots against the `alusapref` history table
pub struct AluSapPersister {
    db: DatabaseConnection,
    decode_port: PortDecoder,
}

impl AluSapPersister {
    /// Build the persister with the default TiMOS port decoder
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            decode_port: decode_alu_port,
        }
    }

    /// Build the persister with a custom port decoder
    pub fn with_port_decoder(db: DatabaseConnection, decode_port: PortDecoder) -> Self {
        Self { db, decode_port }
    }

    /// Run one reconcile and report the emitted diff
    pub async fn reconcile_snapshot(&self, result: &PollResult) -> Result<ReconcileCounts> {
        let t0 = Instant::now();
        let tables = result
            .data
            .as_tables()
            .ok_or_else(|| Error::data("history persister requires table data"))?;
        let new_data = build_snapshot(tables, self.decode_port)?;
        let nvar = new_data.len();

        let txn = self.db.begin().await?;
        let device = find_live_device(&txn, &result.device_name).await?;
        let counts = {
            let mut table = AluSapTable { txn: &txn };
            reconcile(&mut table, device.id, new_data).await?
        };
        txn.commit().await?;

        debug!(
            nvar,
            counts = %counts,
            elapsed_ms = %t0.elapsed().as_millis(),
            result = %result,
            "processed SAP vars"
        );
        Ok(counts)
    }
}

#[async_trait]
impl Persister for AluSapPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        self.reconcile_snapshot(result).await.map(|_| ())
    }
}
