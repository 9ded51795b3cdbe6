//! Interface reference history
//!
//! Builds an interface snapshot from the polled tables and reconciles it
//! against the `ifref` history table. The plain builder handles standard
//! gear; the ALU variant normalizes the vendor's comma-packed `ifDescr`,
//! and the Infinera variant emulates an interface table for a platform
//! that has none.

use super::{
    attr_i32, attr_i64, attr_str, parse_int, reconcile, split_index, AttrMap, HistoryTable,
    LiveRow, ReconcileCounts, Snapshot,
};
use crate::error::{Error, Result};
use crate::persist::Persister;
use crate::poll::PollResult;
use crate::sql::{find_live_device, ifref, infinity};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeUtc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::debug;

/// Integer-typed interface OIDs, coerced before comparison
const INT_OIDS: [&str; 6] = [
    "ifSpeed",
    "ifHighSpeed",
    "ifMtu",
    "ifType",
    "ifOperStatus",
    "ifAdminStatus",
];

/// Vendor flavor of the interface snapshot builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfRefVariant {
    /// Standard interface tables
    Plain,
    /// ALU: `ifDescr` packs `name,?,alias`; normalize and synthesize
    /// `ifAlias`
    Alu,
    /// Infinera: no real interface table; emulate one from the GigE client
    /// CTP tables
    Infinera,
}

type Tables = BTreeMap<String, Vec<(String, String)>>;

/// `ifPhysAddress` arrives as opaque bytes; render colon-separated hex,
/// empty becomes null
fn phys_address_value(val: &str) -> serde_json::Value {
    if val.is_empty() {
        serde_json::Value::Null
    } else {
        json!(val
            .as_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"))
    }
}

/// On the ALU the third comma-separated field of `ifDescr` is what other
/// platforms put in `ifAlias`. Normalize `ifDescr` to the interface name
/// and hand back the alias (quotes stripped) for synthesis.
fn resolve_alu_ifdescr(ifdescr: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = ifdescr.split(',').collect();
    if parts.len() > 2 {
        (parts[0].to_string(), Some(parts[2].replace('"', "")))
    } else {
        (parts[0].to_string(), None)
    }
}

/// Rewrite the polled tables into interface-table shape for an Infinera.
///
/// `ifAlias` is called `gigeClientCtpPmRealCktId` there; only `ifDescr`
/// entries carrying a `GIGECLIENTCTP` payload are interfaces; speeds are
/// not available and are synthesized as zero; `ipAdEntIfIndex` makes no
/// sense on a non-layer-3 box and becomes empty.
fn infinera_rewrite(data: &mut Tables) -> Result<()> {
    let mut alias_by_index: HashMap<String, String> = HashMap::new();
    for (name, val) in data.remove("gigeClientCtpPmRealCktId").unwrap_or_default() {
        let (_, ifindex) = split_index(&name)?;
        alias_by_index.insert(ifindex.to_string(), val);
    }

    let mut keep = Vec::new();
    let mut aliases = Vec::new();
    let mut speeds = Vec::new();
    let mut high_speeds = Vec::new();

    for (name, val) in data.remove("ifDescr").unwrap_or_default() {
        if !val.starts_with("GIGECLIENTCTP") {
            continue;
        }
        let ifdescr = val
            .split_once('=')
            .map(|(_, rest)| rest.to_string())
            .ok_or_else(|| Error::data(format!("malformed Infinera ifDescr '{val}'")))?;
        let (_, ifindex) = split_index(&name)?;

        keep.push((name.clone(), ifdescr));
        aliases.push((
            format!("ifAlias.{ifindex}"),
            alias_by_index.get(ifindex).cloned().unwrap_or_default(),
        ));
        speeds.push((format!("ifSpeed.{ifindex}"), "0".to_string()));
        high_speeds.push((format!("ifHighSpeed.{ifindex}"), "0".to_string()));
    }

    data.insert("ifDescr".to_string(), keep);
    data.insert("ifAlias".to_string(), aliases);
    data.insert("ifSpeed".to_string(), speeds);
    data.insert("ifHighSpeed".to_string(), high_speeds);
    data.insert("ipAdEntIfIndex".to_string(), Vec::new());
    Ok(())
}

/// Build the snapshot keyed by interface description
pub(crate) fn build_snapshot(tables: &Tables, variant: IfRefVariant) -> Result<Snapshot> {
    let mut data = tables.clone();
    if variant == IfRefVariant::Infinera {
        infinera_rewrite(&mut data)?;
    }

    let mut objs = Snapshot::new();
    let mut ifindex_map: HashMap<i64, String> = HashMap::new();
    let mut synthesized_aliases = Vec::new();

    let descr_entries = data
        .remove("ifDescr")
        .ok_or_else(|| Error::data("snapshot has no ifDescr table"))?;
    for (name, val) in &descr_entries {
        let (_, index) = split_index(name)?;
        let ifindex = parse_int(index)?;

        let ifdescr = if variant == IfRefVariant::Alu {
            let (ifdescr, alias) = resolve_alu_ifdescr(val);
            if let Some(alias) = alias {
                synthesized_aliases.push((format!("ifAlias.{ifindex}"), alias));
            }
            ifdescr
        } else {
            val.clone()
        };

        ifindex_map.insert(ifindex, ifdescr.clone());
        objs.insert(
            ifdescr.clone(),
            AttrMap::from([
                ("ifdescr".to_string(), json!(ifdescr)),
                ("ifindex".to_string(), json!(ifindex)),
            ]),
        );
    }
    if !synthesized_aliases.is_empty() {
        data.entry("ifAlias".to_string())
            .or_default()
            .extend(synthesized_aliases);
    }

    // cross-reference the two address tables: ipAdEntIfIndex maps a dotted
    // IP to an ifIndex, ipAdEntAddr supplies the address text
    let ip_index_entries = data.remove("ipAdEntIfIndex").unwrap_or_default();
    let ip_addr_entries = data.remove("ipAdEntAddr").unwrap_or_default();
    for (name, val) in &ip_index_entries {
        let (_, dotted) = split_index(name)?;
        let mut ip_addr = dotted.to_string();
        for (addr_name, addr) in &ip_addr_entries {
            let (_, index) = split_index(addr_name)?;
            if index == dotted {
                ip_addr = addr.clone();
                break;
            }
        }

        let ifindex = parse_int(val)?;
        let ifdescr = ifindex_map
            .get(&ifindex)
            .ok_or_else(|| Error::data(format!("ipAdEntIfIndex references unknown ifIndex {ifindex}")))?;
        if let Some(obj) = objs.get_mut(ifdescr) {
            obj.insert("ipaddr".to_string(), json!(ip_addr));
        }
    }

    for (oid, entries) in &data {
        for (name, val) in entries {
            let value = if INT_OIDS.contains(&oid.as_str()) {
                json!(parse_int(val)?)
            } else if oid == "ifPhysAddress" {
                phys_address_value(val)
            } else {
                json!(val)
            };

            let (_, index) = split_index(name)?;
            let ifindex = parse_int(index)?;
            let ifdescr = ifindex_map
                .get(&ifindex)
                .ok_or_else(|| Error::data(format!("{oid} references unknown ifIndex {ifindex}")))?;
            if let Some(obj) = objs.get_mut(ifdescr) {
                obj.insert(oid.to_lowercase(), value);
            }
        }
    }

    Ok(objs)
}

fn attr_map(model: &ifref::Model) -> AttrMap {
    AttrMap::from([
        ("ifdescr".to_string(), json!(model.ifdescr)),
        ("ifindex".to_string(), json!(model.ifindex)),
        ("ifalias".to_string(), json!(model.ifalias)),
        ("ipaddr".to_string(), json!(model.ipaddr)),
        ("ifspeed".to_string(), json!(model.ifspeed)),
        ("ifhighspeed".to_string(), json!(model.ifhighspeed)),
        ("ifmtu".to_string(), json!(model.ifmtu)),
        ("iftype".to_string(), json!(model.iftype)),
        ("ifoperstatus".to_string(), json!(model.ifoperstatus)),
        ("ifadminstatus".to_string(), json!(model.ifadminstatus)),
        ("ifphysaddress".to_string(), json!(model.ifphysaddress)),
    ])
}

struct IfRefTable<'a> {
    txn: &'a DatabaseTransaction,
}

#[async_trait]
impl HistoryTable for IfRefTable<'_> {
    fn key_attr(&self) -> &'static str {
        "ifdescr"
    }

    async fn live_rows(&mut self, device_id: i32) -> Result<Vec<LiveRow>> {
        let models = ifref::Entity::find()
            .filter(ifref::Column::Deviceid.eq(device_id))
            .filter(ifref::Column::EndTime.gt(Utc::now()))
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
        ifref::ActiveModel {
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
        let ifdescr = attr_str(attrs, "ifdescr")
            .ok_or_else(|| Error::data("interface snapshot entry has no ifdescr"))?;
        let ifindex = attr_i32(attrs, "ifindex")
            .ok_or_else(|| Error::data("interface snapshot entry has no ifindex"))?;

        ifref::ActiveModel {
            deviceid: Set(device_id),
            begin_time: Set(now),
            end_time: Set(infinity()),
            ifdescr: Set(ifdescr),
            ifindex: Set(ifindex),
            ifalias: Set(attr_str(attrs, "ifalias")),
            ipaddr: Set(attr_str(attrs, "ipaddr")),
            ifspeed: Set(attr_i64(attrs, "ifspeed")),
            ifhighspeed: Set(attr_i64(attrs, "ifhighspeed")),
            ifmtu: Set(attr_i32(attrs, "ifmtu")),
            iftype: Set(attr_i32(attrs, "iftype")),
            ifoperstatus: Set(attr_i32(attrs, "ifoperstatus")),
            ifadminstatus: Set(attr_i32(attrs, "ifadminstatus")),
            ifphysaddress: Set(attr_str(attrs, "ifphysaddress")),
            ..Default::default()
        }
        .insert(self.txn)
        .await?;
        Ok(())
    }
}

/// Reconciles interface snapshots against the `ifref` history table
pub struct IfRefPersister {
    db: DatabaseConnection,
    variant: IfRefVariant,
}

impl IfRefPersister {
    /// Build the persister over a worker-owned database session
    pub fn new(db: DatabaseConnection, variant: IfRefVariant) -> Self {
        Self { db, variant }
    }

    /// Run one reconcile and report the emitted diff
    pub async fn reconcile_snapshot(&self, result: &PollResult) -> Result<ReconcileCounts> {
        let t0 = Instant::now();
        let tables = result
            .data
            .as_tables()
            .ok_or_else(|| Error::data("history persister requires table data"))?;
        let new_data = build_snapshot(tables, self.variant)?;
        let nvar = new_data.len();

        let txn = self.db.begin().await?;
        let device = find_live_device(&txn, &result.device_name).await?;
        let counts = {
            let mut table = IfRefTable { txn: &txn };
            reconcile(&mut table, device.id, new_data).await?
        };
        txn.commit().await?;

        debug!(
            nvar,
            counts = %counts,
            elapsed_ms = %t0.elapsed().as_millis(),
            result = %result,
            "processed interface vars"
        );
        Ok(counts)
    }
}

#[async_trait]
impl Persister for IfRefPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        self.reconcile_snapshot(result).await.map(|_| ())
    }
}
