//! Relational store session setup and helpers
//!
//! History reconcilers share one `device` lookup and the interval-row
//! convention: a row is *live* while `end_time` lies in the future. The
//! "+infinity" sentinel is a typed far-future timestamp, so `end_time > now`
//! works as the live predicate on every backend.

pub mod entities;

pub use entities::{alusapref, device, ifref, lspopstatus};

use crate::error::{Error, Result};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, QueryFilter, Schema,
};
use tracing::debug;

/// Unix time of 9999-01-01T00:00:00Z. Years above 9999 serialize with an
/// explicit sign, which breaks textual timestamp ordering on sqlite.
const INFINITY_UNIX: i64 = 253_370_764_800;

/// The `end_time` written for live rows; a far-future timestamp standing in
/// for "+infinity"
pub fn infinity() -> sea_orm::prelude::DateTimeUtc {
    chrono::DateTime::from_timestamp(INFINITY_UNIX, 0)
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

/// Connect to the relational store.
///
/// Sqlite-backed stores (the embedded harness) get the schema created on
/// the fly; production stores are expected to be provisioned already.
///
/// # Errors
///
/// Returns a database error when the store is unreachable; callers treat
/// this as fatal at startup.
pub async fn setup_db(db_uri: &str) -> Result<DatabaseConnection> {
    let mut options = sea_orm::ConnectOptions::new(db_uri.to_string());
    if db_uri.starts_with("sqlite::memory:") {
        // every pooled connection to an in-memory sqlite sees its own
        // database; pin the pool to one connection
        options.max_connections(1);
    }

    let db = Database::connect(options)
        .await
        .map_err(|e| Error::database(format!("Failed to connect to '{db_uri}': {e}")))?;

    if db.get_database_backend() == DbBackend::Sqlite {
        init_schema(&db).await?;
    }

    Ok(db)
}

/// Create the history tables if they do not exist yet
pub async fn init_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(device::Entity),
        schema.create_table_from_entity(ifref::Entity),
        schema.create_table_from_entity(lspopstatus::Entity),
        schema.create_table_from_entity(alusapref::Entity),
    ];
    for stmt in &mut statements {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    debug!("history table schema initialized");
    Ok(())
}

/// Look up the live row for `name` in the device table.
///
/// Exactly one live row is expected; its absence is a data error and the
/// poll result being persisted is dropped.
pub async fn find_live_device(txn: &DatabaseTransaction, name: &str) -> Result<device::Model> {
    device::Entity::find()
        .filter(device::Column::Name.eq(name))
        .filter(device::Column::EndTime.gt(Utc::now()))
        .one(txn)
        .await?
        .ok_or_else(|| Error::data(format!("no live device row for '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ActiveModelTrait, ActiveValue::Set, TransactionTrait};

    async fn test_db() -> DatabaseConnection {
        setup_db("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let db = test_db().await;
        init_schema(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_live_device() {
        let db = test_db().await;
        let now = Utc::now();

        device::ActiveModel {
            name: Set("router1".to_string()),
            begin_time: Set(now),
            end_time: Set(infinity()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        // a retired device must not be picked up
        device::ActiveModel {
            name: Set("router2".to_string()),
            begin_time: Set(now - chrono::Duration::days(2)),
            end_time: Set(now - chrono::Duration::days(1)),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let txn = db.begin().await.unwrap();
        let found = find_live_device(&txn, "router1").await.unwrap();
        assert_eq!(found.name, "router1");

        let missing = find_live_device(&txn, "router2").await;
        assert!(matches!(missing, Err(Error::Data(_))));
        txn.commit().await.unwrap();
    }
}
