//! SeaORM Entity for the LSP operational status history table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lspopstatus")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub deviceid: i32,
    pub begin_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
    pub name: String,
    pub state: Option<i32>,
    pub srcaddr: Option<String>,
    pub dstaddr: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::Deviceid",
        to = "super::device::Column::Id"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
