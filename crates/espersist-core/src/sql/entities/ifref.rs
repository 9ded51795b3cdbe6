//! SeaORM Entity for the interface reference history table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ifref")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub deviceid: i32,
    pub begin_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
    pub ifdescr: String,
    pub ifindex: i32,
    pub ifalias: Option<String>,
    pub ipaddr: Option<String>,
    pub ifspeed: Option<i64>,
    pub ifhighspeed: Option<i64>,
    pub ifmtu: Option<i32>,
    pub iftype: Option<i32>,
    pub ifoperstatus: Option<i32>,
    pub ifadminstatus: Option<i32>,
    pub ifphysaddress: Option<String>,
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
