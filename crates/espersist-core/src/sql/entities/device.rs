//! SeaORM Entity for the device table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub begin_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ifref::Entity")]
    IfRef,
    #[sea_orm(has_many = "super::lspopstatus::Entity")]
    LspOpStatus,
    #[sea_orm(has_many = "super::alusapref::Entity")]
    AluSapRef,
}

impl Related<super::ifref::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IfRef.def()
    }
}

impl Related<super::lspopstatus::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LspOpStatus.def()
    }
}

impl Related<super::alusapref::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AluSapRef.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
