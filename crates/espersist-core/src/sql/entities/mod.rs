//! SeaORM entities for the relational history tables
//!
//! Every history table carries the interval columns `begin_time` and
//! `end_time`; a row whose `end_time` lies in the future is the *live* row
//! for its entity key.

pub mod alusapref;
pub mod device;
pub mod ifref;
pub mod lspopstatus;
