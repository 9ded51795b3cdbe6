//! espersist Core Library
//!
//! This library provides the core functionality for the espersist SNMP
//! telemetry persistence tier: the poll-result data model, the counter-based
//! persistence queues, the routing and sharding layer, the persister family
//! (time-series, history reconcilers, streaming log) and the worker loop.
//!
//! # Architecture
//!
//! - [`poll`] - Poll result data model
//! - [`queue`] - Persistence queues, sharding, routing and inspection
//! - [`persist`] - Persister strategies and the registry
//! - [`tsdb`] - Time-series store port and backends
//! - [`sql`] - Relational entities and session setup
//! - [`worker`] - The queue-draining worker loop
//! - [`config`] - Configuration management
//! - [`error`] - Unified error types and handling

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod oidset;
pub mod persist;
pub mod poll;
pub mod queue;
pub mod sql;
pub mod tsdb;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use poll::{PollData, PollResult};
