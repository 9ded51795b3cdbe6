//! Configuration management for espersist Core
//!
//! TOML-based configuration with an embedded-database override selected by
//! the `ESXSNMP_TESTING` environment variable (test harness only).

// Re-export submodules
pub mod core;
pub mod defaults;
pub mod types;

// Re-export the main Config struct and commonly used items
pub use core::Config;
pub use types::QueueSpec;
