//! Core database infrastructure
//!
//! This module provides the foundational database components used by the provisioning engine:
//! - `DatabaseQueue`: serialized SQLite connection handed out to callers
//! - `ConnectionConfig`: per-connection settings applied before first use
//! - `check_integrity`: quick structural check of a connection

mod connection;
mod integrity;

pub use connection::{
    ConnectionConfig, DatabaseLocation, DatabaseQueue, JournalMode, Transition, IN_MEMORY_DATABASE,
    MAX_SCHEMA_VERSION,
};
pub use integrity::check_integrity;

pub(crate) use connection::{
    check_schema_version, raw_key_literal, read_user_version, run_transaction, write_user_version,
};
