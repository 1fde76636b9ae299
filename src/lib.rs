#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! sqlite-provision - embedded SQLite database provisioning
//!
//! Locates or creates SQLite database files by logical name, optionally seeds
//! new databases from a bundled template (plain file or zip entry, optionally
//! re-encrypted), and brings the stored schema version to the version the
//! application expects inside a single exclusive transaction.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `sqlcipher` | Encrypted template export and keyed connections | `rusqlite/bundled-sqlcipher` |
//! | `cli` | Command-line binary | `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`database`]**: connections and the provisioning state machine
//!   - `core`: `DatabaseQueue`, `ConnectionConfig`, integrity checks
//!   - `provision`: naming, templates, delegate callbacks, `DatabaseHelper`, `DatabaseValidator`
//! - **[`storage`]**: directory layout and filesystem primitives
//! - **[`config`]**: configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sqlite_provision::{DatabaseHelper, DatabaseOpenDelegate, ProvisionConfig};
//!
//! struct Schema;
//!
//! impl DatabaseOpenDelegate for Schema {
//!     fn on_create(&self, _name: &str, conn: &rusqlite::Connection) -> anyhow::Result<()> {
//!         conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")?;
//!         Ok(())
//!     }
//!
//!     fn on_upgrade(
//!         &self,
//!         _name: &str,
//!         conn: &rusqlite::Connection,
//!         old_version: u32,
//!         _new_version: u32,
//!     ) -> anyhow::Result<()> {
//!         if old_version < 2 {
//!             conn.execute_batch("ALTER TABLE notes ADD COLUMN created_at INTEGER")?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let config = ProvisionConfig::new(&None)?;
//! let helper = DatabaseHelper::from_config(&config)?;
//!
//! match helper.open_or_create("notes", 2, false, Some(&Schema)) {
//!     Some(db) => println!("notes at version {}", db.user_version()?),
//!     None => eprintln!("notes database is unavailable"),
//! }
//! ```

pub mod config;
pub mod database;
pub mod storage;

// =============================================================================
// Configuration
// =============================================================================

pub use config::ProvisionConfig;

// =============================================================================
// Storage
// =============================================================================

pub use storage::{StorageLayout, DATABASES_DIR_NAME, DEFAULT_EXTENSION};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

// Core database types
pub use database::{
    check_integrity, ConnectionConfig, DatabaseLocation, DatabaseQueue, JournalMode, Transition,
    IN_MEMORY_DATABASE, MAX_SCHEMA_VERSION,
};

// Provisioning
pub use database::{
    DatabaseHelper, DatabaseOpenDelegate, DatabaseValidator, LogicalName, Migration,
    NoopDelegate, TemplateFormat, TemplateSource, TemplateUnpacker,
};
