//! Database module
//!
//! This module provides all database functionality, organized into:
//!
//! - **core**: connection infrastructure (serialized connection, configuration, integrity)
//! - **provision**: the open/create/seed/migrate state machine and its collaborators
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # DatabaseQueue, ConnectionConfig
//! │   └── integrity   # PRAGMA quick_check
//! │
//! └── provision/      # Provisioning
//!     ├── naming      # logical name -> digest file path
//!     ├── template    # plain / zip seed templates
//!     ├── delegate    # lifecycle callbacks
//!     ├── helper      # DatabaseHelper state machine
//!     └── validator   # read-only validation
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlite_provision::database::{DatabaseHelper, DatabaseOpenDelegate};
//! use sqlite_provision::StorageLayout;
//!
//! struct Contacts;
//!
//! impl DatabaseOpenDelegate for Contacts {
//!     fn on_create(&self, _name: &str, conn: &rusqlite::Connection) -> anyhow::Result<()> {
//!         conn.execute_batch("CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT)")?;
//!         Ok(())
//!     }
//! }
//!
//! let helper = DatabaseHelper::new(StorageLayout::in_dir("/var/lib/app")?);
//! let db = helper
//!     .open_or_create("contacts", 1, false, Some(&Contacts))
//!     .ok_or_else(|| anyhow::anyhow!("contacts database unavailable"))?;
//! ```

pub mod core;
pub mod provision;

pub use core::{
    check_integrity, ConnectionConfig, DatabaseLocation, DatabaseQueue, JournalMode, Transition,
    IN_MEMORY_DATABASE, MAX_SCHEMA_VERSION,
};
pub use provision::{
    database_file_name, name_digest, resolve_path, DatabaseHelper, DatabaseOpenDelegate,
    DatabaseValidator, FileCopyUnpacker, LogicalName, Migration, NoopDelegate, TemplateFormat,
    TemplateSource, TemplateUnpacker, ZipEntryUnpacker,
};
