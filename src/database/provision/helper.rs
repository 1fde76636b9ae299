//! Database creation and version management
//!
//! `DatabaseHelper` decides, for a logical name, whether to open an existing
//! database, create (and optionally seed) a new one, or give up. Once a
//! connection is established it compares the stored `user_version` with the
//! requested version and runs the matching delegate callback inside a single
//! exclusive transaction together with the version update.
//!
//! ```text
//! open_or_create
//!   ├── open ──────────────── file missing ──┐
//!   │     ├── configure + connect            │
//!   │     ├── read user_version              │
//!   │     ├── migrate (BEGIN EXCLUSIVE)      │
//!   │     └── on_open / on_open_failed       │
//!   └── create ◄─────────────────────────────┘
//!         ├── remove stale file
//!         ├── seed from template (optional, best effort)
//!         ├── open (file may be created)
//!         └── remove file on failure
//! ```

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::delegate::{DatabaseOpenDelegate, NoopDelegate};
use super::naming::LogicalName;
use super::template::{FileCopyUnpacker, TemplateFormat, TemplateSource, TemplateUnpacker};
use crate::config::ProvisionConfig;
use crate::database::core::{
    check_integrity, check_schema_version, raw_key_literal, read_user_version, run_transaction,
    write_user_version, ConnectionConfig, DatabaseLocation, DatabaseQueue, Transition,
};
use crate::storage::{copy_file, exclude_from_backup, remove_file_if_exists, StorageLayout};

/// Alias under which an encrypted seed is attached during export
const ENCRYPTED_ALIAS: &str = "encrypted";

/// Which migration callback a version change maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Stored version is 0, the database has never been initialized
    Create,
    Upgrade { from: u32, to: u32 },
    Downgrade { from: u32, to: u32 },
}

impl Migration {
    /// Migration needed to go from `stored` to `target`, `None` if they match
    pub fn between(stored: u32, target: u32) -> Option<Self> {
        if stored == target {
            None
        } else if stored < 1 {
            Some(Migration::Create)
        } else if stored > target {
            Some(Migration::Downgrade {
                from: stored,
                to: target,
            })
        } else {
            Some(Migration::Upgrade {
                from: stored,
                to: target,
            })
        }
    }
}

/// Creates, opens and migrates databases under a storage layout
pub struct DatabaseHelper {
    layout: StorageLayout,
    unpacker: Box<dyn TemplateUnpacker>,
}

impl DatabaseHelper {
    /// Helper whose templates are plain database files
    pub fn new(layout: StorageLayout) -> Self {
        Self::with_unpacker(layout, Box::new(FileCopyUnpacker))
    }

    /// Helper whose templates are packaged as `format`
    pub fn with_format(layout: StorageLayout, format: TemplateFormat) -> Self {
        Self::with_unpacker(layout, format.unpacker())
    }

    pub fn with_unpacker(layout: StorageLayout, unpacker: Box<dyn TemplateUnpacker>) -> Self {
        Self { layout, unpacker }
    }

    /// Build a helper from configuration, creating the storage directories
    pub fn from_config(config: &ProvisionConfig) -> Result<Self> {
        let layout = config.storage_layout()?;
        layout.ensure()?;
        Ok(Self::with_format(layout, config.template_format))
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Path of the database file for `name`, `None` for the in-memory database
    pub fn database_path(&self, name: impl Into<LogicalName>) -> Option<PathBuf> {
        self.layout
            .database_location(&name.into())
            .path()
            .map(Path::to_path_buf)
    }

    /// Open the database, creating it when it can't be opened
    ///
    /// Returns `None` when neither open nor create succeeded; the delegate has
    /// been told why through `on_open_failed`.
    pub fn open_or_create(
        &self,
        name: impl Into<LogicalName>,
        version: u32,
        readonly: bool,
        delegate: Option<&dyn DatabaseOpenDelegate>,
    ) -> Option<DatabaseQueue> {
        let name = name.into();
        let delegate = delegate.unwrap_or(&NoopDelegate);

        if let Some(db) = self.open_database(&name, Some(version), readonly, delegate, false) {
            return Some(db);
        }
        self.create_database(&name, version, readonly, delegate)
    }

    /// Open an existing database
    ///
    /// A missing file yields `None` without notifying the delegate. With
    /// `version` set to `None` no migration is attempted.
    pub fn open(
        &self,
        name: impl Into<LogicalName>,
        version: Option<u32>,
        readonly: bool,
        delegate: Option<&dyn DatabaseOpenDelegate>,
    ) -> Option<DatabaseQueue> {
        let name = name.into();
        let delegate = delegate.unwrap_or(&NoopDelegate);
        self.open_database(&name, version, readonly, delegate, false)
    }

    /// Create a new database, replacing any file already at its path
    pub fn create(
        &self,
        name: impl Into<LogicalName>,
        version: u32,
        readonly: bool,
        delegate: Option<&dyn DatabaseOpenDelegate>,
    ) -> Option<DatabaseQueue> {
        let name = name.into();
        let delegate = delegate.unwrap_or(&NoopDelegate);
        self.create_database(&name, version, readonly, delegate)
    }

    /// Delete the database file for `name`
    ///
    /// Returns `false` for the in-memory database, which has no file.
    pub fn remove_database(&self, name: impl Into<LogicalName>) -> Result<bool> {
        let name = name.into();
        match self.layout.database_location(&name) {
            DatabaseLocation::InMemory => Ok(false),
            DatabaseLocation::File(path) => {
                if remove_file_if_exists(&path) {
                    info!("removed database '{}'", name);
                    Ok(true)
                } else {
                    Err(anyhow!(
                        "Failed to remove database '{}' at '{}'",
                        name,
                        path.display()
                    ))
                }
            }
        }
    }

    fn open_database(
        &self,
        name: &LogicalName,
        version: Option<u32>,
        readonly: bool,
        delegate: &dyn DatabaseOpenDelegate,
        allow_create: bool,
    ) -> Option<DatabaseQueue> {
        let location = self.layout.database_location(name);

        if let DatabaseLocation::File(path) = &location {
            if !allow_create && !path.exists() {
                debug!("database '{}' does not exist at '{}'", name, path.display());
                return None;
            }
        }

        debug!("opening database '{}' at '{}'", name, location);
        match Self::establish(name, location, version, readonly, delegate) {
            Ok(db) => {
                delegate.on_open(name.as_str(), &db);
                Some(db)
            }
            Err(e) => {
                warn!("Could not open database '{}': {:#}", name, e);
                delegate.on_open_failed(name.as_str(), &e);
                None
            }
        }
    }

    fn establish(
        name: &LogicalName,
        location: DatabaseLocation,
        version: Option<u32>,
        readonly: bool,
        delegate: &dyn DatabaseOpenDelegate,
    ) -> Result<DatabaseQueue> {
        let mut config = ConnectionConfig::new(readonly);
        delegate.configure(name.as_str(), &mut config);

        let db = DatabaseQueue::open(location, &config)?;

        if let Some(version) = version {
            Self::migrate(name, &db, version, delegate)?;
        } else {
            // validation-only open: still make sure the header is readable
            db.user_version()?;
        }

        Ok(db)
    }

    /// Bring the stored version to `new_version` in one exclusive transaction
    fn migrate(
        name: &LogicalName,
        db: &DatabaseQueue,
        new_version: u32,
        delegate: &dyn DatabaseOpenDelegate,
    ) -> Result<()> {
        check_schema_version(new_version)?;

        let mut conn = db.lock();
        let old_version = read_user_version(&conn)?;

        let Some(migration) = Migration::between(old_version, new_version) else {
            debug!("database '{}' is at version {}", name, old_version);
            return Ok(());
        };

        if db.is_readonly() {
            return Err(anyhow!(
                "Can't migrate read-only database from version {} to {}.",
                old_version,
                new_version
            ));
        }

        info!(
            "migrating database '{}' from version {} to {} ({:?})",
            name, old_version, new_version, migration
        );

        let outcome = run_transaction(&mut conn, TransactionBehavior::Exclusive, |tx| {
            match migration {
                Migration::Create => delegate.on_create(name.as_str(), tx)?,
                Migration::Upgrade { from, to } => delegate.on_upgrade(name.as_str(), tx, from, to)?,
                Migration::Downgrade { from, to } => {
                    delegate.on_downgrade(name.as_str(), tx, from, to)?
                }
            }
            write_user_version(tx, new_version)?;
            Ok(Transition::Commit)
        });

        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    "Migration of '{}' rolled back, version stays {}",
                    name, old_version
                );
                Err(e)
            }
        }
    }

    fn create_database(
        &self,
        name: &LogicalName,
        version: u32,
        readonly: bool,
        delegate: &dyn DatabaseOpenDelegate,
    ) -> Option<DatabaseQueue> {
        let path = match self.layout.database_location(name) {
            DatabaseLocation::InMemory => {
                return self.open_database(name, Some(version), readonly, delegate, true);
            }
            DatabaseLocation::File(path) => path,
        };

        info!("creating database '{}' at '{}'", name, path.display());

        if let Err(e) = self.layout.ensure() {
            error!("Could not prepare storage for '{}': {:#}", name, e);
            return None;
        }

        // clean slate
        remove_file_if_exists(&path);

        match delegate.will_create(name.as_str()) {
            Some(source) if source.path.exists() => self.seed_from_template(name, &path, &source),
            Some(source) => warn!(
                "Template '{}' for '{}' does not exist",
                source.path.display(),
                name
            ),
            None => debug!("no template for '{}'", name),
        }

        let db = self.open_database(name, Some(version), readonly, delegate, true);
        if db.is_none() {
            // remove the corrupted or partial file
            remove_file_if_exists(&path);
        }
        db
    }

    /// Unpack the template and materialize it at `destination`
    ///
    /// Best effort: on any failure the database is simply created empty.
    fn seed_from_template(&self, name: &LogicalName, destination: &Path, source: &TemplateSource) {
        let Some(tmp_path) = self.layout.template_path(name) else {
            return;
        };

        match self.unpacker.unpack(name.as_str(), &source.path, &tmp_path) {
            Some(unpacked) if unpacked.exists() => {
                match Self::materialize(&unpacked, destination, source.key()) {
                    Ok(true) => {
                        exclude_from_backup(destination);
                        info!("seeded database '{}' from template", name);
                    }
                    Ok(false) => {
                        warn!("Template for '{}' failed the integrity check", name);
                    }
                    Err(e) => {
                        warn!("Failed to seed '{}' from template: {:#}", name, e);
                        remove_file_if_exists(destination);
                    }
                }
            }
            _ => warn!("No usable template for '{}'", name),
        }

        remove_file_if_exists(&tmp_path);
    }

    /// Returns `Ok(false)` when the unpacked template fails the integrity check
    fn materialize(unpacked: &Path, destination: &Path, key: Option<&[u8]>) -> Result<bool> {
        let conn = Connection::open_with_flags(
            unpacked,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| anyhow!("Failed to open template '{}': {}", unpacked.display(), e))?;

        if !check_integrity(&conn) {
            return Ok(false);
        }

        match key {
            Some(key) => Self::export_encrypted(&conn, destination, key)?,
            None => {
                drop(conn);
                copy_file(unpacked, destination)?;
            }
        }
        Ok(true)
    }

    /// Export the open template into an encrypted database at `destination`
    fn export_encrypted(conn: &Connection, destination: &Path, key: &[u8]) -> Result<()> {
        let destination_str = destination
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert '{}' to string", destination.display()))?;

        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {} KEY ?2", ENCRYPTED_ALIAS),
            params![destination_str, raw_key_literal(key)],
        )
        .map_err(|e| anyhow!("Failed to attach encrypted database: {}", e))?;

        let exported = conn
            .query_row(
                &format!("SELECT sqlcipher_export('{}')", ENCRYPTED_ALIAS),
                [],
                |_| Ok(()),
            )
            .map_err(|e| anyhow!("Failed to export encrypted database: {}", e));

        let detached = conn
            .execute_batch(&format!("DETACH DATABASE {};", ENCRYPTED_ALIAS))
            .map_err(|e| anyhow!("Failed to detach encrypted database: {}", e));

        exported.and(detached)
    }
}
