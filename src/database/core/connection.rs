//! Serialized database connection
//!
//! This module provides the connection wrapper handed out by the provisioning
//! engine. A `DatabaseQueue` owns exactly one SQLite connection and funnels
//! every read, write and transaction through a single lock.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::integrity::check_integrity;

/// Reserved name of the in-memory database
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Highest schema version `PRAGMA user_version` can hold (a signed 32-bit value)
pub const MAX_SCHEMA_VERSION: u32 = i32::MAX as u32;

/// Where a database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database, gone when the connection closes
    InMemory,
    /// Database file on disk
    File(PathBuf),
}

impl DatabaseLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DatabaseLocation::InMemory => None,
            DatabaseLocation::File(p) => Some(p),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, DatabaseLocation::InMemory)
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseLocation::InMemory => write!(f, "{}", IN_MEMORY_DATABASE),
            DatabaseLocation::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// SQLite journal modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// Settings applied to a connection before it is first used
///
/// The open delegate receives a mutable reference to this value exactly once
/// per open attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Open the database for reading only
    pub readonly: bool,

    /// Journal mode to switch to, `None` keeps the database's current mode
    pub journal_mode: Option<JournalMode>,

    /// Enforce foreign key constraints
    pub foreign_keys: bool,

    /// How long to wait on a locked database before failing
    pub busy_timeout: Duration,

    /// Raw cipher key, applied before any other statement
    ///
    /// The bytes are the key itself (`x'…'`), not a passphrase run through
    /// SQLCipher's key derivation.
    pub cipher_key: Option<Vec<u8>>,

    /// Additional `PRAGMA name = value` statements, applied in order
    pub pragmas: Vec<(String, String)>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            journal_mode: None,
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
            cipher_key: None,
            pragmas: Vec::new(),
        }
    }
}

// Keeps key material out of logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("readonly", &self.readonly)
            .field("journal_mode", &self.journal_mode)
            .field("foreign_keys", &self.foreign_keys)
            .field("busy_timeout", &self.busy_timeout)
            .field("cipher_key", &self.cipher_key.as_ref().map(|_| "<redacted>"))
            .field("pragmas", &self.pragmas)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(readonly: bool) -> Self {
        Self {
            readonly,
            ..Default::default()
        }
    }

    fn open_flags(&self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.readonly {
            base | OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
    }

    /// Apply the configuration to a freshly opened connection
    fn apply(&self, conn: &Connection) -> Result<()> {
        if let Some(key) = self.cipher_key.as_deref().filter(|k| !k.is_empty()) {
            conn.execute_batch(&format!("PRAGMA key = \"{}\";", raw_key_literal(key)))
                .map_err(|e| anyhow!("Failed to set cipher key: {}", e))?;
        }

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;

        let foreign_keys = if self.foreign_keys { "ON" } else { "OFF" };
        conn.execute_batch(&format!("PRAGMA foreign_keys = {};", foreign_keys))
            .map_err(|e| anyhow!("Failed to set foreign keys: {}", e))?;

        if let Some(mode) = self.journal_mode {
            if self.readonly {
                tracing::debug!(
                    "skipping journal_mode={} on a read-only connection",
                    mode.as_str()
                );
            } else {
                let _: String = conn
                    .query_row(&format!("PRAGMA journal_mode={}", mode.as_str()), [], |row| {
                        row.get(0)
                    })
                    .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;
            }
        }

        for (name, value) in &self.pragmas {
            conn.execute_batch(&format!("PRAGMA {} = {};", name, value))
                .map_err(|e| anyhow!("Failed to apply PRAGMA {}: {}", name, e))?;
        }

        Ok(())
    }
}

/// Format raw key bytes as a SQLCipher blob literal, `x'…'`
pub(crate) fn raw_key_literal(key: &[u8]) -> String {
    format!("x'{}'", hex::encode(key))
}

/// Outcome requested by a transaction body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Commit,
    Rollback,
}

/// A single connection guarded by a lock
///
/// Reads, writes and transactions are executed one at a time. The connection is
/// closed when the queue is dropped.
pub struct DatabaseQueue {
    conn: Mutex<Connection>,
    location: DatabaseLocation,
    readonly: bool,
}

impl fmt::Debug for DatabaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseQueue")
            .field("location", &self.location)
            .field("readonly", &self.readonly)
            .finish()
    }
}

impl DatabaseQueue {
    /// Open a connection at `location` and apply `config` before anything else runs
    pub fn open(location: DatabaseLocation, config: &ConnectionConfig) -> Result<Self> {
        let flags = config.open_flags();
        let conn = match &location {
            DatabaseLocation::File(p) => Connection::open_with_flags(p, flags)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p.display(), e))?,
            DatabaseLocation::InMemory => Connection::open_in_memory_with_flags(flags)
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        config.apply(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location,
            readonly: config.readonly,
        })
    }

    /// Open an in-memory database with default settings
    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatabaseLocation::InMemory, &ConnectionConfig::default())
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn is_in_memory(&self) -> bool {
        self.location.is_in_memory()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Run `f` against the connection
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` against the connection; refused on read-only handles
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.readonly {
            return Err(anyhow!(
                "Can't write to read-only database at '{}'",
                self.location
            ));
        }
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction
    ///
    /// The transaction commits when `f` returns `Ok(Transition::Commit)` and rolls
    /// back otherwise. An error from `f` is returned unchanged after the rollback.
    pub fn in_transaction<F>(&self, behavior: TransactionBehavior, f: F) -> Result<Transition>
    where
        F: FnOnce(&Transaction<'_>) -> Result<Transition>,
    {
        let mut conn = self.conn.lock();
        run_transaction(&mut conn, behavior, f)
    }

    /// Stored schema version (`PRAGMA user_version`)
    pub fn user_version(&self) -> Result<u32> {
        self.read(|conn| read_user_version(conn))
    }

    /// Overwrite the stored schema version
    pub fn set_user_version(&self, version: u32) -> Result<()> {
        self.write(|conn| write_user_version(conn, version))
    }

    /// Stored schema version, or `-1` if it can't be read
    pub fn stored_version(&self) -> i64 {
        self.user_version().map(i64::from).unwrap_or(-1)
    }

    /// Quick structural check of the database
    pub fn check_integrity(&self) -> bool {
        let conn = self.conn.lock();
        check_integrity(&conn)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        self.read(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table_name],
                    |row| row.get(0),
                )
                .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
            Ok(count > 0)
        })
    }

    /// Lock the connection for the duration of the engine's migration
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

pub(crate) fn run_transaction<F>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    f: F,
) -> Result<Transition>
where
    F: FnOnce(&Transaction<'_>) -> Result<Transition>,
{
    let tx = conn
        .transaction_with_behavior(behavior)
        .map_err(|e| anyhow!("Failed to begin transaction: {}", e))?;

    match f(&tx) {
        Ok(Transition::Commit) => {
            tx.commit()
                .map_err(|e| anyhow!("Failed to commit transaction: {}", e))?;
            Ok(Transition::Commit)
        }
        Ok(Transition::Rollback) => {
            tx.rollback()
                .map_err(|e| anyhow!("Failed to roll back transaction: {}", e))?;
            Ok(Transition::Rollback)
        }
        Err(err) => {
            if let Err(e) = tx.rollback() {
                tracing::warn!("Failed to roll back transaction: {}", e);
            }
            Err(err)
        }
    }
}

/// Reject versions SQLite would silently truncate when storing them
pub(crate) fn check_schema_version(version: u32) -> Result<()> {
    if version > MAX_SCHEMA_VERSION {
        return Err(anyhow!(
            "Schema version {} exceeds the maximum of {}",
            version,
            MAX_SCHEMA_VERSION
        ));
    }
    Ok(())
}

pub(crate) fn read_user_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| anyhow!("Failed to read user version: {}", e))?;
    Ok(u32::try_from(version.max(0)).unwrap_or(u32::MAX))
}

pub(crate) fn write_user_version(conn: &Connection, version: u32) -> Result<()> {
    check_schema_version(version)?;
    conn.execute_batch(&format!("PRAGMA user_version = {};", version))
        .map_err(|e| anyhow!("Failed to set user version: {}", e))
}
