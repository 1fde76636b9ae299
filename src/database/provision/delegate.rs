//! Lifecycle callbacks of the open helper

use anyhow::Result;
use rusqlite::Connection;

use super::template::TemplateSource;
use crate::database::core::{ConnectionConfig, DatabaseQueue};

/// Callbacks invoked while a database is created, opened and migrated
///
/// `name` is always the normalized logical name (`:memory:` for the in-memory
/// database). Every method has a no-op default, so implementors only override
/// what they need.
///
/// Migration callbacks (`on_create`, `on_upgrade`, `on_downgrade`) run inside
/// the exclusive migration transaction and receive its connection; returning an
/// error rolls the transaction back and leaves the stored version untouched.
/// Exactly one of them runs per migration, and only when the stored version
/// differs from the requested one.
pub trait DatabaseOpenDelegate: Send + Sync {
    /// Called before a new database file is created
    ///
    /// Return a template to seed the database from, or `None` to start empty.
    fn will_create(&self, _name: &str) -> Option<TemplateSource> {
        None
    }

    /// Adjust connection settings before the connection is first used
    fn configure(&self, _name: &str, _config: &mut ConnectionConfig) {}

    /// Called when the stored version is 0
    fn on_create(&self, _name: &str, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Called when the stored version is lower than the requested one
    fn on_upgrade(
        &self,
        _name: &str,
        _conn: &Connection,
        _old_version: u32,
        _new_version: u32,
    ) -> Result<()> {
        Ok(())
    }

    /// Called when the stored version is higher than the requested one
    fn on_downgrade(
        &self,
        _name: &str,
        _conn: &Connection,
        _old_version: u32,
        _new_version: u32,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once the database is open and migrated
    fn on_open(&self, _name: &str, _db: &DatabaseQueue) {}

    /// Called when opening or migrating failed; never alongside `on_open`
    fn on_open_failed(&self, _name: &str, _error: &anyhow::Error) {}
}

/// Delegate used when the caller supplies none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl DatabaseOpenDelegate for NoopDelegate {}
