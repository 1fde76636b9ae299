//! Logical database names and their on-disk paths
//!
//! A logical name is hashed with SHA-256 to build the file name, so callers can
//! use any string (including ones that are not valid file names) and two
//! distinct names never share a file.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::database::core::{DatabaseLocation, IN_MEMORY_DATABASE};
use crate::storage::StorageLayout;

/// Caller-facing database identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalName {
    InMemory,
    Named(String),
}

impl LogicalName {
    /// Normalize a caller-supplied name; absent, blank or `:memory:` means in-memory
    pub fn new(name: Option<&str>) -> Self {
        match name {
            Some(n) if !n.trim().is_empty() && n != IN_MEMORY_DATABASE => {
                LogicalName::Named(n.to_string())
            }
            _ => LogicalName::InMemory,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogicalName::InMemory => IN_MEMORY_DATABASE,
            LogicalName::Named(n) => n,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, LogicalName::InMemory)
    }
}

impl From<&str> for LogicalName {
    fn from(name: &str) -> Self {
        LogicalName::new(Some(name))
    }
}

impl From<Option<&str>> for LogicalName {
    fn from(name: Option<&str>) -> Self {
        LogicalName::new(name)
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case hex SHA-256 of the name
pub fn name_digest(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

/// `<digest>.<extension>`
pub fn database_file_name(name: &str, extension: &str) -> String {
    format!("{}.{}", name_digest(name), extension)
}

/// Resolve a logical name under `base_dir`; `None` for the in-memory database
pub fn resolve_path(name: &LogicalName, base_dir: &Path, extension: &str) -> Option<PathBuf> {
    match name {
        LogicalName::InMemory => None,
        LogicalName::Named(n) => Some(base_dir.join(database_file_name(n, extension))),
    }
}

impl StorageLayout {
    /// Where the database for `name` lives
    pub fn database_location(&self, name: &LogicalName) -> DatabaseLocation {
        match resolve_path(name, self.databases_dir(), self.extension()) {
            Some(path) => DatabaseLocation::File(path),
            None => DatabaseLocation::InMemory,
        }
    }

    /// Temporary path used while unpacking the template for `name`
    pub fn template_path(&self, name: &LogicalName) -> Option<PathBuf> {
        resolve_path(name, self.temporary_dir(), self.extension())
    }
}
