//! Filesystem primitives used while provisioning databases
//!
//! Everything here is synchronous and is never called from inside a database
//! transaction.

use anyhow::{anyhow, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the directory holding the database files
pub const DATABASES_DIR_NAME: &str = "Databases";

/// Default file extension of the database files
pub const DEFAULT_EXTENSION: &str = "sqlite";

/// Directories used for database files and temporary template copies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    databases_dir: PathBuf,
    temporary_dir: PathBuf,
    extension: String,
}

impl StorageLayout {
    /// Build a layout, rejecting values no database file could be placed under
    pub fn new(
        databases_dir: impl Into<PathBuf>,
        temporary_dir: impl Into<PathBuf>,
        extension: &str,
    ) -> Result<Self> {
        let databases_dir = databases_dir.into();
        let temporary_dir = temporary_dir.into();
        let extension = extension.trim().trim_start_matches('.').to_string();

        if databases_dir.as_os_str().is_empty() {
            return Err(anyhow!("Databases directory path is empty"));
        }
        if temporary_dir.as_os_str().is_empty() {
            return Err(anyhow!("Temporary directory path is empty"));
        }
        if extension.is_empty() || extension.contains(['/', '\\']) {
            return Err(anyhow!("Invalid database file extension '{}'", extension));
        }

        Ok(Self {
            databases_dir,
            temporary_dir,
            extension,
        })
    }

    /// Layout rooted at `data_dir`: `<data_dir>/Databases` for database files and
    /// `<data_dir>/tmp` for templates
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        Self::new(
            data_dir.join(DATABASES_DIR_NAME),
            data_dir.join("tmp"),
            DEFAULT_EXTENSION,
        )
    }

    pub fn databases_dir(&self) -> &Path {
        &self.databases_dir
    }

    pub fn temporary_dir(&self) -> &Path {
        &self.temporary_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Create both directories if absent and exclude the databases directory from backup
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.databases_dir).map_err(|e| {
            anyhow!(
                "Failed to create databases directory '{}': {}",
                self.databases_dir.display(),
                e
            )
        })?;
        fs::create_dir_all(&self.temporary_dir).map_err(|e| {
            anyhow!(
                "Failed to create temporary directory '{}': {}",
                self.temporary_dir.display(),
                e
            )
        })?;
        exclude_from_backup(&self.databases_dir);
        Ok(())
    }
}

/// Remove a file, treating a missing file as success
pub fn remove_file_if_exists(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed '{}'", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove '{}': {}", path.display(), e);
            false
        }
    }
}

/// Copy `from` to `to`, creating the parent directory of `to` when needed
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create directory '{}': {}", parent.display(), e))?;
    }
    fs::copy(from, to).map_err(|e| {
        anyhow!(
            "Failed to copy '{}' to '{}': {}",
            from.display(),
            to.display(),
            e
        )
    })
}

/// Mark a path as excluded from device backups
///
/// Only Apple targets have a backup exclusion attribute; everywhere else this
/// only logs. Failures are logged and otherwise ignored.
pub fn exclude_from_backup(path: &Path) {
    #[cfg(target_vendor = "apple")]
    {
        if let Err(e) = apple::set_exclusion_attribute(path) {
            warn!("Failed to exclude '{}' from backup: {}", path.display(), e);
            return;
        }
    }
    debug!("excluded '{}' from backup", path.display());
}

#[cfg(target_vendor = "apple")]
mod apple {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    const ATTRIBUTE_NAME: &[u8] = b"com.apple.MobileBackup\0";

    pub(super) fn set_exclusion_attribute(path: &Path) -> io::Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let value: u8 = 1;

        // SAFETY: both strings are NUL-terminated and `value` outlives the call.
        let rc = unsafe {
            libc::setxattr(
                c_path.as_ptr(),
                ATTRIBUTE_NAME.as_ptr().cast(),
                (&value as *const u8).cast(),
                1,
                0,
                0,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
