//! Seed templates for new databases
//!
//! A template is either a plain SQLite file or a zip archive holding an entry
//! named after the logical database. Unpacking copies or extracts it to a
//! temporary path; the engine validates and materializes that copy, then
//! removes it.

use anyhow::{anyhow, Result};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::storage::{copy_file, remove_file_if_exists};

/// Seed data returned by the open delegate before a database is created
#[derive(Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Plain database file, or zip archive
    pub path: PathBuf,
    /// Raw key; when present and non-empty the seed is exported encrypted
    ///
    /// Used as the key bytes themselves (`x'…'`), not as a passphrase.
    pub encryption_key: Option<Vec<u8>>,
}

impl TemplateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryption_key: None,
        }
    }

    pub fn with_encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Key to export with, ignoring empty keys
    pub fn key(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref().filter(|k| !k.is_empty())
    }
}

impl fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSource")
            .field("path", &self.path)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Turns a template source into a usable temporary database file
pub trait TemplateUnpacker: Send + Sync {
    /// Copy or extract the template for `name` from `source` to `destination`
    ///
    /// Any file already at `destination` is removed first. Returns the unpacked
    /// path, or `None` when nothing usable could be produced; failures are logged,
    /// never raised.
    fn unpack(&self, name: &str, source: &Path, destination: &Path) -> Option<PathBuf>;
}

/// Template is a plain database file, copied byte for byte
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCopyUnpacker;

impl TemplateUnpacker for FileCopyUnpacker {
    fn unpack(&self, name: &str, source: &Path, destination: &Path) -> Option<PathBuf> {
        remove_file_if_exists(destination);

        match copy_file(source, destination) {
            Ok(bytes) => {
                debug!("copied {} byte template for '{}'", bytes, name);
                Some(destination.to_path_buf())
            }
            Err(e) => {
                warn!("Failed to copy template for '{}': {}", name, e);
                None
            }
        }
    }
}

/// Template is a zip archive with an entry named after the database
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipEntryUnpacker;

impl ZipEntryUnpacker {
    fn extract(name: &str, source: &Path, destination: &Path) -> Result<u64> {
        let file = File::open(source)
            .map_err(|e| anyhow!("Failed to open archive '{}': {}", source.display(), e))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| anyhow!("Failed to read archive '{}': {}", source.display(), e))?;
        let mut entry = archive
            .by_name(name)
            .map_err(|e| anyhow!("No entry '{}' in archive '{}': {}", name, source.display(), e))?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create directory '{}': {}", parent.display(), e))?;
        }
        let mut out = File::create(destination)
            .map_err(|e| anyhow!("Failed to create '{}': {}", destination.display(), e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| anyhow!("Failed to extract '{}': {}", name, e))
    }
}

impl TemplateUnpacker for ZipEntryUnpacker {
    fn unpack(&self, name: &str, source: &Path, destination: &Path) -> Option<PathBuf> {
        remove_file_if_exists(destination);

        match Self::extract(name, source, destination) {
            Ok(bytes) => {
                debug!("extracted {} byte template for '{}'", bytes, name);
                Some(destination.to_path_buf())
            }
            Err(e) => {
                warn!(
                    "Failed to extract '{}' from archive '{}': {}",
                    name,
                    source.display(),
                    e
                );
                // drop a partially written file
                remove_file_if_exists(destination);
                None
            }
        }
    }
}

/// Packaging of bundled templates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    #[default]
    Plain,
    Zip,
}

impl TemplateFormat {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateFormat::Plain => "plain",
            TemplateFormat::Zip => "zip",
        }
    }

    /// Unpacking strategy for this format
    pub fn unpacker(&self) -> Box<dyn TemplateUnpacker> {
        match self {
            TemplateFormat::Plain => Box::new(FileCopyUnpacker),
            TemplateFormat::Zip => Box::new(ZipEntryUnpacker),
        }
    }
}

impl FromStr for TemplateFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "file" | "sqlite" => Ok(TemplateFormat::Plain),
            "zip" => Ok(TemplateFormat::Zip),
            other => Err(anyhow!("Unknown template format '{}'", other)),
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
