use anyhow::{anyhow, Result};
use clap::Args;
use rusqlite::Connection;
use serde::Serialize;
use sqlite_provision::{
    ConnectionConfig, DatabaseHelper, DatabaseOpenDelegate, DatabaseQueue, JournalMode,
    LogicalName, TemplateFormat, TemplateSource,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Arguments for the Open command
#[derive(Args)]
pub struct OpenArgs {
    /// Logical database name; omit or pass ":memory:" for an in-memory database
    #[clap(name = "NAME")]
    pub name: Option<String>,

    /// Schema version the database should be at
    #[clap(short, long)]
    pub version: u32,

    /// Open the database for reading only
    #[clap(long)]
    pub readonly: bool,

    /// Template to seed a newly created database from
    #[clap(short, long)]
    pub template: Option<PathBuf>,

    /// Treat the template as a zip archive with an entry named after the database
    #[clap(long)]
    pub zip: bool,

    /// Hex-encoded key; the seed is exported encrypted and reopened with it
    #[clap(short, long)]
    pub key: Option<String>,

    /// Switch the connection to write-ahead logging
    #[clap(long)]
    pub wal: bool,
}

#[derive(Debug, Serialize)]
struct OpenReport {
    name: String,
    location: Option<String>,
    opened: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    events: Vec<String>,
}

/// Delegate that logs every callback; migrations change nothing but the version
struct CliDelegate {
    template: Option<PathBuf>,
    key: Option<Vec<u8>>,
    wal: bool,
    events: parking_lot::Mutex<Vec<String>>,
}

impl CliDelegate {
    fn record(&self, event: String) {
        info!("{}", event);
        self.events.lock().push(event);
    }
}

impl DatabaseOpenDelegate for CliDelegate {
    fn will_create(&self, name: &str) -> Option<TemplateSource> {
        self.record(format!("will create '{}'", name));
        self.template.as_ref().map(|path| TemplateSource {
            path: path.clone(),
            encryption_key: self.key.clone(),
        })
    }

    fn configure(&self, _name: &str, config: &mut ConnectionConfig) {
        if self.wal {
            config.journal_mode = Some(JournalMode::Wal);
        }
        config.cipher_key = self.key.clone();
    }

    fn on_create(&self, name: &str, _conn: &Connection) -> Result<()> {
        self.record(format!("created '{}'", name));
        Ok(())
    }

    fn on_upgrade(&self, name: &str, _conn: &Connection, old: u32, new: u32) -> Result<()> {
        self.record(format!("upgraded '{}' from {} to {}", name, old, new));
        Ok(())
    }

    fn on_downgrade(&self, name: &str, _conn: &Connection, old: u32, new: u32) -> Result<()> {
        self.record(format!("downgraded '{}' from {} to {}", name, old, new));
        Ok(())
    }

    fn on_open(&self, name: &str, _db: &DatabaseQueue) {
        self.record(format!("opened '{}'", name));
    }

    fn on_open_failed(&self, name: &str, error: &anyhow::Error) {
        warn!("failed to open '{}': {:#}", name, error);
        self.events
            .lock()
            .push(format!("failed to open '{}': {}", name, error));
    }
}

fn parse_key(key: Option<&str>) -> Result<Option<Vec<u8>>> {
    key.map(|k| hex::decode(k.trim()).map_err(|e| anyhow!("Invalid hex key: {}", e)))
        .transpose()
}

pub fn run(helper: &DatabaseHelper, args: OpenArgs, json: bool) -> Result<()> {
    let OpenArgs {
        name,
        version,
        readonly,
        template,
        zip,
        key,
        wal,
    } = args;

    let zip_helper;
    let helper = if zip {
        zip_helper = DatabaseHelper::with_format(helper.layout().clone(), TemplateFormat::Zip);
        &zip_helper
    } else {
        helper
    };

    let delegate = CliDelegate {
        template,
        key: parse_key(key.as_deref())?,
        wal,
        events: parking_lot::Mutex::new(Vec::new()),
    };

    let name = LogicalName::new(name.as_deref());
    let db = helper.open_or_create(name.clone(), version, readonly, Some(&delegate));

    let report = OpenReport {
        name: name.to_string(),
        location: db.as_ref().map(|d| d.location().to_string()),
        opened: db.is_some(),
        version: db.as_ref().and_then(|d| d.user_version().ok()),
        events: delegate.events.lock().clone(),
    };

    super::print_output(&report, json, |r| {
        let mut lines = r.events.clone();
        match (&r.location, r.version) {
            (Some(location), Some(version)) => {
                lines.push(format!("{} ready at version {}", location, version))
            }
            _ => lines.push(format!("could not open or create '{}'", r.name)),
        }
        lines.join("\n")
    });

    if report.opened {
        Ok(())
    } else {
        Err(anyhow!("Database '{}' is unavailable", name))
    }
}
