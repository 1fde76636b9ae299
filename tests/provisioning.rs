//! End-to-end provisioning scenarios against real database files

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use sqlite_provision::database::name_digest;
use sqlite_provision::{
    ConnectionConfig, DatabaseHelper, DatabaseOpenDelegate, DatabaseQueue, DatabaseValidator,
    JournalMode, LogicalName, StorageLayout, TemplateFormat, TemplateSource,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    WillCreate,
    Configure,
    Create,
    Upgrade(u32, u32),
    Downgrade(u32, u32),
    Open,
    Failed(String),
}

#[derive(Default)]
struct TestDelegate {
    template: Option<TemplateSource>,
    fail_migration: bool,
    wal: bool,
    events: Mutex<Vec<Event>>,
}

impl TestDelegate {
    fn with_template(source: TemplateSource) -> Self {
        Self {
            template: Some(source),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail_migration: true,
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn migrations(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::Create | Event::Upgrade(..) | Event::Downgrade(..)
                )
            })
            .collect()
    }

    fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn outcome(&self) -> Result<()> {
        if self.fail_migration {
            Err(anyhow!("migration exploded"))
        } else {
            Ok(())
        }
    }
}

impl DatabaseOpenDelegate for TestDelegate {
    fn will_create(&self, _name: &str) -> Option<TemplateSource> {
        self.push(Event::WillCreate);
        self.template.clone()
    }

    fn configure(&self, _name: &str, config: &mut ConnectionConfig) {
        self.push(Event::Configure);
        if self.wal {
            config.journal_mode = Some(JournalMode::Wal);
        }
    }

    fn on_create(&self, _name: &str, conn: &Connection) -> Result<()> {
        self.push(Event::Create);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS contacts (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )?;
        self.outcome()
    }

    fn on_upgrade(&self, _name: &str, conn: &Connection, old: u32, new: u32) -> Result<()> {
        self.push(Event::Upgrade(old, new));
        conn.execute_batch("CREATE TABLE IF NOT EXISTS upgraded (id INTEGER PRIMARY KEY)")?;
        self.outcome()
    }

    fn on_downgrade(&self, _name: &str, _conn: &Connection, old: u32, new: u32) -> Result<()> {
        self.push(Event::Downgrade(old, new));
        self.outcome()
    }

    fn on_open(&self, _name: &str, _db: &DatabaseQueue) {
        self.push(Event::Open);
    }

    fn on_open_failed(&self, _name: &str, error: &anyhow::Error) {
        self.push(Event::Failed(error.to_string()));
    }
}

fn setup() -> (TempDir, DatabaseHelper) {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::in_dir(dir.path()).unwrap();
    (dir, DatabaseHelper::new(layout))
}

fn db_path(helper: &DatabaseHelper, name: &str) -> PathBuf {
    helper.database_path(name).unwrap()
}

/// Create a database file at the path of `name` with the given stored version
fn seed_raw(helper: &DatabaseHelper, name: &str, version: u32) {
    helper.layout().ensure().unwrap();
    let conn = Connection::open(db_path(helper, name)).unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE marker (id INTEGER PRIMARY KEY); PRAGMA user_version = {};",
        version
    ))
    .unwrap();
}

fn raw_version(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap()
}

fn raw_table_exists(path: &Path, table: &str) -> bool {
    let conn = Connection::open(path).unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |r| r.get(0),
        )
        .unwrap();
    count > 0
}

/// Write a template database with a few contacts and return its path
fn make_template(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO contacts (name) VALUES ('ada'), ('grace'), ('linus');
         PRAGMA user_version = 1;",
    )
    .unwrap();
    path
}

fn contact_names(db: &DatabaseQueue) -> Vec<String> {
    db.read(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM contacts ORDER BY id")?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    })
    .unwrap()
}

#[test]
fn test_end_to_end_contacts_without_template() {
    let (dir, helper) = setup();
    let delegate = TestDelegate::default();

    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();

    assert_eq!(db.user_version().unwrap(), 1);
    assert_eq!(delegate.count(&Event::Create), 1);
    assert_eq!(delegate.count(&Event::Open), 1);

    let expected = dir
        .path()
        .join("Databases")
        .join(format!("{}.sqlite", name_digest("contacts")));
    assert_eq!(db.path(), Some(expected.as_path()));
    assert!(expected.exists());
}

#[test]
fn test_matching_version_runs_no_migration() {
    let (_dir, helper) = setup();
    drop(helper.open_or_create("contacts", 2, false, None).unwrap());

    let delegate = TestDelegate::default();
    let db = helper
        .open_or_create("contacts", 2, false, Some(&delegate))
        .unwrap();

    assert_eq!(db.user_version().unwrap(), 2);
    assert!(delegate.migrations().is_empty());
    assert_eq!(delegate.events(), vec![Event::Configure, Event::Open]);
}

#[test]
fn test_upgrade_path() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 1);

    let delegate = TestDelegate::default();
    let db = helper
        .open_or_create("contacts", 3, false, Some(&delegate))
        .unwrap();

    assert_eq!(delegate.migrations(), vec![Event::Upgrade(1, 3)]);
    assert_eq!(db.user_version().unwrap(), 3);
    assert!(db.table_exists("upgraded").unwrap());
    // existing data is kept
    assert!(db.table_exists("marker").unwrap());
}

#[test]
fn test_downgrade_path() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 5);

    let delegate = TestDelegate::default();
    let db = helper
        .open_or_create("contacts", 2, false, Some(&delegate))
        .unwrap();

    assert_eq!(delegate.migrations(), vec![Event::Downgrade(5, 2)]);
    assert_eq!(db.user_version().unwrap(), 2);
}

#[test]
fn test_failed_create_callback_leaves_version_zero() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 0);
    let path = db_path(&helper, "contacts");

    let delegate = TestDelegate::failing();
    assert!(helper
        .open("contacts", Some(4), false, Some(&delegate))
        .is_none());

    assert_eq!(
        delegate.events(),
        vec![
            Event::Configure,
            Event::Create,
            Event::Failed("migration exploded".to_string())
        ]
    );
    assert_eq!(raw_version(&path), 0);
    // table created by the callback was rolled back too
    assert!(!raw_table_exists(&path, "contacts"));
    assert!(raw_table_exists(&path, "marker"));
}

#[test]
fn test_failed_upgrade_keeps_stored_version() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 2);
    let path = db_path(&helper, "contacts");

    let delegate = TestDelegate::failing();
    assert!(helper
        .open("contacts", Some(3), false, Some(&delegate))
        .is_none());

    assert_eq!(delegate.count(&Event::Open), 0);
    assert_eq!(delegate.count(&Event::Failed("migration exploded".to_string())), 1);
    assert_eq!(raw_version(&path), 2);
    assert!(!raw_table_exists(&path, "upgraded"));
}

#[test]
fn test_failed_migration_falls_through_to_create() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 2);

    let delegate = TestDelegate::failing();
    assert!(helper
        .open_or_create("contacts", 3, false, Some(&delegate))
        .is_none());

    // open failed, then create was attempted and failed as well
    assert_eq!(delegate.count(&Event::WillCreate), 1);
    assert_eq!(delegate.count(&Event::Open), 0);
    assert_eq!(
        delegate
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Failed(_)))
            .count(),
        2
    );
    assert!(!db_path(&helper, "contacts").exists());
}

#[test]
fn test_readonly_mismatch_fails_without_migration() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 1);
    let path = db_path(&helper, "contacts");

    let delegate = TestDelegate::default();
    assert!(helper
        .open("contacts", Some(2), true, Some(&delegate))
        .is_none());

    assert!(delegate.migrations().is_empty());
    assert_eq!(delegate.count(&Event::Open), 0);
    let failures: Vec<_> = delegate
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Failed(_)))
        .collect();
    assert_eq!(failures.len(), 1);
    if let Event::Failed(message) = &failures[0] {
        assert!(message.contains("read-only"));
    }
    assert_eq!(raw_version(&path), 1);
}

#[test]
fn test_readonly_matching_version_opens() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 1);

    let delegate = TestDelegate::default();
    let db = helper
        .open_or_create("contacts", 1, true, Some(&delegate))
        .unwrap();
    assert!(db.is_readonly());
    assert_eq!(delegate.events(), vec![Event::Configure, Event::Open]);
}

#[test]
fn test_in_memory_never_touches_disk() {
    let (dir, helper) = setup();

    for name in [None, Some(""), Some("  "), Some(":memory:")] {
        let delegate = TestDelegate::default();
        let db = helper
            .open_or_create(LogicalName::new(name), 3, false, Some(&delegate))
            .unwrap();
        assert!(db.is_in_memory());
        assert_eq!(db.user_version().unwrap(), 3);
        assert_eq!(delegate.migrations(), vec![Event::Create]);
        // no template is requested for in-memory databases
        assert_eq!(delegate.count(&Event::WillCreate), 0);
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(entries.is_empty());
}

#[test]
fn test_configure_runs_once_before_use() {
    let (_dir, helper) = setup();
    let delegate = TestDelegate {
        wal: true,
        ..Default::default()
    };

    let db = helper
        .open_or_create("journal", 1, false, Some(&delegate))
        .unwrap();

    // one failed-fast open (no callbacks) followed by one create-and-open
    assert_eq!(delegate.count(&Event::Configure), 1);
    assert_eq!(delegate.events()[0], Event::WillCreate);
    assert_eq!(delegate.events()[1], Event::Configure);

    let mode: String = db
        .read(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn test_seed_from_plain_template() {
    let (dir, helper) = setup();
    let template = make_template(dir.path(), "bundle.sqlite");

    let delegate = TestDelegate::with_template(TemplateSource::new(&template));
    let db = helper
        .open_or_create("contacts", 2, false, Some(&delegate))
        .unwrap();

    assert_eq!(contact_names(&db), vec!["ada", "grace", "linus"]);
    // template was at version 1, so it gets upgraded rather than created
    assert_eq!(delegate.migrations(), vec![Event::Upgrade(1, 2)]);
    assert_eq!(db.user_version().unwrap(), 2);

    // temporary copy is gone, the template itself is untouched
    let tmp = helper
        .layout()
        .template_path(&LogicalName::from("contacts"))
        .unwrap();
    assert!(!tmp.exists());
    assert!(template.exists());
}

#[test]
fn test_seed_from_zip_template() {
    let (dir, _) = setup();
    let layout = StorageLayout::in_dir(dir.path()).unwrap();
    let helper = DatabaseHelper::with_format(layout, TemplateFormat::Zip);

    let template = make_template(dir.path(), "contacts-template.sqlite");
    let archive = dir.path().join("bundle.zip");
    {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        zip.start_file("contacts", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&std::fs::read(&template).unwrap()).unwrap();
        zip.finish().unwrap();
    }

    let delegate = TestDelegate::with_template(TemplateSource::new(&archive));
    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();

    assert_eq!(contact_names(&db), vec!["ada", "grace", "linus"]);
    assert!(delegate.migrations().is_empty());

    // an archive without a matching entry degrades to an empty database
    let delegate = TestDelegate::with_template(TemplateSource::new(&archive));
    let db = helper
        .open_or_create("calendar", 1, false, Some(&delegate))
        .unwrap();
    assert_eq!(delegate.migrations(), vec![Event::Create]);
    assert!(contact_names(&db).is_empty());
}

#[test]
fn test_corrupted_template_degrades_to_empty_database() {
    let (dir, helper) = setup();
    let template = dir.path().join("broken.sqlite");
    std::fs::write(&template, vec![0x13; 4096]).unwrap();

    let delegate = TestDelegate::with_template(TemplateSource::new(&template));
    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();

    assert_eq!(delegate.migrations(), vec![Event::Create]);
    assert!(contact_names(&db).is_empty());
    assert!(db.check_integrity());
}

#[test]
fn test_missing_template_degrades_to_empty_database() {
    let (dir, helper) = setup();
    let delegate =
        TestDelegate::with_template(TemplateSource::new(dir.path().join("nowhere.sqlite")));

    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();
    assert_eq!(delegate.migrations(), vec![Event::Create]);
    assert_eq!(db.user_version().unwrap(), 1);
}

#[test]
fn test_create_replaces_stale_file() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 7);

    let delegate = TestDelegate::default();
    let db = helper.create("contacts", 1, false, Some(&delegate)).unwrap();

    assert_eq!(delegate.migrations(), vec![Event::Create]);
    assert!(!db.table_exists("marker").unwrap());
}

#[test]
fn test_readonly_create_fails_and_leaves_nothing() {
    let (_dir, helper) = setup();
    let delegate = TestDelegate::default();

    assert!(helper
        .open_or_create("contacts", 1, true, Some(&delegate))
        .is_none());
    assert_eq!(delegate.count(&Event::Open), 0);
    assert!(!db_path(&helper, "contacts").exists());
}

#[test]
fn test_validator_never_migrates() {
    let (_dir, helper) = setup();
    seed_raw(&helper, "contacts", 0);
    let validator = DatabaseValidator::from(&helper);

    let delegate = TestDelegate::default();
    assert!(validator.is_valid_database("contacts", Some(&delegate)));
    assert!(delegate.migrations().is_empty());
    assert_eq!(raw_version(&db_path(&helper, "contacts")), 0);

    // overwritten with garbage
    let path = db_path(&helper, "contacts");
    std::fs::write(&path, vec![0x42; 8192]).unwrap();
    assert!(!validator.is_valid_database("contacts", None));
}

#[test]
fn test_handle_serializes_concurrent_writers() {
    let (_dir, helper) = setup();
    let delegate = TestDelegate::default();
    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();

    std::thread::scope(|scope| {
        for t in 0..4 {
            let db = &db;
            scope.spawn(move || {
                for i in 0..25 {
                    db.write(|conn| {
                        conn.execute(
                            "INSERT INTO contacts (name) VALUES (?1)",
                            [format!("{}-{}", t, i)],
                        )?;
                        Ok(())
                    })
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(contact_names(&db).len(), 100);
}

#[test]
fn test_target_version_beyond_i32_is_rejected() {
    let (_dir, helper) = setup();
    let too_large = sqlite_provision::MAX_SCHEMA_VERSION + 1;

    for _ in 0..2 {
        let delegate = TestDelegate::default();
        assert!(helper
            .open_or_create("contacts", too_large, false, Some(&delegate))
            .is_none());
        assert!(delegate.migrations().is_empty());
        assert_eq!(delegate.count(&Event::Open), 0);
        let failed = delegate
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Failed(msg) if msg.contains("exceeds")))
            .count();
        assert_eq!(failed, 1);
        assert!(!db_path(&helper, "contacts").exists());
    }

    // an existing database keeps its version
    seed_raw(&helper, "contacts", 4);
    let delegate = TestDelegate::default();
    assert!(helper
        .open("contacts", Some(too_large), false, Some(&delegate))
        .is_none());
    assert_eq!(raw_version(&db_path(&helper, "contacts")), 4);
}

#[cfg(not(feature = "sqlcipher"))]
#[test]
fn test_keyed_template_without_cipher_support_starts_empty() {
    let (dir, helper) = setup();
    let template = make_template(dir.path(), "bundle.sqlite");

    let delegate = TestDelegate::with_template(
        TemplateSource::new(&template).with_encryption_key(vec![7u8; 32]),
    );
    let db = helper
        .open_or_create("contacts", 1, false, Some(&delegate))
        .unwrap();

    assert_eq!(db.user_version().unwrap(), 1);
    // the export failed, so the database was created empty
    assert_eq!(delegate.migrations(), vec![Event::Create]);
    assert!(contact_names(&db).is_empty());

    let tmp = helper
        .layout()
        .template_path(&LogicalName::from("contacts"))
        .unwrap();
    assert!(!tmp.exists());
    assert!(template.exists());
}

#[cfg(feature = "sqlcipher")]
mod encrypted {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    struct KeyedDelegate {
        inner: TestDelegate,
    }

    impl DatabaseOpenDelegate for KeyedDelegate {
        fn will_create(&self, name: &str) -> Option<TemplateSource> {
            self.inner.will_create(name)
        }

        fn configure(&self, name: &str, config: &mut ConnectionConfig) {
            self.inner.configure(name, config);
            config.cipher_key = Some(KEY.to_vec());
        }

        fn on_create(&self, name: &str, conn: &Connection) -> Result<()> {
            self.inner.on_create(name, conn)
        }

        fn on_open(&self, name: &str, db: &DatabaseQueue) {
            self.inner.on_open(name, db)
        }

        fn on_open_failed(&self, name: &str, error: &anyhow::Error) {
            self.inner.on_open_failed(name, error)
        }
    }

    #[test]
    fn test_encrypted_seed_matches_plain_seed() {
        let (dir, helper) = setup();
        let template = make_template(dir.path(), "bundle.sqlite");

        let plain = TestDelegate::with_template(TemplateSource::new(&template));
        let plain_db = helper
            .open_or_create("plain", 1, false, Some(&plain))
            .unwrap();

        let keyed = KeyedDelegate {
            inner: TestDelegate::with_template(
                TemplateSource::new(&template).with_encryption_key(KEY.to_vec()),
            ),
        };
        let keyed_db = helper
            .open_or_create("secret", 1, false, Some(&keyed))
            .unwrap();

        assert_eq!(contact_names(&keyed_db), contact_names(&plain_db));

        // without the key the file is unreadable
        let path = db_path(&helper, "secret");
        drop(keyed_db);
        let conn = Connection::open(&path).unwrap();
        assert!(conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
            .is_err());
    }
}
