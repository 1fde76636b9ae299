//! Database integrity checks

use rusqlite::Connection;
use tracing::{debug, warn};

/// Result `PRAGMA quick_check` reports for a healthy database
const INTEGRITY_OK: &str = "ok";

/// Run `PRAGMA quick_check` and report whether the database is sound
///
/// Any failure to run the check, including a file that is not a database at
/// all, counts as a failed check.
pub fn check_integrity(conn: &Connection) -> bool {
    match conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0)) {
        Ok(result) if result.eq_ignore_ascii_case(INTEGRITY_OK) => true,
        Ok(result) => {
            warn!("Integrity check failed: {}", result);
            false
        }
        Err(e) => {
            debug!("Integrity check could not run: {}", e);
            false
        }
    }
}
