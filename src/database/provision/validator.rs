//! Read-only validation of existing databases

use super::delegate::DatabaseOpenDelegate;
use super::helper::DatabaseHelper;
use super::naming::LogicalName;
use crate::database::core::DatabaseLocation;
use crate::storage::StorageLayout;

/// Checks whether a database file exists and passes an integrity check
///
/// Build one at startup and share it by reference. Validation opens the
/// database read-only without a target version, so it never creates, deletes or
/// migrates anything.
pub struct DatabaseValidator {
    helper: DatabaseHelper,
}

impl DatabaseValidator {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            helper: DatabaseHelper::new(layout),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        self.helper.layout()
    }

    /// `true` if the database file for `name` exists and is structurally sound
    ///
    /// Always `false` for the in-memory database.
    pub fn is_valid_database(
        &self,
        name: impl Into<LogicalName>,
        delegate: Option<&dyn DatabaseOpenDelegate>,
    ) -> bool {
        let name = name.into();
        let path = match self.helper.layout().database_location(&name) {
            DatabaseLocation::File(path) => path,
            DatabaseLocation::InMemory => return false,
        };
        if !path.exists() {
            return false;
        }

        self.helper
            .open(name, None, true, delegate)
            .map(|db| db.check_integrity())
            .unwrap_or(false)
    }
}

impl From<&DatabaseHelper> for DatabaseValidator {
    fn from(helper: &DatabaseHelper) -> Self {
        Self::new(helper.layout().clone())
    }
}
