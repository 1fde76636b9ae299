use anyhow::{anyhow, Result};
use clap::Args;
use serde::Serialize;
use sqlite_provision::{DatabaseHelper, DatabaseValidator, LogicalName};

/// Arguments shared by commands that look at a single database
#[derive(Args)]
pub struct NameArgs {
    /// Logical database name
    #[clap(name = "NAME")]
    pub name: String,
}

#[derive(Debug, Serialize)]
struct PathInfo {
    name: String,
    path: Option<String>,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    name: String,
    version: u32,
}

#[derive(Debug, Serialize)]
struct CheckInfo {
    name: String,
    valid: bool,
}

/// Print the resolved database path
pub fn path(helper: &DatabaseHelper, args: NameArgs, json: bool) {
    let name = LogicalName::from(args.name.as_str());
    let path = helper.database_path(name.clone());

    let info = PathInfo {
        name: name.to_string(),
        exists: path.as_ref().map(|p| p.exists()).unwrap_or(false),
        path: path.map(|p| p.to_string_lossy().to_string()),
    };

    super::print_output(&info, json, |i| {
        i.path.clone().unwrap_or_else(|| name.as_str().to_string())
    });
}

/// Print the stored version without migrating
pub fn version(helper: &DatabaseHelper, args: NameArgs, json: bool) -> Result<()> {
    let name = LogicalName::from(args.name.as_str());
    let db = helper
        .open(name.clone(), None, true, None)
        .ok_or_else(|| anyhow!("Database '{}' does not exist or can't be opened", name))?;

    let info = VersionInfo {
        name: name.to_string(),
        version: db.user_version()?,
    };
    super::print_output(&info, json, |i| i.version.to_string());
    Ok(())
}

/// Check that the database exists and passes an integrity check
pub fn check(validator: &DatabaseValidator, args: NameArgs, json: bool) -> Result<()> {
    let name = LogicalName::from(args.name.as_str());
    let valid = validator.is_valid_database(name.clone(), None);

    let info = CheckInfo {
        name: name.to_string(),
        valid,
    };
    super::print_output(&info, json, |i| {
        if i.valid {
            format!("'{}' is valid", i.name)
        } else {
            format!("'{}' is missing or corrupted", i.name)
        }
    });

    if valid {
        Ok(())
    } else {
        Err(anyhow!("Database '{}' failed validation", name))
    }
}

/// Delete the database file
pub fn remove(helper: &DatabaseHelper, args: NameArgs) -> Result<()> {
    let name = LogicalName::from(args.name.as_str());
    if helper.remove_database(name.clone())? {
        println!("removed '{}'", name);
    } else {
        println!("'{}' has no file", name);
    }
    Ok(())
}
