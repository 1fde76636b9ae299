//! Database provisioning
//!
//! Locating, creating, seeding and migrating databases by logical name:
//! - `naming`: logical names and digest-based file paths
//! - `template`: seed templates and their unpacking strategies
//! - `delegate`: lifecycle callbacks supplied by the application
//! - `helper`: the open/create/migrate state machine
//! - `validator`: read-only integrity validation

mod delegate;
mod helper;
mod naming;
mod template;
mod validator;

pub use delegate::{DatabaseOpenDelegate, NoopDelegate};
pub use helper::{DatabaseHelper, Migration};
pub use naming::{database_file_name, name_digest, resolve_path, LogicalName};
pub use template::{
    FileCopyUnpacker, TemplateFormat, TemplateSource, TemplateUnpacker, ZipEntryUnpacker,
};
pub use validator::DatabaseValidator;
