use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::database::TemplateFormat;
use crate::storage::{StorageLayout, DATABASES_DIR_NAME, DEFAULT_EXTENSION};

pub struct ProvisionConfig {
    /// Directory holding the `Databases` folder
    pub data_dir: String,

    /// Directory for unpacked templates
    pub temp_dir: String,

    /// Extension of the database files (default: sqlite)
    pub file_extension: String,

    /// How bundled templates are packaged
    pub template_format: TemplateFormat,
}

const EMPTY_CONFIG: &str = r#"### sqlite-provision configuration file

### directory holding the "Databases" folder
# data_dir = "~/.local/share/sqlite-provision"

### directory for unpacked templates
# temp_dir = "/tmp/sqlite-provision"

### extension of the database files
# file_extension = "sqlite"

### packaging of bundled templates: "plain" or "zip"
# template_format = "plain"
"#;

const APP_DIR_NAME: &str = "sqlite-provision";

fn default_data_dir() -> String {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join(APP_DIR_NAME).to_string_lossy().to_string())
        .unwrap_or_else(|| format!("./{}", APP_DIR_NAME))
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join(APP_DIR_NAME)
        .to_string_lossy()
        .to_string()
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
            file_extension: DEFAULT_EXTENSION.to_string(),
            template_format: TemplateFormat::Plain,
        }
    }
}

impl ProvisionConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<ProvisionConfig> {
        let mut builder = Config::builder();

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let p = Self::config_file_path();
                let config_dir = Path::new(&p)
                    .parent()
                    .ok_or_else(|| anyhow!("Invalid config file path '{}'", p))?;
                std::fs::create_dir_all(config_dir)
                    .map_err(|e| anyhow!("Unable to create config directory: {}", e))?;
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of PROVISION)
        // E.g., `PROVISION_DATA_DIR=/data ./sqlite-provision` would set the data directory
        builder = builder.add_source(config::Environment::with_prefix("PROVISION"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_settings(&config)
    }

    /// Build a configuration from flat key/value settings, falling back to defaults
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<ProvisionConfig> {
        let defaults = ProvisionConfig::default();

        let data_dir = match settings.get("data_dir") {
            Some(p) => expand_home(p),
            None => defaults.data_dir,
        };

        let temp_dir = match settings.get("temp_dir") {
            Some(p) => expand_home(p),
            None => defaults.temp_dir,
        };

        let file_extension = settings
            .get("file_extension")
            .map(|s| s.trim().trim_start_matches('.').to_string())
            .unwrap_or(defaults.file_extension);
        if file_extension.is_empty() {
            return Err(anyhow!("file_extension must not be empty"));
        }

        let template_format = match settings.get("template_format") {
            Some(s) => s.parse()?,
            None => defaults.template_format,
        };

        Ok(ProvisionConfig {
            data_dir,
            temp_dir,
            file_extension,
            template_format,
        })
    }

    /// Get the path to the directory holding the database files
    pub fn databases_dir(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, DATABASES_DIR_NAME)
    }

    /// Storage layout described by this configuration
    pub fn storage_layout(&self) -> Result<StorageLayout> {
        StorageLayout::new(
            PathBuf::from(self.databases_dir()),
            PathBuf::from(&self.temp_dir),
            &self.file_extension,
        )
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:       {}", self.data_dir),
            format!("Databases Directory:  {}", self.databases_dir()),
            format!("Temporary Directory:  {}", self.temp_dir),
            format!("File Extension:       {}", self.file_extension),
            format!("Template Format:      {}", self.template_format),
        ];

        if !Path::new(&self.databases_dir()).exists() {
            lines.push("Databases directory does not exist yet".to_string());
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.{}/provision.toml", home_dir, APP_DIR_NAME)
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}
