use serde::Serialize;
use sqlite_provision::ProvisionConfig;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    databases_dir: String,
    databases_dir_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_count: Option<usize>,
    temp_dir: String,
    file_extension: String,
    template_format: String,
}

pub fn run(config: &ProvisionConfig, json: bool) {
    let databases_dir = config.databases_dir();
    let exists = Path::new(&databases_dir).exists();

    // Count files carrying the database extension
    let database_count = if exists {
        std::fs::read_dir(&databases_dir).ok().map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == config.file_extension.as_str())
                        .unwrap_or(false)
                })
                .count()
        })
    } else {
        None
    };

    let info = ConfigInfo {
        config_file: ProvisionConfig::config_file_path(),
        data_dir: config.data_dir.clone(),
        databases_dir,
        databases_dir_exists: exists,
        database_count,
        temp_dir: config.temp_dir.clone(),
        file_extension: config.file_extension.clone(),
        template_format: config.template_format.to_string(),
    };

    super::print_output(&info, json, |i| {
        let mut lines = vec![
            "sqlite-provision Configuration".to_string(),
            "==============================".to_string(),
            String::new(),
            format!("Config File:          {}", i.config_file),
            config.summary(),
        ];
        if let Some(count) = i.database_count {
            lines.push(format!("Databases:            {}", count));
        }
        lines.join("\n")
    });
}
