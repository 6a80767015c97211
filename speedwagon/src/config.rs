//! Settings and job configuration files

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use speedwagon_sdk::{JobArguments, JobOption};

/// Application settings, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size for jobs that do not override it
    pub max_workers: usize,
    /// Plugins whose hooks are never called
    pub disabled_plugins: Vec<String>,
    /// Refuse to start when any plugin failed or collided
    pub strict_plugins: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_workers: 1,
            disabled_plugins: Vec::new(),
            strict_plugins: false,
        }
    }
}

/// Get the path to the settings file
pub fn settings_file_path() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("com", "speedwagon", "speedwagon") {
        proj_dirs.data_dir().join("settings.json")
    } else {
        PathBuf::from(".speedwagon-settings.json")
    }
}

/// Load settings; a missing file means defaults
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&content)
        .with_context(|| format!("Malformed settings file {}", path.display()))?;
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    Ok(())
}

/// Write job arguments as a flat `label -> value` JSON object
pub fn export_job_config(path: &Path, options: &[JobOption], args: &JobArguments) -> Result<()> {
    let labeled = args.to_labeled(options);
    let content = serde_json::to_string_pretty(&Value::Object(labeled))?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write job configuration to {}", path.display()))?;
    Ok(())
}

/// Read a job configuration file back into arguments
///
/// Unknown labels are rejected with a `ConfigurationError` that stays
/// downcastable through the returned `anyhow::Error`.
pub fn import_job_config(path: &Path, options: &[JobOption]) -> Result<JobArguments> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job configuration from {}", path.display()))?;
    let labeled = parse_job_config(&content)
        .with_context(|| format!("Malformed job configuration {}", path.display()))?;
    let args = JobArguments::from_labeled(options, &labeled)?;
    Ok(args)
}

fn parse_job_config(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(content)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, found {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
