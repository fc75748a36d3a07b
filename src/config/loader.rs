//! JSON file loading and saving for settings, templates and patch lists.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name under the platform config dir.
const APP_DIR: &str = "efi-forge";

/// Get the global settings path: `<config_dir>/efi-forge/settings.json`
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(config_dir.join(APP_DIR).join("settings.json"))
}

/// Default data directory: `<data_dir>/efi-forge`, falling back to the CWD.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load a JSON document.
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let value = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    Ok(value)
}

/// Save a value as pretty JSON, creating parent directories.
pub fn save_json_file<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(value).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate a JSON file path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_validate_config_path() {
        assert!(validate_config_path(Path::new("answers.json")).is_ok());
        assert!(validate_config_path(Path::new("answers.toml")).is_err());
        assert!(validate_config_path(Path::new("answers")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/value.json");
        let mut map = BTreeMap::new();
        map.insert("key".to_string(), 7u32);
        save_json_file(&map, &path).unwrap();
        let loaded: BTreeMap<String, u32> = load_json_file(&path).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result: Result<BTreeMap<String, u32>, _> = load_json_file(&dir.path().join("none.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_settings_path_shape() {
        if let Ok(path) = get_global_settings_path() {
            assert!(path.ends_with("efi-forge/settings.json"));
        }
    }
}
