//! Settings, the bundled configuration template and the ConfigGenerator.
//!
//! # Module Structure
//!
//! - `loader`: JSON load/save helpers and the settings path
//! - `template`: the bundled `Sample.plist`-shaped configuration tree
//! - `generator`: overlays selection results onto the template
//!
//! # Settings Management
//!
//! The `SettingsManager` provides thread-safe access to `Settings`:
//! - Uses `Arc<RwLock<Settings>>` for parallel reads
//! - Persists to `<config_dir>/efi-forge/settings.json`
//! - Each pipeline phase takes a snapshot at its start

pub mod generator;
pub mod loader;
pub mod template;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub use generator::{generate, GeneratedConfig, GeneratorInput};

/// Text picker; no OpenCanopy and no picker resources.
pub const PICKER_AUTO: &str = "Auto";

/// User settings.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where finished EFI trees are written.
    pub output_dir: String,
    /// Offer beta releases as targets.
    pub include_beta: bool,
    pub auto_update: bool,

    // Local caches filled by the resource fetcher
    pub skeleton_dir: String,
    pub kexts_dir: String,
    pub log_dir: String,
    /// Base URL serving resource archives; empty disables downloads.
    pub resource_mirror: String,

    /// `Auto` or a GUI variant such as `Acidanthera\GoldenGate`.
    pub picker_variant: String,
    pub picker_audio_assist: bool,
    pub verbose_boot: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let data = loader::default_data_dir();
        let text = |p: PathBuf| p.to_string_lossy().into_owned();
        Settings {
            output_dir: text(data.join("Results")),
            include_beta: false,
            auto_update: true,
            skeleton_dir: text(data.join("OpenCorePkg")),
            kexts_dir: text(data.join("Kexts")),
            log_dir: text(data.join("logs")),
            resource_mirror: String::new(),
            picker_variant: PICKER_AUTO.to_string(),
            picker_audio_assist: false,
            verbose_boot: true,
        }
    }
}

impl Settings {
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn skeleton_path(&self) -> PathBuf {
        PathBuf::from(&self.skeleton_dir)
    }

    pub fn kexts_path(&self) -> PathBuf {
        PathBuf::from(&self.kexts_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }

    /// A GUI picker needs OpenCanopy and its image folder.
    pub fn uses_gui_picker(&self) -> bool {
        !self.picker_variant.is_empty() && self.picker_variant != PICKER_AUTO
    }
}

/// Key/value access to settings, for collaborators that only know names.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ValidationFailed(format!(
            "{} expects a boolean, got '{}'",
            key, other
        ))),
    }
}

impl SettingsStore for Settings {
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "output_dir" => self.output_dir.clone(),
            "include_beta" => self.include_beta.to_string(),
            "auto_update" => self.auto_update.to_string(),
            "skeleton_dir" => self.skeleton_dir.clone(),
            "kexts_dir" => self.kexts_dir.clone(),
            "log_dir" => self.log_dir.clone(),
            "resource_mirror" => self.resource_mirror.clone(),
            "picker_variant" => self.picker_variant.clone(),
            "picker_audio_assist" => self.picker_audio_assist.to_string(),
            "verbose_boot" => self.verbose_boot.to_string(),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "output_dir" => self.output_dir = value.to_string(),
            "include_beta" => self.include_beta = parse_bool(key, value)?,
            "auto_update" => self.auto_update = parse_bool(key, value)?,
            "skeleton_dir" => self.skeleton_dir = value.to_string(),
            "kexts_dir" => self.kexts_dir = value.to_string(),
            "log_dir" => self.log_dir = value.to_string(),
            "resource_mirror" => self.resource_mirror = value.trim().to_string(),
            "picker_variant" => self.picker_variant = value.to_string(),
            "picker_audio_assist" => self.picker_audio_assist = parse_bool(key, value)?,
            "verbose_boot" => self.verbose_boot = parse_bool(key, value)?,
            other => {
                return Err(ConfigError::ValidationFailed(format!("Unknown setting '{}'", other)));
            }
        }
        Ok(())
    }
}

/// Thread-safe settings manager.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from the global settings path, or defaults if absent.
    pub fn load() -> Result<Settings, ConfigError> {
        let path = loader::get_global_settings_path()?;
        Self::load_from(&path)
    }

    /// Load settings from `path`.
    ///
    /// A file that no longer parses is logged and replaced by defaults
    /// rather than failing startup.
    pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
        match loader::load_json_file::<Settings>(path) {
            Ok(settings) => Ok(settings),
            Err(ConfigError::FileNotFound(_)) => Ok(Settings::default()),
            Err(ConfigError::InvalidJson(e)) => {
                log::warn!(
                    "[Config] Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                Ok(Settings::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save settings to the global settings path.
    pub fn save(settings: &Settings) -> Result<(), ConfigError> {
        let path = loader::get_global_settings_path()?;
        Self::save_to(settings, &path)
    }

    pub fn save_to(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
        loader::save_json_file(settings, path)?;
        log::debug!("[Config] Settings saved to {}", path.display());
        Ok(())
    }

    /// Create a thread-safe shared instance of Settings
    pub fn new_shared() -> Result<Arc<RwLock<Settings>>, ConfigError> {
        let settings = Self::load()?;
        Ok(Arc::new(RwLock::new(settings)))
    }

    /// Copy the current settings for one phase.
    pub fn snapshot(shared: &Arc<RwLock<Settings>>) -> Settings {
        match shared.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.include_beta);
        assert_eq!(settings.picker_variant, PICKER_AUTO);
        assert!(!settings.uses_gui_picker());
        assert!(settings.output_dir.ends_with("Results"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.include_beta = true;
        settings.picker_variant = "Acidanthera\\GoldenGate".into();
        SettingsManager::save_to(&settings, &path).unwrap();

        let loaded = SettingsManager::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert!(loaded.uses_gui_picker());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "include_beta": true }"#).unwrap();
        let loaded = SettingsManager::load_from(&path).unwrap();
        assert!(loaded.include_beta);
        assert!(loaded.auto_update);
        assert_eq!(loaded.picker_variant, PICKER_AUTO);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SettingsManager::load_from(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_store_get_set() {
        let mut settings = Settings::default();
        settings.set("output_dir", "/tmp/out").unwrap();
        settings.set("include_beta", "yes").unwrap();
        assert_eq!(settings.get("output_dir").as_deref(), Some("/tmp/out"));
        assert_eq!(settings.get("include_beta").as_deref(), Some("true"));
        assert!(settings.set("include_beta", "maybe").is_err());
        assert_eq!(settings.get("resource_mirror").as_deref(), Some(""));
        settings.set("resource_mirror", " https://mirror.example/efi ").unwrap();
        assert_eq!(settings.get("resource_mirror").as_deref(), Some("https://mirror.example/efi"));
        assert!(settings.set("theme", "dark").is_err());
        assert_eq!(settings.get("theme"), None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let shared = Arc::new(RwLock::new(Settings::default()));
        let snapshot = SettingsManager::snapshot(&shared);
        shared.write().unwrap().include_beta = true;
        assert!(!snapshot.include_beta);
    }
}
