// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Settings persistence
//
// AppSettings live in settings.json under the platform config directory.
// A missing or unreadable file falls back to defaults.

use crate::types::{AppError, AppSettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const SETTINGS_FILE: &str = "settings.json";

/// Settings held in memory and written through on every change
pub struct SettingsStore {
    current: RwLock<AppSettings>,
    path: PathBuf,
}

impl SettingsStore {
    /// Open the store at the platform location
    pub fn new() -> Result<Self, AppError> {
        let dirs = directories::ProjectDirs::from("com", "siro", "transfer")
            .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?;
        fs::create_dir_all(dirs.config_dir())
            .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;
        Self::open(dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Open the store at `path`, writing defaults there on first use
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let first_run = !path.exists();
        let settings = if first_run {
            tracing::info!("No settings at {}, using defaults", path.display());
            AppSettings::default()
        } else {
            load(&path)?
        };

        let store = Self {
            current: RwLock::new(settings),
            path,
        };
        if first_run {
            store.save()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(&self.get())
            .map_err(|e| AppError::Serialization(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)
            .map_err(|e| AppError::FileIo(format!("Failed to write settings: {}", e)))
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> AppSettings {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace all settings and write them out
    pub fn update(&self, settings: AppSettings) -> Result<(), AppError> {
        if settings.max_history == 0 {
            return Err(AppError::InvalidConfig(
                "maxHistory must be at least 1".to_string(),
            ));
        }

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = settings;
        self.save().inspect_err(|e| tracing::error!("Failed to save settings: {}", e))?;
        tracing::debug!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Change the default download directory
    pub fn set_download_dir(&self, dir: PathBuf) -> Result<(), AppError> {
        let mut settings = self.get();
        settings.download_dir = dir;
        self.update(settings)
    }

    /// Point at a specific croc executable; None restores the PATH lookup
    pub fn set_croc_path(&self, path: Option<PathBuf>) -> Result<(), AppError> {
        let mut settings = self.get();
        settings.croc_path = path;
        self.update(settings)
    }

    pub fn set_relay(&self, relay: Option<String>) -> Result<(), AppError> {
        let mut settings = self.get();
        settings.relay = relay;
        self.update(settings)
    }
}

fn load(path: &Path) -> Result<AppSettings, AppError> {
    let json = fs::read_to_string(path)
        .map_err(|e| AppError::FileIo(format!("Failed to read settings: {}", e)))?;

    Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
        tracing::warn!("Unreadable settings in {}, using defaults: {}", path.display(), e);
        AppSettings::default()
    }))
}
