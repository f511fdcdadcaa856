//! Settings persistence
//!
//! Preferences live under a single `settings` key. On disk that is a small
//! JSON document:
//! - settings: the serialized [`Preferences`]

use crate::session::Preferences;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key the preferences are stored under
pub const SETTINGS_KEY: &str = "settings";

/// Settings-related errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value persistence for the capture preferences
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing was stored yet
    fn load(&self) -> Result<Option<Preferences>, SettingsError>;

    fn save(&self, preferences: &Preferences) -> Result<(), SettingsError>;

    /// Remove the stored preferences entirely
    fn clear(&self) -> Result<(), SettingsError>;
}

/// JSON file backed store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, SettingsError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Option<Preferences>, SettingsError> {
        let mut document = self.read_document()?;
        match document.remove(SETTINGS_KEY) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn save(&self, preferences: &Preferences) -> Result<(), SettingsError> {
        // keep unrelated keys; a corrupt document is replaced
        let mut document = self.read_document().unwrap_or_default();
        document.insert(SETTINGS_KEY.to_string(), serde_json::to_value(preferences)?);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&document)?)?;

        tracing::debug!("Saved settings to {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), SettingsError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    value: Mutex<Option<Preferences>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn with(preferences: Preferences) -> Self {
        Self {
            value: Mutex::new(Some(preferences)),
            saves: Mutex::new(0),
        }
    }

    /// Currently stored value
    pub fn snapshot(&self) -> Option<Preferences> {
        self.value.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<Preferences>, SettingsError> {
        Ok(self.snapshot())
    }

    fn save(&self, preferences: &Preferences) -> Result<(), SettingsError> {
        *self.value.lock() = Some(preferences.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn clear(&self) -> Result<(), SettingsError> {
        *self.value.lock() = None;
        Ok(())
    }
}
