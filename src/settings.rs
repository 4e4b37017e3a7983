//! Settings store: key/value persistence for shield configuration
//!
//! The pipeline never assumes a particular backing store, only that a
//! write is visible to the next read and survives a page reload.

use crate::error::{Result, ShieldError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Key/value settings contract
pub trait SettingsStore: Send + Sync {
    /// Read the given keys; absent keys are omitted from the result
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Merge a partial update into the stored settings
    fn set(&self, partial: HashMap<String, Value>) -> Result<()>;
}

/// JSON file-based settings store
///
/// Keeps all settings in a single JSON object on disk.
/// Atomic writes via temp file + rename to prevent corruption.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, Value>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            ShieldError::Settings(format!(
                "Failed to read settings file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&json).map_err(|e| {
            ShieldError::Settings(format!(
                "Failed to parse settings file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_all(&self, settings: &HashMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ShieldError::Settings(format!(
                    "Failed to create settings directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            ShieldError::Settings(format!(
                "Failed to write settings file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            ShieldError::Settings(format!(
                "Failed to rename settings file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), keys = settings.len(), "Settings saved");
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let mut all = self.read_all()?;
        Ok(keys
            .iter()
            .filter_map(|k| all.remove(*k).map(|v| (k.to_string(), v)))
            .collect())
    }

    fn set(&self, partial: HashMap<String, Value>) -> Result<()> {
        let mut all = self.read_all()?;
        all.extend(partial);
        self.write_all(&all)
    }
}

/// In-memory settings store for testing
#[derive(Default)]
pub struct MemorySettingsStore {
    state: std::sync::RwLock<HashMap<String, Value>>,
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let state = self.state.read().map_err(|e| {
            ShieldError::Settings(format!("Failed to acquire settings lock: {}", e))
        })?;
        Ok(keys
            .iter()
            .filter_map(|k| state.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&self, partial: HashMap<String, Value>) -> Result<()> {
        let mut state = self.state.write().map_err(|e| {
            ShieldError::Settings(format!("Failed to acquire settings lock: {}", e))
        })?;
        state.extend(partial);
        Ok(())
    }
}
