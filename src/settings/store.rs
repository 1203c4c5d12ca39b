use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::settings::types::CaptureSettings;
use crate::settings::ConfigError;

const SETTINGS_FILE_NAME: &str = "stillgrab.json";

/// `<config dir>/stillgrab/stillgrab.json`, if the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stillgrab").join(SETTINGS_FILE_NAME))
}

/// Persistent capture settings backed by a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<CaptureSettings>,
}

impl SettingsStore {
    /// Open the store at `path`, loading the file if it exists.
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let data = Self::load(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Load settings from a JSON file, returning defaults on a missing file.
    pub fn load(path: &Path) -> Result<CaptureSettings, ConfigError> {
        if !path.exists() {
            return Ok(CaptureSettings::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save current settings to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<(), ConfigError> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data).map_err(ConfigError::Serialize)?;
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(write_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        tracing::debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> CaptureSettings {
        self.data.lock().clone()
    }

    /// Modify the in-memory settings. Call [`SettingsStore::save`] to persist.
    pub fn update(&self, f: impl FnOnce(&mut CaptureSettings)) {
        f(&mut self.data.lock());
    }
}
