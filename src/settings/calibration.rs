use std::fmt;
use std::path::{Path, PathBuf};

use crate::settings::ConfigError;

/// Offset used when no calibration file is available.
pub const DEFAULT_CALIBRATION: &str = "2_740.004_753.000_728.820_0.000_0.000_90.000_737.249_\
2253.118_756.878_0.220_-0.700_89.940_3008_1504_1034";

/// `%LOCALAPPDATA%\insta360\USBCamera\uvcoffset` (or the platform equivalent).
pub fn default_calibration_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("insta360").join("USBCamera").join("uvcoffset"))
}

/// Lens calibration offset handed to the panoramic blender.
///
/// An underscore-separated list of numbers. The blender consumes the raw
/// string; the parsed fields are kept for validation and display.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    raw: String,
    fields: Vec<f64>,
}

impl Calibration {
    /// Parse the first whitespace-separated token of `text`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw = text.split_whitespace().next().unwrap_or_default();
        if raw.is_empty() {
            return Err(ConfigError::Calibration("empty calibration string".to_string()));
        }
        let fields = raw
            .split('_')
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    ConfigError::Calibration(format!("'{field}' is not a number in '{raw}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            fields,
        })
    }

    /// Read the calibration file at `path`.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Read `path`, falling back to the built-in offset when the file is
    /// missing or malformed.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::info!("No calibration file location, using default offset");
            return Self::default();
        };
        match Self::read(path) {
            Ok(calibration) => {
                tracing::info!("Read offset: {calibration}");
                calibration
            }
            Err(e) => {
                tracing::warn!("{e}, using default offset instead");
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn fields(&self) -> &[f64] {
        &self.fields
    }
}

impl Default for Calibration {
    fn default() -> Self {
        let fields = DEFAULT_CALIBRATION
            .split('_')
            .filter_map(|f| f.parse().ok())
            .collect();
        Self {
            raw: DEFAULT_CALIBRATION.to_string(),
            fields,
        }
    }
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
