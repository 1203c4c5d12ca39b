// Settings domain: persisted capture settings and the calibration offset.

pub mod calibration;
pub mod store;
pub mod types;

use std::path::PathBuf;

use thiserror::Error;

/// Settings and calibration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise settings: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid calibration offset: {0}")]
    Calibration(String),
}
