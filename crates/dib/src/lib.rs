//! Device-independent bitmap (DIB) layout and packaging.
//!
//! A packaged bitmap is a `BITMAPINFOHEADER` record, an optional palette and
//! the raw pixel rows (bottom-to-top unless the header's height is negative). The file
//! variant prefixes the 14-byte `BITMAPFILEHEADER` preamble. All multi-byte
//! fields are little-endian regardless of the host.

mod header;
mod package;

use std::path::PathBuf;

use thiserror::Error;

pub use header::{
    size_of, BitmapInfo, BitmapInfoHeader, RgbQuad, BITMAP_MAGIC, FILE_HEADER_SIZE,
    INFO_HEADER_SIZE, RGB_QUAD_SIZE,
};
pub use package::{default_file_name, PackagedImage};

/// Bitmap packaging errors.
#[derive(Debug, Error)]
pub enum DibError {
    #[error("failed to create bitmap file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write bitmap file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bitmap of {0} bytes does not fit the 32-bit file size field")]
    TooLarge(u64),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, DibError>;
