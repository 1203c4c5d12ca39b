use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::header::{BitmapInfo, BITMAP_MAGIC, FILE_HEADER_SIZE};
use crate::{DibError, Result};

/// A header paired with a borrowed pixel payload.
///
/// The pixels usually live in a capture buffer; the packaged form is only
/// materialised by [`PackagedImage::pack_in_memory`] or written out by
/// [`PackagedImage::pack_to_file`].
#[derive(Debug, Clone, Copy)]
pub struct PackagedImage<'a> {
    info: &'a BitmapInfo,
    pixels: &'a [u8],
}

impl<'a> PackagedImage<'a> {
    pub fn new(info: &'a BitmapInfo, pixels: &'a [u8]) -> Self {
        Self { info, pixels }
    }

    pub fn info(&self) -> &'a BitmapInfo {
        self.info
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// Size of the in-memory package: header (with palette) plus pixels.
    pub fn len(&self) -> usize {
        self.info.size_of() + self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Offset of the first pixel byte in the file variant.
    pub fn pixel_data_offset(&self) -> usize {
        FILE_HEADER_SIZE as usize + self.info.size_of()
    }

    /// Total size of the file variant.
    pub fn file_size(&self) -> usize {
        FILE_HEADER_SIZE as usize + self.len()
    }

    /// Header then pixels in one contiguous allocation.
    pub fn pack_in_memory(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len());
        self.write_packed(&mut out)?;
        Ok(out)
    }

    /// Write header and pixels (no file preamble).
    pub fn write_packed<W: Write>(&self, mut out: W) -> io::Result<()> {
        self.info.write_to(&mut out)?;
        out.write_all(self.pixels)
    }

    /// Write the file preamble followed by the packed bitmap.
    pub fn write_file<W: Write>(&self, mut out: W) -> io::Result<()> {
        let total = u32::try_from(self.file_size())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bitmap too large"))?;
        let offset = self.pixel_data_offset() as u32;

        let mut preamble = [0u8; FILE_HEADER_SIZE as usize];
        preamble[0..2].copy_from_slice(&BITMAP_MAGIC);
        preamble[2..6].copy_from_slice(&total.to_le_bytes());
        // bytes 6..10 are the two reserved words
        preamble[10..14].copy_from_slice(&offset.to_le_bytes());

        out.write_all(&preamble)?;
        self.write_packed(&mut out)
    }

    /// Create (or truncate) `path` and write the file variant to it.
    pub fn pack_to_file(&self, path: &Path) -> Result<()> {
        let size = self.file_size() as u64;
        if size > u64::from(u32::MAX) {
            return Err(DibError::TooLarge(size));
        }

        let file = File::create(path).map_err(|source| DibError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        let mut out = BufWriter::new(file);
        self.write_file(&mut out)
            .and_then(|()| out.flush())
            .map_err(|source| DibError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// `BitmapNNNNN.bmp`, named after the sample time in milliseconds.
pub fn default_file_name(sample_time_secs: f64) -> String {
    format!("Bitmap{:05}.bmp", (sample_time_secs * 1000.0) as i64)
}
