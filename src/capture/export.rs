use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

use crate::camera::error::{CaptureError, Result};
use crate::capture::transform::{bgr_to_rgb, row_stride};
use dib::PackagedImage;

/// On-disk encoding for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Raw DIB with a BM preamble, pixels exactly as captured.
    #[default]
    Bmp,
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Pick the encoding from the file extension; unknown extensions get a
    /// bitmap.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => Self::Png,
            Some("jpg" | "jpeg") => Self::Jpeg,
            _ => Self::Bmp,
        }
    }
}

/// Encode top-down RGB24 pixels as JPEG at `quality` (1-100).
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let img = rgb_image(rgb, width, height)?;
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| CaptureError::Export(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

/// Encode top-down RGB24 pixels as PNG.
pub fn encode_png(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let img = rgb_image(rgb, width, height)?;
    let mut buf = Vec::new();
    img.write_with_encoder(PngEncoder::new(&mut buf))
        .map_err(|e| CaptureError::Export(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

fn rgb_image(rgb: &[u8], width: u32, height: u32) -> Result<ImageBuffer<Rgb<u8>, &[u8]>> {
    ImageBuffer::from_raw(width, height, rgb).ok_or_else(|| {
        CaptureError::Export(format!(
            "{} bytes is not a {width}x{height} RGB image",
            rgb.len()
        ))
    })
}

/// Write `image` to `path` in `format`. Returns the bytes written.
pub fn write_image(
    image: &PackagedImage<'_>,
    path: &Path,
    format: ImageFormat,
    jpeg_quality: u8,
) -> Result<u64> {
    if format == ImageFormat::Bmp {
        image.pack_to_file(path)?;
        return Ok(image.file_size() as u64);
    }

    let header = image.info().header();
    let width = header.width.unsigned_abs();
    let height = header.height.unsigned_abs();
    let bytes_per_pixel = usize::from(header.bit_count / 8);
    let stride = row_stride(
        image.pixels().len(),
        width as usize,
        height as usize,
        bytes_per_pixel,
        header.stride(),
    );
    let rgb = bgr_to_rgb(
        image.pixels(),
        width as usize,
        height as usize,
        bytes_per_pixel,
        stride,
        !header.is_top_down(),
    );
    if rgb.is_empty() {
        return Err(CaptureError::Export(format!(
            "captured buffer of {} bytes is smaller than a {width}x{height} frame",
            image.pixels().len()
        )));
    }

    let encoded = match format {
        ImageFormat::Png => encode_png(&rgb, width, height)?,
        _ => encode_jpeg(&rgb, width, height, jpeg_quality)?,
    };
    std::fs::write(path, &encoded)
        .map_err(|e| CaptureError::Export(format!("failed to write {}: {e}", path.display())))?;
    Ok(encoded.len() as u64)
}
