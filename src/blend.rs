//! Seam to the panoramic blending engine.
//!
//! The engine itself is an external component. This module defines what it
//! is handed: a top-down 4-channel frame plus the calibration offset string.

use thiserror::Error;

use crate::camera::types::PixelDepth;
use crate::capture::transform::{expand_rgb_to_rgba, flip_vertical};

#[derive(Debug, Error)]
pub enum BlendError {
    #[error("frame of {actual} bytes does not match {width}x{height} at 4 bytes per pixel")]
    InputSize {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("blender failed: {0}")]
    Engine(String),
}

/// One blending job.
#[derive(Debug, Clone, Copy)]
pub struct BlendRequest<'a> {
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    /// Top-down 4-channel pixels.
    pub input: &'a [u8],
    /// Underscore-separated lens offset, passed through verbatim.
    pub calibration: &'a str,
}

impl BlendRequest<'_> {
    /// Bytes the blender writes for this request.
    pub fn output_len(&self) -> usize {
        self.output_width as usize * self.output_height as usize * 4
    }
}

/// A panoramic blending engine.
///
/// The crate ships no engine; library consumers implement this trait and
/// feed it through [`blend_frame`] with a captured frame and the
/// [`Calibration`](crate::settings::calibration::Calibration) string.
pub trait PanoramaBlender {
    /// Blend `request.input` into `output`, which holds
    /// [`BlendRequest::output_len`] bytes.
    fn blend(&self, request: &BlendRequest<'_>, output: &mut [u8]) -> Result<(), BlendError>;
}

/// Turn a captured bottom-up frame into blender input.
///
/// 24-bit frames are expanded to 4 channels with opaque alpha; 32-bit frames
/// are copied. Rows are then flipped to top-down order.
pub fn prepare_input(
    pixels: &[u8],
    width: u32,
    height: u32,
    depth: PixelDepth,
) -> Result<Vec<u8>, BlendError> {
    let pixel_count = width as usize * height as usize;
    let mut rgba = match depth {
        PixelDepth::Rgb24 => expand_rgb_to_rgba(pixels),
        PixelDepth::Argb32 => pixels.to_vec(),
    };
    if rgba.len() != pixel_count * 4 {
        return Err(BlendError::InputSize {
            width,
            height,
            actual: rgba.len(),
        });
    }
    flip_vertical(&mut rgba, width as usize, height as usize, 4);
    Ok(rgba)
}

/// Run `blender` over a captured frame and return the blended 4-channel image.
pub fn blend_frame(
    blender: &dyn PanoramaBlender,
    pixels: &[u8],
    width: u32,
    height: u32,
    depth: PixelDepth,
    calibration: &str,
) -> Result<Vec<u8>, BlendError> {
    let input = prepare_input(pixels, width, height, depth)?;
    let request = BlendRequest {
        input_width: width,
        input_height: height,
        output_width: width,
        output_height: height,
        input: &input,
        calibration,
    };
    let mut output = vec![0u8; request.output_len()];
    blender.blend(&request, &mut output)?;
    tracing::debug!("Blended {width}x{height} frame");
    Ok(output)
}
