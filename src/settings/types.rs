use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::camera::types::{frame_interval_from_fps, FormatRequest, PixelDepth};
use crate::capture::export::ImageFormat;
use crate::capture::session::CaptureOptions;
use crate::capture::slot::DEFAULT_MAX_FRAME_BYTES;

/// Settings file contents. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    /// Requested frame rate; 0 keeps the matched capability's own rate.
    pub fps: u32,
    pub pixel_depth: PixelDepth,
    /// Store rows top-down instead of the device's bottom-up order.
    pub flip: bool,
    /// Output file. Unset means `BitmapNNNNN.bmp` in the working directory.
    pub output: Option<PathBuf>,
    /// Encoding override; otherwise chosen from the output extension.
    pub format: Option<ImageFormat>,
    pub jpeg_quality: u8,
    /// Give up on the device after this many milliseconds.
    pub timeout_ms: Option<u64>,
    /// Calibration offset file for panoramic blending.
    pub calibration_path: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 3008,
            height: 1504,
            fps: 15,
            pixel_depth: PixelDepth::Rgb24,
            flip: false,
            output: None,
            format: None,
            jpeg_quality: 90,
            timeout_ms: None,
            calibration_path: None,
        }
    }
}

impl CaptureSettings {
    pub fn capture_options(&self) -> CaptureOptions {
        let frame_interval = if self.fps == 0 {
            0
        } else {
            frame_interval_from_fps(self.fps)
        };
        CaptureOptions {
            request: FormatRequest {
                width: self.width,
                height: self.height,
                frame_interval,
                pixel_depth: self.pixel_depth,
            },
            flip: self.flip,
            wait: self.timeout_ms.map(Duration::from_millis),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
