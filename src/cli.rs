//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::camera::types::PixelDepth;
use crate::capture::export::ImageFormat;
use crate::settings::types::CaptureSettings;

/// Grab a single still frame from a video capture device
#[derive(Parser, Debug)]
#[command(name = "stillgrab")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Settings file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub capture: CaptureArgs,
}

/// Overrides for the persisted capture settings.
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct CaptureArgs {
    /// Requested frame width
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    pub height: Option<u32>,

    /// Requested frame rate (0 keeps the device's rate)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Bits per pixel: 24 or 32
    #[arg(long, value_parser = parse_depth)]
    pub depth: Option<PixelDepth>,

    /// Store rows top-down
    #[arg(long)]
    pub flip: bool,

    /// Output file (.bmp, .png or .jpg)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Output encoding, overriding the file extension
    #[arg(long, value_parser = parse_format)]
    pub format: Option<ImageFormat>,

    /// JPEG quality (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Calibration offset file
    #[arg(long)]
    pub calibration: Option<PathBuf>,
}

impl CaptureArgs {
    /// Layer these flags over `settings`.
    pub fn apply(&self, settings: &mut CaptureSettings) {
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(depth) = self.depth {
            settings.pixel_depth = depth;
        }
        if self.flip {
            settings.flip = true;
        }
        if let Some(output) = &self.output {
            settings.output = Some(output.clone());
        }
        if let Some(format) = self.format {
            settings.format = Some(format);
        }
        if let Some(quality) = self.quality {
            settings.jpeg_quality = quality;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.timeout_ms = Some(timeout);
        }
        if let Some(path) = &self.calibration {
            settings.calibration_path = Some(path.clone());
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Capture one frame (the default)
    Grab,
    /// List available cameras
    List,
    /// Show the stream capabilities of a camera
    Formats {
        /// Camera name or id (default: first camera)
        device: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write the effective configuration to the settings file
    Init,
}

fn parse_depth(s: &str) -> Result<PixelDepth, String> {
    let bits: u16 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a bit count"))?;
    PixelDepth::try_from(bits)
}

fn parse_format(s: &str) -> Result<ImageFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "bmp" => Ok(ImageFormat::Bmp),
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        other => Err(format!("unknown image format '{other}'")),
    }
}
