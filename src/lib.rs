pub mod blend;
pub mod camera;
pub mod capture;
pub mod cli;
pub mod diagnostics;
pub mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use camera::backend::CaptureBackend;
use camera::error::CaptureError;
use capture::export::ImageFormat;
use capture::session::CaptureSession;
use cli::{Args, Command, ConfigAction};
use settings::calibration::{default_calibration_path, Calibration};
use settings::store::{default_settings_path, SettingsStore};
use settings::types::CaptureSettings;
use settings::ConfigError;

/// Top-level failure of a CLI command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Create the capture backend for the current platform.
///
/// When `DUMMY_CAMERA=1` is set, a simulated camera is used instead.
pub fn create_backend() -> Box<dyn CaptureBackend> {
    if camera::dummy::DummyBackend::is_enabled() {
        info!("Using dummy camera");
        return Box::new(camera::dummy::DummyBackend::new());
    }

    #[cfg(target_os = "windows")]
    {
        Box::new(camera::platform::WindowsBackend::new())
    }

    #[cfg(not(target_os = "windows"))]
    {
        Box::new(camera::backend::NullBackend)
    }
}

fn init_logging(debug: bool) {
    let log_level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// CLI entry point.
pub fn run() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match execute(&args, create_backend()) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the command selected by `args` against `backend`.
pub fn execute(args: &Args, backend: Box<dyn CaptureBackend>) -> Result<ExitCode, AppError> {
    let store = match args.config.clone().or_else(default_settings_path) {
        Some(path) => Some(SettingsStore::open(path)?),
        None => None,
    };
    let mut settings = store.as_ref().map(SettingsStore::get).unwrap_or_default();
    args.capture.apply(&mut settings);

    match args.command.clone().unwrap_or(Command::Grab) {
        Command::Grab => grab(args, backend, &settings),
        Command::List => {
            let devices = camera::commands::list_cameras(backend.as_ref())?;
            if args.json {
                print_json(&devices)?;
            } else if devices.is_empty() {
                println!("No video capture devices found");
            } else {
                for device in &devices {
                    println!("{}\t{}", device.name, device.device_path);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Formats { device } => {
            let formats =
                camera::commands::get_camera_formats(backend.as_ref(), device.as_deref())?;
            if args.json {
                print_json(&formats)?;
            } else {
                println!("{}", formats.device.name);
                for (i, cap) in formats.capabilities.iter().enumerate() {
                    let marker = if formats.current.as_ref() == Some(cap) {
                        '*'
                    } else {
                        ' '
                    };
                    println!("{marker} {i:>3}: {cap}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => config(args, action, store.as_ref(), settings),
    }
}

fn grab(
    args: &Args,
    backend: Box<dyn CaptureBackend>,
    settings: &CaptureSettings,
) -> Result<ExitCode, AppError> {
    let mut session = CaptureSession::new(backend, settings.capture_options());
    let frame = session.capture()?;

    if frame.is_empty() {
        if args.json {
            print_json(&frame.report(None))?;
        }
        return Ok(ExitCode::FAILURE);
    }

    let path = settings
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(frame.default_file_name()));
    let format = settings
        .format
        .unwrap_or_else(|| ImageFormat::from_path(&path));
    frame.save(&path, format, settings.jpeg_quality)?;

    if args.json {
        print_json(&frame.report(Some(path)))?;
    } else {
        println!("{} bytes -> {}", frame.len(), path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EffectiveConfig<'a> {
    settings_file: Option<&'a std::path::Path>,
    settings: &'a CaptureSettings,
    calibration: String,
}

fn config(
    args: &Args,
    action: ConfigAction,
    store: Option<&SettingsStore>,
    settings: CaptureSettings,
) -> Result<ExitCode, AppError> {
    match action {
        ConfigAction::Show => {
            let calibration_path = settings
                .calibration_path
                .clone()
                .or_else(default_calibration_path);
            let calibration = Calibration::load_or_default(calibration_path.as_deref());
            let effective = EffectiveConfig {
                settings_file: store.map(SettingsStore::path),
                settings: &settings,
                calibration: calibration.to_string(),
            };
            if args.json {
                print_json(&effective)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&effective)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigAction::Init => {
            let Some(store) = store else {
                error!("No settings file location; pass --config");
                return Ok(ExitCode::FAILURE);
            };
            store.update(|s| *s = settings);
            store.save()?;
            println!("Wrote {}", store.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
