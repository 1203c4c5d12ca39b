use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use stillgrab_lib::camera::dummy::{DummyBackend, DummyBehaviour};
use stillgrab_lib::camera::error::CaptureDiagnostic;
use stillgrab_lib::camera::types::{FormatRequest, PixelDepth};
use stillgrab_lib::capture::export::ImageFormat;
use stillgrab_lib::capture::session::{CaptureOptions, CaptureSession};
use stillgrab_lib::cli::Args;
use stillgrab_lib::settings::store::SettingsStore;
use tempfile::TempDir;

fn vga(depth: PixelDepth) -> CaptureOptions {
    CaptureOptions {
        request: FormatRequest {
            width: 640,
            height: 480,
            frame_interval: 0,
            pixel_depth: depth,
        },
        ..CaptureOptions::default()
    }
}

#[test]
fn captured_bitmap_file_has_header_and_full_frame() {
    let dir = TempDir::new().unwrap();
    let mut session = CaptureSession::new(Box::new(DummyBackend::new()), vga(PixelDepth::Rgb24));
    let frame = session.capture().unwrap();
    assert_eq!(frame.len(), 640 * 480 * 3);

    let path = dir.path().join(frame.default_file_name());
    frame.packaged().pack_to_file(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], b"BM");
    assert_eq!(bytes.len(), 14 + 40 + 640 * 480 * 3);
    let offset = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
    assert_eq!(offset, 54);
    let width = i32::from_le_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]);
    let height = i32::from_le_bytes([bytes[22], bytes[23], bytes[24], bytes[25]]);
    assert_eq!((width, height), (640, 480));
    assert_eq!(&bytes[54..], frame.pixels());
}

#[test]
fn panoramic_request_is_matched_at_fifteen_fps() {
    let mut session = CaptureSession::new(Box::new(DummyBackend::new()), CaptureOptions::default());
    let frame = session.capture().unwrap();
    let format = frame.format();
    assert_eq!((format.width, format.height), (3008, 1504));
    assert_eq!(format.frame_interval, 666_666);
    assert_eq!(frame.packaged().len(), 40 + 3008 * 1504 * 3);
}

#[test]
fn busy_camera_reports_zero_bytes() {
    let backend = DummyBackend::with_behaviour(DummyBehaviour::Busy);
    let mut session = CaptureSession::new(Box::new(backend), vga(PixelDepth::Rgb24));
    {
        let frame = session.capture().unwrap();
        assert_eq!(frame.len(), 0);
        assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::BusyDevice));
        assert_eq!(frame.packaged().len(), 40);
    }
    assert_eq!(session.grab(), 0);
}

#[test]
fn bounded_wait_returns_when_device_stalls() {
    let backend = DummyBackend::with_behaviour(DummyBehaviour::Stall);
    let mut session = CaptureSession::new(Box::new(backend), vga(PixelDepth::Rgb24));
    let frame = session.capture_within(Duration::from_millis(50)).unwrap();
    assert!(frame.is_empty());
    assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::TimedOut));
}

#[test]
fn argb_frame_exports_as_png() {
    let dir = TempDir::new().unwrap();
    let mut session = CaptureSession::new(Box::new(DummyBackend::new()), vga(PixelDepth::Argb32));
    let frame = session.capture().unwrap();
    let path = dir.path().join("frame.png");
    frame.save(&path, ImageFormat::Png, 90).unwrap();

    let decoded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (640, 480));
    // Top-left pixel comes from the last stored row: x = 0, y = 479
    assert_eq!(decoded.get_pixel(0, 0).0, [0x80, (479 % 256) as u8, 0]);
}

#[test]
fn flipped_capture_exports_the_same_orientation() {
    let dir = TempDir::new().unwrap();
    let save_capture = |flip: bool, name: &str| {
        let options = CaptureOptions {
            flip,
            ..vga(PixelDepth::Rgb24)
        };
        let mut session = CaptureSession::new(Box::new(DummyBackend::new()), options);
        let frame = session.capture().unwrap();
        assert_eq!(frame.header().is_top_down(), flip);
        let path = dir.path().join(name);
        frame.save(&path, ImageFormat::from_path(&path), 90).unwrap();
        path
    };

    let plain = save_capture(false, "plain.png");
    let flipped = save_capture(true, "flipped.png");
    let plain = image::open(&plain).unwrap().to_rgb8();
    let flipped = image::open(&flipped).unwrap().to_rgb8();
    assert_eq!(plain.get_pixel(0, 0), flipped.get_pixel(0, 0));
    assert_eq!(plain.get_pixel(0, 479), flipped.get_pixel(0, 479));

    // The bitmap header records top-down rows as a negative height
    let bmp = save_capture(true, "flipped.bmp");
    let bytes = std::fs::read(&bmp).unwrap();
    let height = i32::from_le_bytes([bytes[22], bytes[23], bytes[24], bytes[25]]);
    assert_eq!(height, -480);
    let offset = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]) as usize;
    // First stored row is now the top row of the scene (y = 479)
    assert_eq!(bytes[offset + 1], (479 % 256) as u8);
}

fn run_cli(dir: &TempDir, extra: &[&str], behaviour: DummyBehaviour) -> ExitCode {
    let config = dir.path().join("stillgrab.json");
    let mut argv = vec!["stillgrab", "--config", config.to_str().unwrap()];
    argv.extend_from_slice(extra);
    let args = Args::try_parse_from(argv).unwrap();
    stillgrab_lib::execute(&args, Box::new(DummyBackend::with_behaviour(behaviour))).unwrap()
}

#[test]
fn cli_grab_writes_the_output_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("shot.jpg");
    let code = run_cli(
        &dir,
        &["--width", "640", "--height", "480", "-o", output.to_str().unwrap()],
        DummyBehaviour::Deliver,
    );
    assert_eq!(code, ExitCode::SUCCESS);
    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[test]
fn cli_grab_on_busy_camera_fails() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("shot.bmp");
    let code = run_cli(
        &dir,
        &["--width", "640", "--height", "480", "-o", output.to_str().unwrap()],
        DummyBehaviour::Busy,
    );
    assert_eq!(code, ExitCode::FAILURE);
    assert!(!output.exists());
}

#[test]
fn cli_config_init_persists_overrides() {
    let dir = TempDir::new().unwrap();
    let code = run_cli(
        &dir,
        &["--depth", "32", "--fps", "30", "config", "init"],
        DummyBehaviour::Deliver,
    );
    assert_eq!(code, ExitCode::SUCCESS);

    let saved = SettingsStore::load(&dir.path().join("stillgrab.json")).unwrap();
    assert_eq!(saved.pixel_depth, PixelDepth::Argb32);
    assert_eq!(saved.fps, 30);
}
