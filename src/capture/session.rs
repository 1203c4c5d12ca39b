use parking_lot::MutexGuard;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::camera::backend::CaptureBackend;
use crate::camera::error::{CaptureDiagnostic, Result};
use crate::camera::negotiate::{negotiate, NegotiationOutcome};
use crate::camera::types::{
    frame_interval_from_fps, CameraDevice, CaptureFormat, FormatRequest, PixelDepth,
};
use crate::capture::export::{self, ImageFormat};
use crate::capture::graph::{NodeRole, PinRef, PipelineGraph, RunOutcome};
use crate::capture::slot::{DeliveryError, FrameSlot, SlotState, DEFAULT_MAX_FRAME_BYTES};
use crate::capture::transform::{flip_rows, row_stride};
use crate::diagnostics::stats::DeliverySnapshot;
use dib::{BitmapInfo, BitmapInfoHeader, PackagedImage};

/// Per-session capture parameters.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub request: FormatRequest,
    /// Reverse row order after capture, producing a top-down image whose
    /// header carries a negative height.
    pub flip: bool,
    /// Bound on how long [`CaptureSession::capture`] blocks. `None` waits
    /// for the device however long it takes.
    pub wait: Option<Duration>,
    pub max_frame_bytes: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            request: FormatRequest {
                width: 3008,
                height: 1504,
                frame_interval: frame_interval_from_fps(15),
                pixel_depth: PixelDepth::Rgb24,
            },
            flip: false,
            wait: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Single-shot capture against the first usable device.
///
/// Owns the frame slot shared with the delivery callback. Each capture
/// rebuilds the pipeline; the slot's buffer is reused across captures.
pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    options: CaptureOptions,
    slot: Arc<FrameSlot>,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, options: CaptureOptions) -> Self {
        let slot = Arc::new(FrameSlot::with_max_frame_bytes(options.max_frame_bytes));
        Self {
            backend,
            options,
            slot,
        }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn backend(&self) -> &dyn CaptureBackend {
        self.backend.as_ref()
    }

    /// Capture one frame, waiting as configured in [`CaptureOptions::wait`].
    pub fn capture(&mut self) -> Result<CapturedFrame<'_>> {
        let wait = self.options.wait;
        self.capture_with(wait)
    }

    /// Capture one frame, giving up after `timeout`.
    pub fn capture_within(&mut self, timeout: Duration) -> Result<CapturedFrame<'_>> {
        self.capture_with(Some(timeout))
    }

    /// Capture and report only the byte count: zero on any failure.
    pub fn grab(&mut self) -> usize {
        match self.capture() {
            Ok(frame) => frame.len(),
            Err(e) => {
                error!("Capture failed: {e}");
                0
            }
        }
    }

    fn capture_with(&mut self, wait: Option<Duration>) -> Result<CapturedFrame<'_>> {
        let request = self.options.request;
        self.slot.arm();

        let device = self.backend.locate()?;
        let device_info = device.info().clone();
        info!("Capturing from '{}'", device_info.name);

        let mut graph = PipelineGraph::build(device.as_ref())?;
        graph.request_format(request.pixel_depth)?;
        let negotiation = negotiate(device.as_ref(), &request);

        graph.connect(
            PinRef::output(NodeRole::Source),
            PinRef::input(NodeRole::Grabber),
        )?;

        let mut format = negotiation.format;
        if let Some(geometry) = graph.connected_geometry() {
            if (geometry.width, geometry.height) != (format.width, format.height) {
                debug!(
                    "Connected media type is {}x{}, negotiated {}x{}",
                    geometry.width, geometry.height, format.width, format.height
                );
            }
            format.width = geometry.width;
            format.height = geometry.height;
        }

        graph.render(PinRef::output(NodeRole::Grabber))?;

        let outcome = graph.run(&self.slot, wait)?;
        // No deliveries reach the slot after this point
        graph.teardown();
        drop(graph);

        if let RunOutcome::Aborted(reason) = &outcome {
            warn!("Capture graph aborted: {reason}");
        }

        let mut state = self.slot.lock();
        let diagnostic = diagnose(&state, &outcome);
        match diagnostic {
            Some(d) => warn!("{}", d.message()),
            None => info!("Captured {} bytes at {format}", state.buffer().len()),
        }

        let mut header =
            BitmapInfoHeader::new(format.width, format.height, format.pixel_depth.bits());
        if self.options.flip && !state.buffer().is_empty() {
            let buffer = state.buffer_mut();
            let stride = row_stride(
                buffer.len(),
                format.width as usize,
                format.height as usize,
                format.pixel_depth.bytes_per_pixel(),
                header.stride(),
            );
            if flip_rows(buffer.as_mut_slice(), stride, format.height as usize) {
                header = header.top_down();
            } else {
                warn!("Sample of {} bytes is too small to flip", buffer.len());
            }
        }

        let stats = state.stats();
        Ok(CapturedFrame {
            state,
            info: BitmapInfo::new(header),
            format,
            device: device_info,
            negotiation: negotiation.outcome,
            diagnostic,
            stats,
        })
    }
}

/// Why a finished run left the slot empty, if it did.
fn diagnose(state: &SlotState, outcome: &RunOutcome) -> Option<CaptureDiagnostic> {
    if !state.buffer().is_empty() {
        return None;
    }
    let diagnostic = match (state.last_error(), outcome) {
        (Some(DeliveryError::OutOfMemory(_)), _) => CaptureDiagnostic::OutOfMemory,
        (_, RunOutcome::TimedOut) => CaptureDiagnostic::TimedOut,
        _ => CaptureDiagnostic::BusyDevice,
    };
    Some(diagnostic)
}

/// The result of one capture, borrowing the session's frame buffer.
///
/// An empty frame is still a successful capture: [`CapturedFrame::diagnostic`]
/// says why no pixels arrived.
pub struct CapturedFrame<'a> {
    state: MutexGuard<'a, SlotState>,
    info: BitmapInfo,
    format: CaptureFormat,
    device: CameraDevice,
    negotiation: NegotiationOutcome,
    diagnostic: Option<CaptureDiagnostic>,
    stats: DeliverySnapshot,
}

impl CapturedFrame<'_> {
    pub fn pixels(&self) -> &[u8] {
        self.state.buffer().as_slice()
    }

    /// Captured byte count; zero when the capture failed.
    pub fn len(&self) -> usize {
        self.state.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.buffer().is_empty()
    }

    /// Device sample time in seconds.
    pub fn timestamp(&self) -> f64 {
        self.state.buffer().timestamp()
    }

    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    pub fn info(&self) -> &BitmapInfo {
        &self.info
    }

    pub fn header(&self) -> &BitmapInfoHeader {
        self.info.header()
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn negotiation(&self) -> NegotiationOutcome {
        self.negotiation
    }

    pub fn diagnostic(&self) -> Option<CaptureDiagnostic> {
        self.diagnostic
    }

    pub fn stats(&self) -> &DeliverySnapshot {
        &self.stats
    }

    /// Header and pixels as one bitmap, borrowing this frame.
    pub fn packaged(&self) -> PackagedImage<'_> {
        PackagedImage::new(&self.info, self.pixels())
    }

    /// `BitmapNNNNN.bmp` after this frame's sample time.
    pub fn default_file_name(&self) -> String {
        dib::default_file_name(self.timestamp())
    }

    /// Write the frame to `path`, encoded according to `format`.
    pub fn save(&self, path: &Path, format: ImageFormat, jpeg_quality: u8) -> Result<u64> {
        let written = export::write_image(&self.packaged(), path, format, jpeg_quality)?;
        info!("Wrote {written} bytes to {}", path.display());
        Ok(written)
    }

    pub fn report(&self, output: Option<PathBuf>) -> CaptureReport {
        CaptureReport {
            device: self.device.name.clone(),
            format: self.format,
            negotiation: self.negotiation,
            bytes: self.len(),
            diagnostic: self.diagnostic,
            message: self.diagnostic.map(|d| d.message().to_string()),
            output,
            stats: self.stats.clone(),
        }
    }
}

/// Serialisable summary of one capture.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    pub device: String,
    pub format: CaptureFormat,
    pub negotiation: NegotiationOutcome,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<CaptureDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub stats: DeliverySnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::backend::NullBackend;
    use crate::camera::dummy::{DummyBackend, DummyBehaviour, DummyConfig};
    use crate::camera::error::CaptureError;

    fn session(backend: DummyBackend, options: CaptureOptions) -> CaptureSession {
        CaptureSession::new(Box::new(backend), options)
    }

    fn small_request() -> CaptureOptions {
        CaptureOptions {
            request: FormatRequest {
                width: 640,
                height: 480,
                frame_interval: 0,
                pixel_depth: PixelDepth::Rgb24,
            },
            ..CaptureOptions::default()
        }
    }

    #[test]
    fn capture_negotiates_requested_format() {
        let mut session = session(DummyBackend::new(), CaptureOptions::default());
        let frame = session.capture().unwrap();

        assert_eq!(frame.negotiation(), NegotiationOutcome::Matched { index: 1 });
        assert_eq!(frame.format().width, 3008);
        assert_eq!(frame.format().height, 1504);
        assert_eq!(frame.format().frame_interval, 666_666);
        assert_eq!(frame.len(), 3008 * 1504 * 3);
        assert!(frame.diagnostic().is_none());
    }

    #[test]
    fn header_carries_connected_geometry() {
        let mut session = session(DummyBackend::new(), small_request());
        let frame = session.capture().unwrap();
        let header = frame.header();
        assert_eq!(header.width, 640);
        assert_eq!(header.height, 480);
        assert_eq!(header.planes, 1);
        assert_eq!(header.bit_count, 24);
        assert_eq!(frame.packaged().len(), 40 + 640 * 480 * 3);
    }

    #[test]
    fn unmatched_request_uses_device_default() {
        let options = CaptureOptions {
            request: FormatRequest {
                width: 1920,
                height: 1080,
                frame_interval: frame_interval_from_fps(30),
                pixel_depth: PixelDepth::Rgb24,
            },
            ..CaptureOptions::default()
        };
        let mut session = session(DummyBackend::new(), options);
        let frame = session.capture().unwrap();
        assert_eq!(frame.negotiation(), NegotiationOutcome::DeviceDefault);
        assert_eq!((frame.format().width, frame.format().height), (640, 480));
    }

    #[test]
    fn busy_device_is_an_empty_success() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::Busy);
        let mut session = session(backend, small_request());
        let frame = session.capture().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::BusyDevice));
    }

    #[test]
    fn null_sample_reads_as_busy() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::NullSample);
        let mut session = session(backend, small_request());
        let frame = session.capture().unwrap();
        assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::BusyDevice));
        assert_eq!(frame.stats().rejected_count, 1);
    }

    #[test]
    fn refused_run_reads_as_busy() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::RefuseRun);
        let mut session = session(backend, small_request());
        assert_eq!(session.grab(), 0);
    }

    #[test]
    fn oversized_sample_is_out_of_memory() {
        let options = CaptureOptions {
            max_frame_bytes: 1024,
            ..small_request()
        };
        let mut session = session(DummyBackend::new(), options);
        let frame = session.capture().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::OutOfMemory));
    }

    #[test]
    fn stalled_device_times_out() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::Stall);
        let mut session = session(backend, small_request());
        let frame = session.capture_within(Duration::from_millis(30)).unwrap();
        assert_eq!(frame.diagnostic(), Some(CaptureDiagnostic::TimedOut));
    }

    #[test]
    fn connection_failure_is_an_error() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::FailConnect);
        let mut session = session(backend, small_request());
        let err = session.capture().err().unwrap();
        assert!(matches!(err, CaptureError::Connection(_)));
    }

    #[test]
    fn missing_device_is_not_found() {
        let mut session = CaptureSession::new(Box::new(NullBackend), CaptureOptions::default());
        let err = session.capture().err().unwrap();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        assert_eq!(session.grab(), 0);
    }

    #[test]
    fn missing_stream_config_captures_at_connected_size() {
        let backend = DummyBackend::with_config(DummyConfig {
            stream_config: false,
            ..DummyConfig::default()
        });
        let mut session = session(backend, CaptureOptions::default());
        let frame = session.capture().unwrap();
        assert_eq!(frame.negotiation(), NegotiationOutcome::Skipped);
        assert_eq!((frame.format().width, frame.format().height), (640, 480));
        assert_eq!(frame.len(), 640 * 480 * 3);
    }

    #[test]
    fn flip_makes_the_frame_top_down() {
        let options = CaptureOptions {
            flip: true,
            ..small_request()
        };
        let mut session = session(DummyBackend::new(), options);
        let frame = session.capture().unwrap();
        let stride = 640 * 3;
        // The first stored row was the bottom (y = 0) row
        assert_eq!(frame.pixels()[1], (479 % 256) as u8);
        assert_eq!(frame.pixels()[frame.len() - stride + 1], 0);
        assert!(frame.header().is_top_down());
        assert_eq!(frame.header().height, -480);
    }

    #[test]
    fn unflipped_header_is_bottom_up() {
        let mut session = session(DummyBackend::new(), small_request());
        let frame = session.capture().unwrap();
        assert!(!frame.header().is_top_down());
    }

    #[test]
    fn flip_on_empty_frame_keeps_bottom_up_header() {
        let options = CaptureOptions {
            flip: true,
            ..small_request()
        };
        let backend = DummyBackend::with_behaviour(DummyBehaviour::Busy);
        let mut session = session(backend, options);
        let frame = session.capture().unwrap();
        assert_eq!(frame.header().height, 480);
    }

    #[test]
    fn argb_capture_has_four_bytes_per_pixel() {
        let options = CaptureOptions {
            request: FormatRequest {
                pixel_depth: PixelDepth::Argb32,
                ..small_request().request
            },
            ..small_request()
        };
        let mut session = session(DummyBackend::new(), options);
        let frame = session.capture().unwrap();
        assert_eq!(frame.header().bit_count, 32);
        assert_eq!(frame.len(), 640 * 480 * 4);
    }

    #[test]
    fn sequential_captures_reuse_the_session() {
        let mut session = session(DummyBackend::new(), small_request());
        assert_eq!(session.grab(), 640 * 480 * 3);
        assert_eq!(session.grab(), 640 * 480 * 3);
    }

    #[test]
    fn report_serialises_diagnostic_message() {
        let backend = DummyBackend::with_behaviour(DummyBehaviour::Busy);
        let mut session = session(backend, small_request());
        let frame = session.capture().unwrap();
        let json = serde_json::to_value(frame.report(None)).unwrap();
        assert_eq!(json["bytes"], 0);
        assert_eq!(json["diagnostic"], "busy_device");
        assert!(json["message"].as_str().unwrap().contains("busy"));
        assert!(json.get("output").is_none());
    }
}
