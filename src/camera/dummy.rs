use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::camera::backend::{CaptureBackend, CaptureDevice};
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{frame_interval_from_fps, CameraDevice, FormatCapability, PixelDepth};
use crate::capture::graph::{FrameGeometry, GraphRuntime, NodeRole, PinRef, RunOutcome};
use crate::capture::slot::{FrameSlot, WaitResult};

const DUMMY_DEVICE_NAME: &str = "Dummy Test Camera";
const DUMMY_DEVICE_PATH: &str = "dummy://test-camera";

/// Delay before the simulated stream delivers its sample.
const FIRST_SAMPLE_DELAY: Duration = Duration::from_millis(5);

/// How the simulated stream behaves once the graph runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DummyBehaviour {
    /// One sample, then end of stream.
    #[default]
    Deliver,
    /// End of stream without a sample, as when another process holds the
    /// device.
    Busy,
    /// Nothing at all until the graph is stopped.
    Stall,
    /// A null sample pointer, then end of stream.
    NullSample,
    /// A full sample followed by a half-size one.
    DeliverTwice,
    /// The graph refuses to start.
    RefuseRun,
    /// No converter exists between source and grabber.
    FailConnect,
}

/// Static description of the simulated device.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub capabilities: Vec<FormatCapability>,
    /// Capability the device starts configured with.
    pub default_index: usize,
    /// Whether the source exposes stream configuration at all.
    pub stream_config: bool,
    pub behaviour: DummyBehaviour,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            capabilities: vec![
                FormatCapability {
                    width: 640,
                    height: 480,
                    frame_interval: frame_interval_from_fps(30),
                    pixel_format: "YUY2".to_string(),
                },
                FormatCapability {
                    width: 3008,
                    height: 1504,
                    frame_interval: 0,
                    pixel_format: "MJPG".to_string(),
                },
            ],
            default_index: 0,
            stream_config: true,
            behaviour: DummyBehaviour::Deliver,
        }
    }
}

/// A fake capture backend for running without real hardware.
///
/// Serves one device whose graph delivers a synthetic gradient frame from a
/// background thread, exactly like a grabber callback would.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
pub struct DummyBackend {
    config: DummyConfig,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        Self { config }
    }

    pub fn with_behaviour(behaviour: DummyBehaviour) -> Self {
        Self::with_config(DummyConfig {
            behaviour,
            ..DummyConfig::default()
        })
    }

    /// Whether the dummy camera is enabled via environment variable.
    pub fn is_enabled() -> bool {
        std::env::var("DUMMY_CAMERA").is_ok_and(|v| v == "1" || v == "true")
    }

    pub fn device() -> CameraDevice {
        CameraDevice::new(DUMMY_DEVICE_NAME, DUMMY_DEVICE_PATH)
    }

    /// Bottom-up gradient sample: blue follows x, green follows y, rows
    /// padded to 4 bytes.
    pub fn test_frame(width: u32, height: u32, depth: PixelDepth) -> Vec<u8> {
        let bpp = depth.bytes_per_pixel();
        let stride = dib::BitmapInfoHeader::new(width, height, depth.bits()).stride();
        let mut frame = vec![0u8; stride * height as usize];
        for (y, row) in frame.chunks_exact_mut(stride).enumerate() {
            for (x, px) in row[..width as usize * bpp].chunks_exact_mut(bpp).enumerate() {
                px[0] = x as u8;
                px[1] = y as u8;
                px[2] = 0x80;
                if bpp == 4 {
                    px[3] = 0xFF;
                }
            }
        }
        frame
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![Self::device()])
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CaptureDevice>> {
        if device.device_path != DUMMY_DEVICE_PATH {
            return Err(CaptureError::DeviceNotFound(device.name.clone()));
        }
        Ok(Box::new(DummyDevice {
            info: device.clone(),
            config: self.config.clone(),
            applied: Arc::new(Mutex::new(None)),
        }))
    }
}

struct DummyDevice {
    info: CameraDevice,
    config: DummyConfig,
    applied: Arc<Mutex<Option<FormatCapability>>>,
}

impl CaptureDevice for DummyDevice {
    fn info(&self) -> &CameraDevice {
        &self.info
    }

    fn stream_capabilities(&self) -> Result<Vec<FormatCapability>> {
        if !self.config.stream_config {
            return Err(CaptureError::FormatQuery(
                "no stream configuration".to_string(),
            ));
        }
        Ok(self.config.capabilities.clone())
    }

    fn current_format(&self) -> Result<FormatCapability> {
        if !self.config.stream_config {
            return Err(CaptureError::FormatQuery(
                "no stream configuration".to_string(),
            ));
        }
        if let Some(applied) = self.applied.lock().clone() {
            return Ok(applied);
        }
        self.config
            .capabilities
            .get(self.config.default_index)
            .cloned()
            .ok_or_else(|| CaptureError::FormatQuery("no default format".to_string()))
    }

    fn apply_format(&self, index: usize, format: &FormatCapability) -> Result<()> {
        if index >= self.config.capabilities.len() {
            return Err(CaptureError::FormatQuery(format!(
                "capability {index} out of range"
            )));
        }
        *self.applied.lock() = Some(format.clone());
        Ok(())
    }

    fn create_graph(&self) -> Result<Box<dyn GraphRuntime>> {
        let fallback = match self.config.capabilities.get(self.config.default_index) {
            Some(cap) if self.config.stream_config => FrameGeometry {
                width: cap.width,
                height: cap.height,
            },
            _ => FrameGeometry {
                width: 640,
                height: 480,
            },
        };
        Ok(Box::new(DummyGraph {
            source_format: Arc::clone(&self.applied),
            fallback,
            geometry: None,
            behaviour: self.config.behaviour,
            depth: PixelDepth::default(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct DummyGraph {
    /// Format last applied to the source; read when the pins connect.
    source_format: Arc<Mutex<Option<FormatCapability>>>,
    fallback: FrameGeometry,
    geometry: Option<FrameGeometry>,
    behaviour: DummyBehaviour,
    depth: PixelDepth,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DummyGraph {
    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("Dummy stream thread panicked");
            }
        }
    }
}

impl GraphRuntime for DummyGraph {
    fn add_node(&mut self, _role: NodeRole) -> Result<()> {
        Ok(())
    }

    fn set_grab_format(&mut self, depth: PixelDepth) -> Result<()> {
        self.depth = depth;
        Ok(())
    }

    fn connect(&mut self, output: PinRef, input: PinRef) -> Result<()> {
        if self.behaviour == DummyBehaviour::FailConnect {
            return Err(CaptureError::Connection(format!(
                "{output} -> {input}: no converter for {} video",
                self.depth
            )));
        }
        let applied = self.source_format.lock().clone();
        self.geometry = Some(applied.map_or(self.fallback, |cap| FrameGeometry {
            width: cap.width,
            height: cap.height,
        }));
        Ok(())
    }

    fn render(&mut self, _output: PinRef) -> Result<()> {
        Ok(())
    }

    fn connected_geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    fn run(&mut self, slot: Arc<FrameSlot>, wait: Option<Duration>) -> Result<RunOutcome> {
        if self.behaviour == DummyBehaviour::RefuseRun {
            return Ok(RunOutcome::Aborted("device refused to start".to_string()));
        }

        let geometry = self.geometry.unwrap_or(self.fallback);
        let behaviour = self.behaviour;
        let frame = DummyBackend::test_frame(geometry.width, geometry.height, self.depth);
        let stop = Arc::clone(&self.stop);
        let producer = Arc::clone(&slot);
        let started = Instant::now();

        let handle = std::thread::Builder::new()
            .name("dummy-stream".to_string())
            .spawn(move || {
                std::thread::sleep(FIRST_SAMPLE_DELAY);
                let now = || started.elapsed().as_secs_f64();
                match behaviour {
                    DummyBehaviour::Deliver => {
                        let _ = producer.deliver(now(), Some(&frame));
                    }
                    DummyBehaviour::DeliverTwice => {
                        let _ = producer.deliver(now(), Some(&frame));
                        let _ = producer.deliver(now(), Some(&frame[..frame.len() / 2]));
                    }
                    DummyBehaviour::NullSample => {
                        let _ = producer.deliver(now(), None);
                    }
                    DummyBehaviour::Stall => {
                        while !stop.load(Ordering::Relaxed) {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        return;
                    }
                    DummyBehaviour::Busy
                    | DummyBehaviour::RefuseRun
                    | DummyBehaviour::FailConnect => {}
                }
                producer.complete();
            })
            .map_err(|e| CaptureError::Run(format!("failed to spawn stream thread: {e}")))?;
        self.worker = Some(handle);

        let outcome = match slot.wait(wait) {
            WaitResult::TimedOut => {
                self.stop.store(true, Ordering::Relaxed);
                RunOutcome::TimedOut
            }
            WaitResult::Delivered | WaitResult::Completed => RunOutcome::Completed,
        };
        // Stopping the graph waits for the streaming thread
        self.join_worker();
        Ok(outcome)
    }

    fn teardown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.join_worker();
    }
}
