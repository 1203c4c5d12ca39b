use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{CameraDevice, FormatCapability};
use crate::capture::graph::GraphRuntime;

/// Platform-agnostic capture backend.
///
/// Implemented per platform (DirectShow on Windows) plus the simulated
/// backend used for development and tests. Enumerates devices and binds them
/// for capture.
pub trait CaptureBackend: Send + Sync {
    /// Enumerate all currently connected video input devices.
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>>;

    /// Bind one enumerated device as a capture source.
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CaptureDevice>>;

    /// Bind the first video input device that accepts binding.
    ///
    /// Devices that fail to bind are skipped. Enumeration failure and an
    /// empty device list both surface as [`CaptureError::DeviceNotFound`].
    fn locate(&self) -> Result<Box<dyn CaptureDevice>> {
        let devices = self
            .enumerate_devices()
            .map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;

        for device in &devices {
            match self.open(device) {
                Ok(bound) => {
                    tracing::info!("Using capture device '{}'", device.name);
                    return Ok(bound);
                }
                Err(e) => tracing::debug!("Skipping device '{}': {e}", device.name),
            }
        }

        Err(CaptureError::DeviceNotFound(
            "no video input device could be bound".to_string(),
        ))
    }
}

/// A bound capture source.
///
/// Format methods talk to the source's stream configuration; they are only
/// meaningful between binding and graph construction.
pub trait CaptureDevice {
    /// The enumeration record this device was bound from.
    fn info(&self) -> &CameraDevice;

    /// Every stream capability the source advertises, in device order.
    fn stream_capabilities(&self) -> Result<Vec<FormatCapability>>;

    /// The format the source is currently configured for.
    fn current_format(&self) -> Result<FormatCapability>;

    /// Configure capability `index`, with geometry and frame interval taken
    /// from `format`.
    fn apply_format(&self, index: usize, format: &FormatCapability) -> Result<()>;

    /// Create a graph runtime with no nodes for this source.
    fn create_graph(&self) -> Result<Box<dyn GraphRuntime>>;
}

/// Backend for platforms without a capture stack; it never finds a device.
pub struct NullBackend;

impl CaptureBackend for NullBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![])
    }

    fn open(&self, device: &CameraDevice) -> Result<Box<dyn CaptureDevice>> {
        Err(CaptureError::DeviceNotFound(device.name.clone()))
    }
}
