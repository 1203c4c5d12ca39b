use serde::Serialize;

use crate::camera::backend::{CaptureBackend, CaptureDevice};
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{CameraDevice, FormatCapability};

/// Stream configuration of one device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFormats {
    pub device: CameraDevice,
    /// Output format the device is configured with right now.
    pub current: Option<FormatCapability>,
    pub capabilities: Vec<FormatCapability>,
}

/// List all connected cameras.
pub fn list_cameras(backend: &dyn CaptureBackend) -> Result<Vec<CameraDevice>> {
    backend.enumerate_devices()
}

/// Open the device whose name or id equals `selector`, or the first device
/// that binds when there is no selector.
pub fn open_camera(
    backend: &dyn CaptureBackend,
    selector: Option<&str>,
) -> Result<Box<dyn CaptureDevice>> {
    let Some(selector) = selector else {
        return backend.locate();
    };
    let devices = backend.enumerate_devices()?;
    let device = devices
        .iter()
        .find(|d| d.name == selector || d.id.as_str() == selector)
        .ok_or_else(|| CaptureError::DeviceNotFound(selector.to_string()))?;
    backend.open(device)
}

/// Get supported video formats for a camera.
pub fn get_camera_formats(
    backend: &dyn CaptureBackend,
    selector: Option<&str>,
) -> Result<CameraFormats> {
    let device = open_camera(backend, selector)?;
    let capabilities = device.stream_capabilities()?;
    let current = match device.current_format() {
        Ok(format) => Some(format),
        Err(e) => {
            tracing::debug!("No current format for '{}': {e}", device.info().name);
            None
        }
    };
    Ok(CameraFormats {
        device: device.info().clone(),
        current,
        capabilities,
    })
}
