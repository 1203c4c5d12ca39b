use serde::{Deserialize, Serialize};
use std::fmt;

/// 100 ns reference-time ticks per second, the unit of frame intervals.
pub const REFERENCE_TIME_PER_SECOND: i64 = 10_000_000;

/// Frame interval in reference-time ticks for a whole-number frame rate.
///
/// Returns 0 ("device default") for a zero rate.
pub fn frame_interval_from_fps(fps: u32) -> i64 {
    if fps == 0 {
        return 0;
    }
    REFERENCE_TIME_PER_SECOND / i64::from(fps)
}

/// Frame rate for an interval in reference-time ticks; 0.0 when unknown.
pub fn fps_from_frame_interval(ticks: i64) -> f32 {
    if ticks <= 0 {
        return 0.0;
    }
    REFERENCE_TIME_PER_SECOND as f32 / ticks as f32
}

/// Stable camera identifier (VID:PID + serial or hash of device path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a Windows device path to extract VID:PID and produce a stable ID.
    ///
    /// Windows USB device paths typically contain `vid_XXXX&pid_XXXX`.
    /// Falls back to a hash of the full path if VID/PID cannot be extracted.
    pub fn from_device_path(path: &str) -> Self {
        let lower = path.to_lowercase();

        let vid = extract_field(&lower, "vid_");
        let pid = extract_field(&lower, "pid_");

        match (vid, pid) {
            (Some(v), Some(p)) => match extract_serial(&lower) {
                Some(serial) => Self(format!("{v}:{p}:{serial}")),
                None => Self(format!("{v}:{p}:{:016x}", simple_hash(path))),
            },
            _ => Self(format!("unknown:{:016x}", simple_hash(path))),
        }
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract a 4-char hex field from a device path (e.g. "vid_" or "pid_").
fn extract_field(lower_path: &str, prefix: &str) -> Option<String> {
    let start = lower_path.find(prefix)? + prefix.len();
    let field: String = lower_path[start..].chars().take(4).collect();
    if field.len() == 4 && field.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(field)
    } else {
        None
    }
}

/// Extract a serial number from a Windows device path.
///
/// Device paths look like: `\\?\usb#vid_046d&pid_085e&mi_00#6&abc123#{guid}`
/// The serial is typically the segment after the second `#`.
fn extract_serial(lower_path: &str) -> Option<String> {
    let candidate = lower_path.split('#').nth(2)?;
    if !candidate.starts_with('{') && candidate.len() >= 4 {
        return Some(candidate.to_string());
    }
    None
}

/// FNV-1a hash for generating a stable fallback identifier.
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A capture device found by enumeration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: DeviceId,
    pub name: String,
    pub device_path: String,
}

impl CameraDevice {
    /// Build the device record, deriving the id from the path when there is
    /// one and from the friendly name otherwise (virtual cameras).
    pub fn new(name: impl Into<String>, device_path: impl Into<String>) -> Self {
        let name = name.into();
        let device_path = device_path.into();
        let id = if device_path.is_empty() {
            DeviceId::new(format!("name:{name}"))
        } else {
            DeviceId::from_device_path(&device_path)
        };
        Self {
            id,
            name,
            device_path,
        }
    }
}

/// Packed colour layout requested from the grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum PixelDepth {
    /// 24-bit BGR, used for plain bitmap output.
    #[default]
    Rgb24,
    /// 32-bit BGRA, used as blending input.
    Argb32,
}

impl PixelDepth {
    pub fn bits(self) -> u16 {
        match self {
            Self::Rgb24 => 24,
            Self::Argb32 => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        usize::from(self.bits() / 8)
    }
}

impl TryFrom<u16> for PixelDepth {
    type Error = String;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        match bits {
            24 => Ok(Self::Rgb24),
            32 => Ok(Self::Argb32),
            other => Err(format!("unsupported pixel depth {other}, expected 24 or 32")),
        }
    }
}

impl From<PixelDepth> for u16 {
    fn from(depth: PixelDepth) -> Self {
        depth.bits()
    }
}

impl fmt::Display for PixelDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// One entry of a device's advertised stream capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatCapability {
    pub width: u32,
    pub height: u32,
    /// Average time per frame in reference-time ticks; 0 when unspecified.
    pub frame_interval: i64,
    /// FourCC of the native subtype (e.g. "YUY2", "MJPG").
    pub pixel_format: String,
}

impl FormatCapability {
    pub fn fps(&self) -> f32 {
        fps_from_frame_interval(self.frame_interval)
    }
}

impl fmt::Display for FormatCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {:.2} fps ({})",
            self.width,
            self.height,
            self.fps(),
            self.pixel_format
        )
    }
}

/// What the caller asks the session for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub frame_interval: i64,
    pub pixel_depth: PixelDepth,
}

/// The format a capture session runs with.
///
/// Chosen once by negotiation, then pinned to the connected media type's
/// dimensions when the grabber is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_depth: PixelDepth,
    pub frame_interval: i64,
}

impl CaptureFormat {
    /// Geometry and interval of `capability` at the grabber's pixel depth.
    pub fn from_capability(capability: &FormatCapability, pixel_depth: PixelDepth) -> Self {
        Self {
            width: capability.width,
            height: capability.height,
            pixel_depth,
            frame_interval: capability.frame_interval,
        }
    }

    /// Unpadded size of one frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_depth.bytes_per_pixel()
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} @ {:.2} fps",
            self.width,
            self.height,
            self.pixel_depth,
            fps_from_frame_interval(self.frame_interval)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- DeviceId tests ---

    #[test]
    fn device_id_from_device_path_extracts_vid_pid() {
        let path = r"\\?\usb#vid_046d&pid_085e&mi_00#6&abc12345&0&0000#{guid}";
        let id = DeviceId::from_device_path(path);
        let s = id.as_str();
        assert!(s.starts_with("046d:085e:"), "got: {s}");
    }

    #[test]
    fn device_id_same_device_produces_same_id() {
        let path = r"\\?\usb#vid_046d&pid_085e&mi_00#serialnum#{guid}";
        assert_eq!(
            DeviceId::from_device_path(path),
            DeviceId::from_device_path(path)
        );
    }

    #[test]
    fn device_id_fallback_when_no_vid_pid() {
        let id = DeviceId::from_device_path(r"\\?\some_weird_device_path");
        assert!(id.as_str().starts_with("unknown:"), "got: {}", id.as_str());
    }

    #[test]
    fn device_id_fallback_when_no_serial() {
        let id = DeviceId::from_device_path(r"\\?\usb#vid_046d&pid_085e#ab#{guid}");
        assert!(id.as_str().starts_with("046d:085e:"), "got: {}", id.as_str());
    }

    // --- CameraDevice tests ---

    #[test]
    fn camera_device_without_path_is_identified_by_name() {
        let device = CameraDevice::new("OBS Virtual Camera", "");
        assert_eq!(device.id.as_str(), "name:OBS Virtual Camera");
    }

    #[test]
    fn camera_device_serialises_to_json() {
        let device = CameraDevice::new("Insta360 Air", "path");
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["name"], "Insta360 Air");
        assert_eq!(json["devicePath"], "path");
    }

    // --- Frame interval tests ---

    #[test]
    fn frame_interval_for_fifteen_fps() {
        assert_eq!(frame_interval_from_fps(15), 666_666);
        assert_eq!(frame_interval_from_fps(30), 333_333);
        assert_eq!(frame_interval_from_fps(0), 0);
    }

    #[test]
    fn fps_from_interval_round_trips_whole_rates() {
        assert!((fps_from_frame_interval(333_333) - 30.0).abs() < 0.01);
        assert_eq!(fps_from_frame_interval(0), 0.0);
    }

    // --- PixelDepth tests ---

    #[test]
    fn pixel_depth_accepts_only_24_and_32() {
        assert_eq!(PixelDepth::try_from(24), Ok(PixelDepth::Rgb24));
        assert_eq!(PixelDepth::try_from(32), Ok(PixelDepth::Argb32));
        assert!(PixelDepth::try_from(16).is_err());
    }

    #[test]
    fn pixel_depth_serialises_as_bit_count() {
        assert_eq!(serde_json::to_value(PixelDepth::Argb32).unwrap(), 32);
        let depth: PixelDepth = serde_json::from_str("24").unwrap();
        assert_eq!(depth, PixelDepth::Rgb24);
        assert!(serde_json::from_str::<PixelDepth>("8").is_err());
    }

    // --- CaptureFormat tests ---

    #[test]
    fn capture_format_frame_bytes() {
        let format = CaptureFormat {
            width: 3008,
            height: 1504,
            pixel_depth: PixelDepth::Argb32,
            frame_interval: frame_interval_from_fps(15),
        };
        assert_eq!(format.frame_bytes(), 3008 * 1504 * 4);
    }

    #[test]
    fn capture_format_takes_geometry_from_capability() {
        let cap = FormatCapability {
            width: 640,
            height: 480,
            frame_interval: 333_333,
            pixel_format: "YUY2".to_string(),
        };
        let format = CaptureFormat::from_capability(&cap, PixelDepth::Rgb24);
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!(format.frame_interval, 333_333);
        assert_eq!(format.to_string(), "640x480 24-bit @ 30.00 fps");
    }
}
