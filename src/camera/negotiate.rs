use serde::Serialize;

use crate::camera::backend::CaptureDevice;
use crate::camera::types::{CaptureFormat, FormatCapability, FormatRequest};

/// Where the negotiated format came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NegotiationOutcome {
    /// Capability `index` matched the requested geometry and was applied.
    Matched { index: usize },
    /// No match (or the match was refused); the source keeps its format.
    DeviceDefault,
    /// The source exposes no stream configuration; requested geometry assumed.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub format: CaptureFormat,
    pub outcome: NegotiationOutcome,
}

/// Index of the first capability with exactly the requested geometry.
pub fn find_exact_match(
    capabilities: &[FormatCapability],
    width: u32,
    height: u32,
) -> Option<usize> {
    capabilities
        .iter()
        .position(|cap| cap.width == width && cap.height == height)
}

/// Pick and apply the source's output format.
///
/// The first capability matching the requested width and height wins and is
/// applied with the requested frame interval (a zero interval keeps the
/// capability's own). Anything else falls back to the source's current
/// format. Never fails: a source without stream configuration is reported
/// as [`NegotiationOutcome::Skipped`] and the capture proceeds.
pub fn negotiate(device: &dyn CaptureDevice, request: &FormatRequest) -> Negotiation {
    let depth = request.pixel_depth;

    let capabilities = match device.stream_capabilities() {
        Ok(caps) => caps,
        Err(e) => {
            tracing::debug!("Stream capabilities unavailable: {e}");
            Vec::new()
        }
    };
    for (i, cap) in capabilities.iter().enumerate() {
        tracing::debug!("  capability {i}: {cap}");
    }

    if let Some(index) = find_exact_match(&capabilities, request.width, request.height) {
        let mut chosen = capabilities[index].clone();
        if request.frame_interval > 0 {
            chosen.frame_interval = request.frame_interval;
        }

        match device.apply_format(index, &chosen) {
            Ok(()) => {
                tracing::info!("Configured capability {index}: {chosen}");
                return Negotiation {
                    format: CaptureFormat::from_capability(&chosen, depth),
                    outcome: NegotiationOutcome::Matched { index },
                };
            }
            Err(e) => tracing::warn!("Capability {index} refused ({e}), using device default"),
        }
    } else {
        tracing::info!(
            "No capability matches {}x{}, using device default",
            request.width,
            request.height
        );
    }

    match device.current_format() {
        Ok(current) => Negotiation {
            format: CaptureFormat::from_capability(&current, depth),
            outcome: NegotiationOutcome::DeviceDefault,
        },
        Err(e) => {
            tracing::warn!("Format negotiation skipped: {e}");
            Negotiation {
                format: CaptureFormat {
                    width: request.width,
                    height: request.height,
                    pixel_depth: depth,
                    frame_interval: request.frame_interval,
                },
                outcome: NegotiationOutcome::Skipped,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::error::{CaptureError, Result};
    use crate::camera::types::{frame_interval_from_fps, CameraDevice, PixelDepth};
    use crate::capture::graph::GraphRuntime;
    use parking_lot::Mutex;

    struct MockDevice {
        info: CameraDevice,
        capabilities: Option<Vec<FormatCapability>>,
        current: Option<FormatCapability>,
        refuse_apply: bool,
        applied: Mutex<Vec<(usize, FormatCapability)>>,
    }

    impl MockDevice {
        fn new(
            capabilities: Option<Vec<FormatCapability>>,
            current: Option<FormatCapability>,
        ) -> Self {
            Self {
                info: CameraDevice::new("Mock", "mock"),
                capabilities,
                current,
                refuse_apply: false,
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    impl CaptureDevice for MockDevice {
        fn info(&self) -> &CameraDevice {
            &self.info
        }

        fn stream_capabilities(&self) -> Result<Vec<FormatCapability>> {
            self.capabilities
                .clone()
                .ok_or_else(|| CaptureError::FormatQuery("no stream config".to_string()))
        }

        fn current_format(&self) -> Result<FormatCapability> {
            self.current
                .clone()
                .ok_or_else(|| CaptureError::FormatQuery("no stream config".to_string()))
        }

        fn apply_format(&self, index: usize, format: &FormatCapability) -> Result<()> {
            if self.refuse_apply {
                return Err(CaptureError::FormatQuery("SetFormat refused".to_string()));
            }
            self.applied.lock().push((index, format.clone()));
            Ok(())
        }

        fn create_graph(&self) -> Result<Box<dyn GraphRuntime>> {
            Err(CaptureError::PipelineBuild("mock".to_string()))
        }
    }

    fn cap(width: u32, height: u32, frame_interval: i64) -> FormatCapability {
        FormatCapability {
            width,
            height,
            frame_interval,
            pixel_format: "YUY2".to_string(),
        }
    }

    fn request(width: u32, height: u32, fps: u32) -> FormatRequest {
        FormatRequest {
            width,
            height,
            frame_interval: frame_interval_from_fps(fps),
            pixel_depth: PixelDepth::Argb32,
        }
    }

    #[test]
    fn exact_match_is_applied_with_requested_interval() {
        let device = MockDevice::new(
            Some(vec![cap(640, 480, 333_333), cap(3008, 1504, 0)]),
            Some(cap(640, 480, 333_333)),
        );

        let result = negotiate(&device, &request(3008, 1504, 15));

        assert_eq!(result.outcome, NegotiationOutcome::Matched { index: 1 });
        assert_eq!((result.format.width, result.format.height), (3008, 1504));
        assert_eq!(result.format.frame_interval, 666_666);
        assert_eq!(result.format.pixel_depth, PixelDepth::Argb32);

        let applied = device.applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, 1);
        assert_eq!(applied[0].1.frame_interval, 666_666);
    }

    #[test]
    fn first_of_several_matches_wins() {
        let device = MockDevice::new(
            Some(vec![cap(1280, 720, 333_333), cap(1280, 720, 666_666)]),
            None,
        );
        let result = negotiate(&device, &request(1280, 720, 0));
        assert_eq!(result.outcome, NegotiationOutcome::Matched { index: 0 });
        assert_eq!(result.format.frame_interval, 333_333);
    }

    #[test]
    fn no_match_uses_current_format() {
        let device = MockDevice::new(
            Some(vec![cap(640, 480, 333_333)]),
            Some(cap(640, 480, 333_333)),
        );

        let result = negotiate(&device, &request(3008, 1504, 15));

        assert_eq!(result.outcome, NegotiationOutcome::DeviceDefault);
        assert_eq!((result.format.width, result.format.height), (640, 480));
        assert!(device.applied.lock().is_empty());
    }

    #[test]
    fn refused_match_falls_back_to_current_format() {
        let mut device = MockDevice::new(
            Some(vec![cap(3008, 1504, 0)]),
            Some(cap(1920, 960, 333_333)),
        );
        device.refuse_apply = true;

        let result = negotiate(&device, &request(3008, 1504, 15));
        assert_eq!(result.outcome, NegotiationOutcome::DeviceDefault);
        assert_eq!((result.format.width, result.format.height), (1920, 960));
    }

    #[test]
    fn missing_stream_config_is_skipped_not_fatal() {
        let device = MockDevice::new(None, None);
        let result = negotiate(&device, &request(800, 600, 15));
        assert_eq!(result.outcome, NegotiationOutcome::Skipped);
        assert_eq!((result.format.width, result.format.height), (800, 600));
    }

    #[test]
    fn find_exact_match_requires_both_dimensions() {
        let caps = vec![cap(640, 1504, 0), cap(3008, 480, 0), cap(3008, 1504, 0)];
        assert_eq!(find_exact_match(&caps, 3008, 1504), Some(2));
        assert_eq!(find_exact_match(&caps, 1, 1), None);
    }

    #[test]
    fn outcome_serialises_with_kind_tag() {
        let json = serde_json::to_value(NegotiationOutcome::Matched { index: 3 }).unwrap();
        assert_eq!(json["kind"], "matched");
        assert_eq!(json["index"], 3);
    }
}
