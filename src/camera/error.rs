use thiserror::Error;

/// Capture subsystem errors.
///
/// Every pipeline-construction step fails fast with one of these; nothing is
/// retried. A capture that completes without a sample is not an error: see
/// [`CaptureDiagnostic`].
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("COM initialisation failed: {0}")]
    ComInit(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("format query failed: {0}")]
    FormatQuery(String),

    #[error("pipeline build failed: {0}")]
    PipelineBuild(String),

    #[error("pin connection failed: {0}")]
    Connection(String),

    #[error("render path failed: {0}")]
    RenderPath(String),

    #[error("graph run failed: {0}")]
    Run(String),

    #[error(transparent)]
    Bitmap(#[from] dib::DibError),

    #[error("image export failed: {0}")]
    Export(String),
}

/// Why a completed capture produced no pixels.
///
/// These travel through the zero-length result channel rather than as
/// errors, matching the "zero bytes means failure" contract of
/// [`crate::capture::session::CaptureSession::grab`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureDiagnostic {
    /// The graph completed but the grabber never delivered a sample,
    /// typically because another process holds the device.
    BusyDevice,
    /// The delivery callback could not allocate the frame buffer.
    OutOfMemory,
    /// The bounded wait elapsed before a sample arrived.
    TimedOut,
}

impl CaptureDiagnostic {
    /// Operator-facing explanation.
    pub fn message(self) -> &'static str {
        match self {
            Self::BusyDevice => "failed to read sample frame, maybe the camera is busy right now",
            Self::OutOfMemory => "out of memory while copying the sample frame",
            Self::TimedOut => "timed out waiting for the sample frame",
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;
