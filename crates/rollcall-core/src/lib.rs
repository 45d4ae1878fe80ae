//! rollcall-core — Capture-and-select enrollment session.
//!
//! Samples frames from a source, scores each by its detected face-region
//! count and retains the best one. SCRFD region detection runs via ONNX
//! Runtime for CPU inference.

pub mod detector;
pub mod scorer;
pub mod session;
pub mod source;
pub mod types;

pub use detector::{DetectorError, RegionDetector, ScrfdDetector};
pub use scorer::{QualityScorer, RegionCount};
pub use session::{CaptureSession, SessionResult};
pub use source::{FrameSink, FrameSource, SinkError, SourceError};
pub use types::{DetectionParams, Frame, Region};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// Default model directory: `/usr/share/rollcall/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
