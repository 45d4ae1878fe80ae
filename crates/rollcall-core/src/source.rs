//! Frame supply and frame recording capabilities.

use crate::types::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("end of stream")]
    EndOfStream,
    #[error("frame acquisition failed: {0}")]
    Acquisition(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("manifest: {0}")]
    Manifest(String),
}

/// Sequential supplier of frames. Blocks until a frame is available.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

/// Append-only recorder of sampled frames, in capture order.
pub trait FrameSink {
    fn append(&mut self, frame: &Frame) -> Result<(), SinkError>;
}
