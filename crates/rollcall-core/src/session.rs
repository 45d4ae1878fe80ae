//! Bounded capture-and-select session.
//!
//! Pulls up to `budget` frames from a [`FrameSource`], scores each one,
//! keeps an owned copy of the best, and forwards every raw frame to an
//! optional [`FrameSink`].

use crate::detector::RegionDetector;
use crate::scorer::{QualityScorer, RegionCount};
use crate::source::{FrameSink, FrameSource, SourceError};
use crate::types::{DetectionParams, Frame};
use std::time::{Duration, Instant};

/// Outcome of one [`CaptureSession::run`].
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// First frame that reached `best_score`. `None` if no sample saw a region.
    pub best_frame: Option<Frame>,
    pub best_score: u32,
    /// Zero-based sample index of `best_frame`.
    pub best_sample: Option<u32>,
    pub samples_taken: u32,
    /// Frames the sink accepted.
    pub video_frames: u32,
    pub elapsed: Duration,
}

impl SessionResult {
    fn empty() -> Self {
        Self {
            best_frame: None,
            best_score: 0,
            best_sample: None,
            samples_taken: 0,
            video_frames: 0,
            elapsed: Duration::ZERO,
        }
    }
}

pub struct CaptureSession<D, Q = RegionCount> {
    detector: D,
    scorer: Q,
    params: DetectionParams,
}

impl<D: RegionDetector> CaptureSession<D, RegionCount> {
    pub fn new(detector: D, params: DetectionParams) -> Self {
        Self::with_scorer(detector, RegionCount, params)
    }
}

impl<D: RegionDetector, Q: QualityScorer> CaptureSession<D, Q> {
    pub fn with_scorer(detector: D, scorer: Q, params: DetectionParams) -> Self {
        Self {
            detector,
            scorer,
            params,
        }
    }

    /// Sample up to `budget` frames. Never fails: acquisition errors end the
    /// loop early, detector errors score zero, sink errors are logged.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut sink: Option<&mut dyn FrameSink>,
        budget: i64,
    ) -> SessionResult {
        let mut result = SessionResult::empty();
        if budget <= 0 {
            tracing::warn!(budget, "non-positive sample budget; session not started");
            return result;
        }
        let budget = u32::try_from(budget).unwrap_or(u32::MAX);

        let started = Instant::now();
        tracing::info!(budget, params = ?self.params, "capture session started");

        while result.samples_taken < budget {
            let sample = result.samples_taken;
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(SourceError::EndOfStream) => {
                    tracing::info!(sample, "frame source ended; stopping early");
                    break;
                }
                Err(e) => {
                    tracing::warn!(sample, error = %e, "frame acquisition failed; stopping early");
                    break;
                }
            };

            let gray = frame.to_gray();
            let score = match self.detector.detect(&gray, &self.params) {
                Ok(regions) => self.scorer.score(&regions),
                Err(e) => {
                    tracing::warn!(sample, error = %e, "detection failed; scoring sample as zero");
                    0
                }
            };
            tracing::debug!(sample, seq = frame.sequence, score, "sample scored");

            if score > result.best_score {
                result.best_score = score;
                result.best_sample = Some(sample);
                result.best_frame = Some(frame.clone());
            }

            if let Some(sink) = sink.as_deref_mut() {
                match sink.append(&frame) {
                    Ok(()) => result.video_frames += 1,
                    Err(e) => {
                        tracing::warn!(sample, error = %e, "video append failed; continuing")
                    }
                }
            }

            result.samples_taken += 1;
        }

        result.elapsed = started.elapsed();
        tracing::info!(
            samples = result.samples_taken,
            best_score = result.best_score,
            best_sample = ?result.best_sample,
            video_frames = result.video_frames,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "capture session finished"
        );
        result
    }
}
