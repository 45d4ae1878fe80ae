//! Per-frame quality scoring.

use crate::types::Region;

/// Maps the regions detected in one sample to a scalar score.
/// Larger is strictly better.
pub trait QualityScorer {
    fn score(&self, regions: &[Region]) -> u32;
}

/// Scores a sample by how many face-like regions were detected.
///
/// A heuristic proxy for "a recognizable face is present and unobstructed":
/// a well-lit, well-framed subject tends to trigger more detections.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionCount;

impl QualityScorer for RegionCount {
    fn score(&self, regions: &[Region]) -> u32 {
        u32::try_from(regions.len()).unwrap_or(u32::MAX)
    }
}
