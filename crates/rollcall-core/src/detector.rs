//! Region detection.
//!
//! [`RegionDetector`] is the capability the capture session depends on.
//! [`ScrfdDetector`] is the production backend: SCRFD face detection via
//! ONNX Runtime with 3-stride anchor decoding and neighbour-counting NMS.

use crate::types::{DetectionParams, Region};
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Image → set of face-like rectangles.
///
/// Takes `&mut self` only because inference backends need mutable session
/// access; implementations keep no state between calls.
pub trait RegionDetector {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<Region>, DetectorError>;
}

/// Letterbox geometry used to map model coordinates back to the frame.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Raw decoded anchor in frame coordinates, before grouping.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// A candidate that survived NMS, with the number of raw candidates it absorbed.
#[derive(Debug, Clone, Copy)]
struct Grouped {
    candidate: Candidate,
    neighbors: u32,
}

/// (score_idx, bbox_idx) for one stride.
type StrideOutputIndices = (usize, usize);

pub struct ScrfdDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }
}

impl RegionDetector for ScrfdDetector {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<Region>, DetectorError> {
        params.validate().map_err(DetectorError::InvalidParams)?;
        if gray.width() == 0 || gray.height() == 0 {
            return Err(DetectorError::InvalidInput(format!(
                "empty image {}x{}",
                gray.width(),
                gray.height()
            )));
        }

        let (input, letterbox) = preprocess(gray);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let grouped = group(candidates, SCRFD_NMS_THRESHOLD);
        Ok(to_regions(&grouped, params, gray.width(), gray.height()))
    }
}

/// Letterbox a grayscale frame into a normalised 1×3×640×640 tensor.
fn preprocess(gray: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = gray.dimensions();
    let target = SCRFD_INPUT_SIZE as f32;
    let scale = (target / width as f32).min(target / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = image::imageops::resize(gray, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding with the mean normalises to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = pad_x.floor() as u32;
    let y0 = pad_y.floor() as u32;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = ((x + x0) as usize, (y + y0) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = normalized;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map stride slots to output tensors, by name ("score_8", "bbox_8", ...)
/// when every name is present, otherwise by the standard positional layout
/// `[0-2] = scores, [3-5] = bboxes`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(v) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut out = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let off = idx * 4;
        let Some(d) = bboxes.get(off..off + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * s;
        let ay = (cell / grid) as f32 * s;

        let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
        let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

        out.push(Candidate {
            x1: unmap_x(ax - d[0] * s),
            y1: unmap_y(ay - d[1] * s),
            x2: unmap_x(ax + d[2] * s),
            y2: unmap_y(ay + d[3] * s),
            score,
        });
    }
    out
}

/// Non-maximum suppression that also counts, for every kept candidate, how
/// many raw candidates (itself included) it suppressed.
fn group(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Grouped> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut suppressed = vec![false; candidates.len()];
    let mut keep = Vec::new();

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        let mut neighbors = 1u32;
        for j in (i + 1)..candidates.len() {
            if !suppressed[j] && iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
                neighbors += 1;
            }
        }
        keep.push(Grouped {
            candidate: candidates[i],
            neighbors,
        });
    }

    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Clip grouped candidates to the frame and apply the neighbour and size filters.
fn to_regions(
    grouped: &[Grouped],
    params: &DetectionParams,
    width: u32,
    height: u32,
) -> Vec<Region> {
    let (min_w, min_h) = params.min_size;
    grouped
        .iter()
        .filter(|g| g.neighbors >= params.min_neighbors)
        .filter_map(|g| {
            let c = &g.candidate;
            let x1 = c.x1.clamp(0.0, width as f32);
            let y1 = c.y1.clamp(0.0, height as f32);
            let x2 = c.x2.clamp(0.0, width as f32);
            let y2 = c.y2.clamp(0.0, height as f32);
            let w = (x2 - x1).round() as u32;
            let h = (y2 - y1).round() as u32;
            if w < min_w || h < min_h {
                return None;
            }
            Some(Region {
                x: x1.round() as u32,
                y: y1.round() as u32,
                width: w,
                height: h,
                confidence: c.score,
            })
        })
        .collect()
}
