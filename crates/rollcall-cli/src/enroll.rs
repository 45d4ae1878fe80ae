//! Enrollment: capture session, then record insert and media placement.

use crate::config::Config;
use image::codecs::jpeg::JpegEncoder;
use rollcall_core::{
    CaptureSession, DetectorError, Frame, FrameSink, FrameSource, QualityScorer, RegionDetector,
    ScrfdDetector,
};
use rollcall_hw::{Camera, CameraError};
use rollcall_storage::video::manifest_path;
use rollcall_storage::{LayoutError, MediaLayout, MjpegWriter, StoreError, UserStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("user name must not be empty")]
    EmptyName,
    #[error("face detector unavailable: {0}")]
    DetectorUnavailable(#[source] DetectorError),
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(#[source] CameraError),
    #[error("no face detected in any of {samples_taken} sampled frames")]
    EnrollmentIncomplete { samples_taken: u32 },
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("filesystem: {0}")]
    Filesystem(#[from] LayoutError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode profile image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Result of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub user_id: i64,
    pub name: String,
    pub image_path: PathBuf,
    /// `None` when the clip could not be recorded.
    pub video_path: Option<PathBuf>,
    pub best_score: u32,
    pub samples_taken: u32,
    pub elapsed: Duration,
}

/// Video recording settings for one session.
#[derive(Debug, Clone, Copy)]
pub struct Recording {
    pub frame_rate: f32,
    pub frame_size: (u32, u32),
    pub jpeg_quality: u8,
}

/// Enroll `name` using the configured camera and detector.
///
/// The camera is opened before the detector is loaded, so an unavailable
/// device is reported without any sample being attempted. Streaming stops
/// before anything is persisted; the device itself is closed when this
/// returns, on every path.
pub fn enroll(config: &Config, name: &str, budget: i64) -> Result<EnrollOutcome, EnrollError> {
    let name = validate_name(name)?;

    let store = UserStore::new(&config.db_path);
    store.bootstrap()?;
    let layout = MediaLayout::new(&config.image_root, &config.video_root);

    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )
    .map_err(EnrollError::DeviceUnavailable)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        pixel_format = ?camera.pixel_format(),
        "camera opened"
    );

    let model_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&model_path).map_err(EnrollError::DetectorUnavailable)?;
    tracing::info!(path = %model_path, "SCRFD detector loaded");

    let mut stream = camera.stream().map_err(EnrollError::DeviceUnavailable)?;
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        stream.discard(config.warmup_frames);
    }

    let recording = Recording {
        frame_rate: config.frame_rate,
        frame_size: (camera.width, camera.height),
        jpeg_quality: config.jpeg_quality,
    };
    let mut session = CaptureSession::new(detector, config.detection);

    enroll_with(&mut session, stream, &store, &layout, recording, name, budget)
}

/// Run one session over `source` and persist its winner.
///
/// `source` is dropped as soon as sampling ends. The clip is recorded to a
/// staging path and moved under the user's directory once the id is known;
/// it is removed again if the enrollment does not complete.
pub fn enroll_with<D, Q, S>(
    session: &mut CaptureSession<D, Q>,
    mut source: S,
    store: &UserStore,
    layout: &MediaLayout,
    recording: Recording,
    name: &str,
    budget: i64,
) -> Result<EnrollOutcome, EnrollError>
where
    D: RegionDetector,
    Q: QualityScorer,
    S: FrameSource,
{
    let name = validate_name(name)?;

    let mut staged = StagedVideo::new(layout.staging_video_path());
    let mut writer = match MjpegWriter::create(
        staged.path(),
        recording.frame_rate,
        recording.frame_size,
        recording.jpeg_quality,
    ) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "video recording unavailable; capturing without clip");
            None
        }
    };

    let result = session.run(
        &mut source,
        writer.as_mut().map(|w| w as &mut dyn FrameSink),
        budget,
    );
    drop(source);

    let recorded = writer.is_some_and(|w| match w.finish() {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to close video artifact; clip discarded");
            false
        }
    });

    let Some(best) = result.best_frame.as_ref() else {
        tracing::warn!(samples = result.samples_taken, name, "enrollment incomplete");
        return Err(EnrollError::EnrollmentIncomplete {
            samples_taken: result.samples_taken,
        });
    };

    let jpeg = encode_jpeg(best, recording.jpeg_quality)?;
    let user_id = store.insert(name, &jpeg)?;

    layout.ensure_user_dirs(user_id)?;
    let image_path = layout.image_path(user_id, name);
    std::fs::write(&image_path, &jpeg).map_err(|source| EnrollError::Io {
        path: image_path.clone(),
        source,
    })?;

    let video_path = if recorded {
        let dest = layout.video_path(user_id, name);
        staged.commit(&dest)?;
        Some(dest)
    } else {
        None
    };

    tracing::info!(
        user_id,
        name,
        best_score = result.best_score,
        samples = result.samples_taken,
        elapsed_ms = result.elapsed.as_millis() as u64,
        image = %image_path.display(),
        "enrollment complete"
    );

    Ok(EnrollOutcome {
        user_id,
        name: name.to_string(),
        image_path,
        video_path,
        best_score: result.best_score,
        samples_taken: result.samples_taken,
        elapsed: result.elapsed,
    })
}

fn validate_name(name: &str) -> Result<&str, EnrollError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EnrollError::EmptyName);
    }
    Ok(trimmed)
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, EnrollError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&frame.image)?;
    Ok(jpeg)
}

/// A staged clip and its manifest; both are removed on drop unless committed.
struct StagedVideo {
    path: PathBuf,
    committed: bool,
}

impl StagedVideo {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self, dest: &Path) -> Result<(), EnrollError> {
        move_file(&self.path, dest)?;
        move_file(&manifest_path(&self.path), &manifest_path(dest))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedVideo {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in [self.path.clone(), manifest_path(&self.path)] {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "staged video removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove staged video"
                    )
                }
            }
        }
    }
}

/// Rename, falling back to copy-and-remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), EnrollError> {
    match std::fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => tracing::debug!(
            from = %from.display(),
            to = %to.display(),
            error = %e,
            "rename failed; falling back to copy"
        ),
    }
    std::fs::metadata(from).map_err(io_err(from))?;
    std::fs::copy(from, to).map_err(io_err(to))?;
    std::fs::remove_file(from).map_err(io_err(from))
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> EnrollError {
    let path = path.to_path_buf();
    move |source| EnrollError::Io { path, source }
}
