//! Motion-JPEG video artifact.
//!
//! Frames are JPEG-encoded and appended to a single file as they arrive.
//! A JSON manifest carrying the size, count and per-frame capture offsets
//! is written next to the stream when it is finished. Its `frame_rate` is
//! measured from those offsets; the configured rate is kept as
//! `nominal_frame_rate` and used when fewer than two frames were recorded.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use rollcall_core::{Frame, FrameSink, SinkError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const CODEC: &str = "mjpeg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoManifest {
    pub codec: String,
    pub frame_rate: f32,
    pub nominal_frame_rate: f32,
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    /// Milliseconds from the first frame to the last.
    pub duration_ms: u64,
    /// Capture offset of each frame relative to the first, in milliseconds.
    pub frame_offsets_ms: Vec<u64>,
    pub recorded_at: DateTime<Utc>,
}

/// Manifest path for a video stream: same stem, `.json` extension.
pub fn manifest_path(video_path: &Path) -> PathBuf {
    video_path.with_extension("json")
}

pub struct MjpegWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    frame_rate: f32,
    frame_size: (u32, u32),
    quality: u8,
    frame_count: u32,
    first_frame_at: Option<Instant>,
    last_offset: Duration,
    frame_offsets_ms: Vec<u64>,
    recorded_at: DateTime<Utc>,
}

impl MjpegWriter {
    /// Create the stream file (and its parent directory).
    pub fn create(
        path: impl Into<PathBuf>,
        frame_rate: f32,
        frame_size: (u32, u32),
        quality: u8,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        tracing::debug!(path = %path.display(), frame_rate, ?frame_size, "video writer opened");
        Ok(Self {
            path,
            out: Some(BufWriter::new(file)),
            frame_rate,
            frame_size,
            quality: quality.clamp(1, 100),
            frame_count: 0,
            first_frame_at: None,
            last_offset: Duration::ZERO,
            frame_offsets_ms: Vec::new(),
            recorded_at: Utc::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Flush and close the stream, then write the manifest.
    pub fn finish(mut self) -> Result<VideoManifest, SinkError> {
        if let Some(out) = self.out.take() {
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }

        let manifest = VideoManifest {
            codec: CODEC.to_string(),
            frame_rate: self.measured_frame_rate(),
            nominal_frame_rate: self.frame_rate,
            width: self.frame_size.0,
            height: self.frame_size.1,
            frame_count: self.frame_count,
            duration_ms: self.last_offset.as_millis() as u64,
            frame_offsets_ms: std::mem::take(&mut self.frame_offsets_ms),
            recorded_at: self.recorded_at,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SinkError::Manifest(e.to_string()))?;
        std::fs::write(manifest_path(&self.path), json)?;

        tracing::info!(
            path = %self.path.display(),
            frames = self.frame_count,
            frame_rate = manifest.frame_rate,
            duration_ms = manifest.duration_ms,
            "video artifact closed"
        );
        Ok(manifest)
    }

    fn measured_frame_rate(&self) -> f32 {
        let secs = self.last_offset.as_secs_f32();
        if self.frame_count < 2 || secs <= 0.0 {
            return self.frame_rate;
        }
        (self.frame_count - 1) as f32 / secs
    }
}

impl FrameSink for MjpegWriter {
    fn append(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let actual = (frame.width(), frame.height());
        if actual != self.frame_size {
            return Err(SinkError::FrameSize {
                expected: self.frame_size,
                actual,
            });
        }
        let out = self.out.as_mut().ok_or_else(|| {
            SinkError::Io(std::io::Error::other("video writer already closed"))
        })?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&frame.image)?;
        out.write_all(&jpeg)?;

        let now = Instant::now();
        let offset = match self.first_frame_at {
            Some(first) => now.duration_since(first),
            None => {
                self.first_frame_at = Some(now);
                Duration::ZERO
            }
        };
        self.last_offset = offset;
        self.frame_offsets_ms.push(offset.as_millis() as u64);
        self.frame_count += 1;
        Ok(())
    }
}

impl Drop for MjpegWriter {
    fn drop(&mut self) {
        if let Some(mut out) = self.out.take() {
            tracing::warn!(path = %self.path.display(), "video writer dropped without finish");
            if let Err(e) = out.flush() {
                tracing::warn!(error = %e, "video flush on drop failed");
            }
        }
    }
}

/// Split a Motion-JPEG stream back into its JPEG frames.
///
/// Walks marker segments so that bytes inside headers are never mistaken for
/// frame boundaries. Bytes between frames are skipped; a truncated trailing
/// frame is dropped.
pub fn split_frames(stream: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(offset) = stream[pos..].windows(2).position(|w| w == [0xFF, 0xD8]) {
        let start = pos + offset;
        match frame_end(stream, start + 2) {
            Some(end) => {
                frames.push(&stream[start..end]);
                pos = end;
            }
            None => pos = start + 2,
        }
    }
    frames
}

/// Offset just past the EOI marker of the frame whose segments start at `pos`.
fn frame_end(stream: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        if *stream.get(pos)? != 0xFF {
            return None;
        }
        let marker = *stream.get(pos + 1)?;
        match marker {
            0xD9 => return Some(pos + 2),
            0xFF => pos += 1,
            0x01 | 0xD0..=0xD7 => pos += 2,
            _ => {
                let len = u16::from_be_bytes([*stream.get(pos + 2)?, *stream.get(pos + 3)?]);
                pos += 2 + len as usize;
                if marker == 0xDA {
                    pos = skip_entropy_coded(stream, pos)?;
                }
            }
        }
    }
}

/// Skip scan data up to the next marker that is neither a stuffed 0xFF nor a restart.
fn skip_entropy_coded(stream: &[u8], mut pos: usize) -> Option<usize> {
    while pos + 1 < stream.len() {
        if stream[pos] == 0xFF {
            let next = stream[pos + 1];
            if next != 0x00 && !(0xD0..=0xD7).contains(&next) {
                return Some(pos);
            }
        }
        pos += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(shade: u8, seq: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(16, 8, Rgb([shade, shade, shade])), seq)
    }

    #[test]
    fn test_frames_written_in_order_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips").join("alice.mjpeg");
        let mut writer = MjpegWriter::create(&path, 20.0, (16, 8), 90).unwrap();
        for (i, shade) in [10u8, 128, 250].into_iter().enumerate() {
            writer.append(&frame(shade, i as u32)).unwrap();
        }
        let manifest = writer.finish().unwrap();
        assert_eq!(manifest.frame_count, 3);
        assert_eq!((manifest.width, manifest.height), (16, 8));
        assert_eq!(manifest.codec, "mjpeg");

        let bytes = std::fs::read(&path).unwrap();
        let frames = split_frames(&bytes);
        assert_eq!(frames.len(), 3);
        let shades: Vec<u8> = frames
            .iter()
            .map(|f| image::load_from_memory(f).unwrap().to_rgb8().get_pixel(8, 4).0[0])
            .collect();
        assert!(shades[0] < shades[1] && shades[1] < shades[2], "{shades:?}");

        let json = std::fs::read(manifest_path(&path)).unwrap();
        let parsed: VideoManifest = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.frame_count, 3);
        assert_eq!(parsed.frame_offsets_ms, manifest.frame_offsets_ms);
        assert_eq!(parsed.recorded_at, manifest.recorded_at);
    }

    #[test]
    fn test_wrong_size_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.mjpeg");
        let mut writer = MjpegWriter::create(path, 20.0, (32, 32), 90).unwrap();
        let err = writer.append(&frame(0, 0)).unwrap_err();
        assert!(matches!(
            err,
            SinkError::FrameSize {
                expected: (32, 32),
                actual: (16, 8)
            }
        ));
        assert_eq!(writer.frame_count(), 0);
        writer.finish().unwrap();
    }

    #[test]
    fn test_empty_stream_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mjpeg");
        let manifest = MjpegWriter::create(&path, 15.0, (16, 8), 80).unwrap().finish().unwrap();
        assert_eq!(manifest.frame_count, 0);
        assert_eq!(manifest.frame_rate, 15.0);
        assert!(manifest.frame_offsets_ms.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_manifest_records_capture_timing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.mjpeg");
        let mut writer = MjpegWriter::create(&path, 20.0, (16, 8), 90).unwrap();
        for seq in 0..4 {
            if seq > 0 {
                std::thread::sleep(Duration::from_millis(60));
            }
            writer.append(&frame(50, seq)).unwrap();
        }
        let manifest = writer.finish().unwrap();

        assert_eq!(manifest.frame_offsets_ms.len(), 4);
        assert_eq!(manifest.frame_offsets_ms[0], 0);
        assert!(manifest.frame_offsets_ms.windows(2).all(|w| w[1] >= w[0] + 60));
        assert_eq!(manifest.duration_ms, manifest.frame_offsets_ms[3]);
        assert_eq!(manifest.nominal_frame_rate, 20.0);
        // Three 60 ms gaps: at most ~16.7 fps, well under the nominal 20.
        assert!(manifest.frame_rate <= 1000.0 / 60.0 + 0.01, "{}", manifest.frame_rate);
        assert!(manifest.frame_rate > 0.0);
    }

    #[test]
    fn test_drop_without_finish_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.mjpeg");
        {
            let mut writer = MjpegWriter::create(&path, 20.0, (16, 8), 90).unwrap();
            writer.append(&frame(100, 0)).unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(split_frames(&bytes).len(), 1);
        assert!(!manifest_path(&path).exists());
    }

    #[test]
    fn test_split_frames_skips_garbage_and_header_bytes() {
        // SOI, a COM segment whose payload contains FF D9, EOI, trailing junk.
        let stream = [
            0x00, 0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x04, 0xFF, 0xD9, 0xFF, 0xD9, 0x42, 0xFF, 0xD9,
        ];
        let frames = split_frames(&stream);
        assert_eq!(frames, vec![&stream[1..11]]);
    }

    #[test]
    fn test_split_frames_drops_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mjpeg");
        let mut writer = MjpegWriter::create(&path, 20.0, (16, 8), 90).unwrap();
        writer.append(&frame(1, 0)).unwrap();
        writer.append(&frame(2, 1)).unwrap();
        writer.finish().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(split_frames(&bytes[..bytes.len() - 10]).len(), 1);
    }
}
