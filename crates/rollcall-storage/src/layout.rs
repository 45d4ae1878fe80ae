//! Per-user media directories.
//!
//! ```text
//! <image_root>/<id>/<name>.jpg
//! <video_root>/<id>/<name>.mjpeg
//! <video_root>/<id>/<name>.json
//! <video_root>/.staging/<uuid>.mjpeg   (recording before an id exists)
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const IMAGE_EXTENSION: &str = "jpg";
pub const VIDEO_EXTENSION: &str = "mjpeg";
const STAGING_DIR: &str = ".staging";

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Both per-user directories, guaranteed to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDirs {
    pub image_dir: PathBuf,
    pub video_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MediaLayout {
    image_root: PathBuf,
    video_root: PathBuf,
}

impl MediaLayout {
    pub fn new(image_root: impl Into<PathBuf>, video_root: impl Into<PathBuf>) -> Self {
        Self {
            image_root: image_root.into(),
            video_root: video_root.into(),
        }
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    pub fn video_root(&self) -> &Path {
        &self.video_root
    }

    pub fn image_dir(&self, user_id: i64) -> PathBuf {
        self.image_root.join(user_id.to_string())
    }

    pub fn video_dir(&self, user_id: i64) -> PathBuf {
        self.video_root.join(user_id.to_string())
    }

    pub fn image_path(&self, user_id: i64, name: &str) -> PathBuf {
        self.image_dir(user_id)
            .join(format!("{}.{IMAGE_EXTENSION}", file_stem(name)))
    }

    pub fn video_path(&self, user_id: i64, name: &str) -> PathBuf {
        self.video_dir(user_id)
            .join(format!("{}.{VIDEO_EXTENSION}", file_stem(name)))
    }

    /// A fresh, unique recording path under the video root.
    pub fn staging_video_path(&self) -> PathBuf {
        self.video_root
            .join(STAGING_DIR)
            .join(format!("{}.{VIDEO_EXTENSION}", uuid::Uuid::new_v4()))
    }

    /// Create both per-user directories. Existing directories are not an
    /// error; partially created ones are left in place on failure.
    pub fn ensure_user_dirs(&self, user_id: i64) -> Result<UserDirs, LayoutError> {
        let dirs = UserDirs {
            image_dir: self.image_dir(user_id),
            video_dir: self.video_dir(user_id),
        };
        create_dir(&dirs.image_dir)?;
        create_dir(&dirs.video_dir)?;
        tracing::debug!(
            user_id,
            image_dir = %dirs.image_dir.display(),
            video_dir = %dirs.video_dir.display(),
            "user media directories ready"
        );
        Ok(dirs)
    }

    /// Create both roots.
    pub fn ensure_roots(&self) -> Result<(), LayoutError> {
        create_dir(&self.image_root)?;
        create_dir(&self.video_root)
    }
}

fn create_dir(path: &Path) -> Result<(), LayoutError> {
    std::fs::create_dir_all(path).map_err(|source| LayoutError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// A single safe path component derived from a user name.
pub fn file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" => "profile".to_string(),
        "." | ".." => "_".repeat(cleaned.len()),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_keyed_by_id() {
        let layout = MediaLayout::new("/data/images", "/data/videos");
        assert_eq!(layout.image_dir(7), PathBuf::from("/data/images/7"));
        assert_eq!(layout.video_dir(7), PathBuf::from("/data/videos/7"));
        assert_eq!(layout.image_path(7, "Alice"), PathBuf::from("/data/images/7/Alice.jpg"));
        assert_eq!(layout.video_path(7, "Alice"), PathBuf::from("/data/videos/7/Alice.mjpeg"));
    }

    #[test]
    fn test_ensure_user_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MediaLayout::new(dir.path().join("images"), dir.path().join("videos"));

        let first = layout.ensure_user_dirs(3).unwrap();
        let second = layout.ensure_user_dirs(3).unwrap();
        assert_eq!(first, second);
        assert!(first.image_dir.is_dir());
        assert!(first.video_dir.is_dir());
    }

    #[test]
    fn test_ensure_user_dirs_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("images");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let layout = MediaLayout::new(&blocker, dir.path().join("videos"));

        let err = layout.ensure_user_dirs(1).unwrap_err();
        let LayoutError::CreateDir { path, .. } = err;
        assert_eq!(path, blocker.join("1"));
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let layout = MediaLayout::new("/i", "/v");
        let a = layout.staging_video_path();
        let b = layout.staging_video_path();
        assert_ne!(a, b);
        assert!(a.starts_with("/v/.staging"));
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("Alice"), "Alice");
        assert_eq!(file_stem(" Jean Luc "), "Jean Luc");
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
        assert_eq!(file_stem(".."), "__");
        assert_eq!(file_stem(""), "profile");
    }
}
