use rollcall_core::DetectionParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid detection parameters: {0}")]
    Detection(String),
    #[error("frame_rate must be finite and > 0, got {0}")]
    FrameRate(f32),
}

/// Enrollment configuration.
///
/// Resolved from defaults, then an optional `rollcall.toml`, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing the SCRFD ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root of the per-user profile image directories.
    pub image_root: PathBuf,
    /// Root of the per-user video clip directories.
    pub video_root: PathBuf,
    /// Sample budget of one enrollment session.
    pub frames_per_enroll: i64,
    /// Frames discarded before sampling (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Nominal frame rate recorded in the video manifest.
    pub frame_rate: f32,
    /// JPEG quality for the profile image and video frames (1–100).
    pub jpeg_quality: u8,
    pub detection: DetectionParams,
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub capture_width: Option<u32>,
    pub capture_height: Option<u32>,
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub image_root: Option<PathBuf>,
    pub video_root: Option<PathBuf>,
    pub frames_per_enroll: Option<i64>,
    pub warmup_frames: Option<usize>,
    pub frame_rate: Option<f32>,
    pub jpeg_quality: Option<u8>,
    pub detection: Option<DetectionFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionFile {
    pub scale_factor: Option<f32>,
    pub min_neighbors: Option<u32>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from the process environment and the config file it points at.
    ///
    /// The file is `$ROLLCALL_CONFIG`, else `<data_dir>/rollcall.toml` when present.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let data_dir = default_data_dir(&env);

        let file = match env("ROLLCALL_CONFIG") {
            Some(path) => Some(FileConfig::read(Path::new(&path))?),
            None => {
                let path = data_dir.join("rollcall.toml");
                if path.exists() {
                    Some(FileConfig::read(&path)?)
                } else {
                    None
                }
            }
        };

        Self::resolve(file.unwrap_or_default(), &data_dir, env)
    }

    /// Merge file values and environment overrides over the defaults.
    pub fn resolve(
        file: FileConfig,
        data_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let det = file.detection.unwrap_or_default();
        let defaults = DetectionParams::default();

        let detection = DetectionParams {
            scale_factor: env_parse(&env, "ROLLCALL_SCALE_FACTOR")
                .or(det.scale_factor)
                .unwrap_or(defaults.scale_factor),
            min_neighbors: env_parse(&env, "ROLLCALL_MIN_NEIGHBORS")
                .or(det.min_neighbors)
                .unwrap_or(defaults.min_neighbors),
            min_size: (
                env_parse(&env, "ROLLCALL_MIN_WIDTH")
                    .or(det.min_width)
                    .unwrap_or(defaults.min_size.0),
                env_parse(&env, "ROLLCALL_MIN_HEIGHT")
                    .or(det.min_height)
                    .unwrap_or(defaults.min_size.1),
            ),
        };
        detection.validate().map_err(ConfigError::Detection)?;

        let frame_rate = env_parse(&env, "ROLLCALL_FRAME_RATE")
            .or(file.frame_rate)
            .unwrap_or(20.0);
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(ConfigError::FrameRate(frame_rate));
        }

        let path = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        Ok(Self {
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: env_parse(&env, "ROLLCALL_CAPTURE_WIDTH")
                .or(file.capture_width)
                .unwrap_or(640),
            capture_height: env_parse(&env, "ROLLCALL_CAPTURE_HEIGHT")
                .or(file.capture_height)
                .unwrap_or(480),
            model_dir: path(
                "ROLLCALL_MODEL_DIR",
                file.model_dir,
                rollcall_core::default_model_dir(),
            ),
            db_path: path("ROLLCALL_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            image_root: path("ROLLCALL_IMAGE_ROOT", file.image_root, data_dir.join("images")),
            video_root: path("ROLLCALL_VIDEO_ROOT", file.video_root, data_dir.join("videos")),
            frames_per_enroll: env_parse(&env, "ROLLCALL_FRAMES_PER_ENROLL")
                .or(file.frames_per_enroll)
                .unwrap_or(150),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(4),
            frame_rate,
            jpeg_quality: env_parse::<u8>(&env, "ROLLCALL_JPEG_QUALITY")
                .or(file.jpeg_quality)
                .unwrap_or(90)
                .clamp(1, 100),
            detection,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg =
            Config::resolve(FileConfig::default(), Path::new("/data"), env_from(&[])).unwrap();
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!(cfg.db_path, PathBuf::from("/data/attendance.db"));
        assert_eq!(cfg.image_root, PathBuf::from("/data/images"));
        assert_eq!(cfg.video_root, PathBuf::from("/data/videos"));
        assert_eq!(cfg.frames_per_enroll, 150);
        assert_eq!(cfg.frame_rate, 20.0);
        assert_eq!(cfg.detection, DetectionParams::default());
    }

    #[test]
    fn test_file_values_apply() {
        let file: FileConfig = toml::from_str(
            r#"
            camera_device = "/dev/video4"
            frames_per_enroll = 30

            [detection]
            min_neighbors = 3
            min_width = 48
            "#,
        )
        .unwrap();
        let cfg = Config::resolve(file, Path::new("/data"), env_from(&[])).unwrap();
        assert_eq!(cfg.camera_device, "/dev/video4");
        assert_eq!(cfg.frames_per_enroll, 30);
        assert_eq!(cfg.detection.min_neighbors, 3);
        assert_eq!(cfg.detection.min_size, (48, 30));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str("frames_per_enroll = 30").unwrap();
        let env = env_from(&[
            ("ROLLCALL_FRAMES_PER_ENROLL", "7"),
            ("ROLLCALL_DB_PATH", "/tmp/x.db"),
        ]);
        let cfg = Config::resolve(file, Path::new("/data"), env).unwrap();
        assert_eq!(cfg.frames_per_enroll, 7);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let env = env_from(&[("ROLLCALL_WARMUP_FRAMES", "lots")]);
        let cfg = Config::resolve(FileConfig::default(), Path::new("/data"), env).unwrap();
        assert_eq!(cfg.warmup_frames, 4);
    }

    #[test]
    fn test_invalid_detection_rejected() {
        let env = env_from(&[("ROLLCALL_SCALE_FACTOR", "0.9")]);
        let err = Config::resolve(FileConfig::default(), Path::new("/data"), env).unwrap_err();
        assert!(matches!(err, ConfigError::Detection(_)));
    }

    #[test]
    fn test_invalid_frame_rate_rejected() {
        for value in ["0", "-5", "NaN", "inf"] {
            let env = env_from(&[("ROLLCALL_FRAME_RATE", value)]);
            let err = Config::resolve(FileConfig::default(), Path::new("/data"), env).unwrap_err();
            assert!(matches!(err, ConfigError::FrameRate(_)), "{value}");
        }
        let file: FileConfig = toml::from_str("frame_rate = 0.0").unwrap();
        let err = Config::resolve(file, Path::new("/data"), env_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::FrameRate(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
    }

    #[test]
    fn test_data_dir_prefers_xdg() {
        let env = env_from(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/u")]);
        assert_eq!(default_data_dir(&env), PathBuf::from("/xdg/rollcall"));
        let env = env_from(&[("HOME", "/home/u")]);
        assert_eq!(
            default_data_dir(&env),
            PathBuf::from("/home/u/.local/share/rollcall")
        );
    }

    #[test]
    fn test_read_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "frames_per_enroll = \"many\"").unwrap();
        assert!(matches!(FileConfig::read(&path), Err(ConfigError::Parse { .. })));
    }
}
