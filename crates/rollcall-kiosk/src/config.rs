use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Kiosk configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Enrolled faces, one sub-directory per person.
    pub faces_dir: PathBuf,
    /// Lens calibration TOML. Missing file means no undistortion.
    pub calibration_path: PathBuf,
    /// Path to the SQLite attendance ledger.
    pub db_path: PathBuf,
    /// Submit every Nth frame for recognition.
    pub sampling_interval: u64,
    /// Frames are downsampled to at most this width before recognition.
    pub inference_width: u32,
    /// Cosine similarity needed to name someone.
    pub match_threshold: f32,
    /// Confidence a result must exceed to be logged.
    pub log_threshold: f32,
    pub shutdown_grace: Duration,
    /// Preview JPEG written while not headless.
    pub snapshot_path: PathBuf,
    pub snapshot_every: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let var = &var;
        let path = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

        Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: env_parse(var, "ROLLCALL_CAPTURE_WIDTH", 640),
            capture_height: env_parse(var, "ROLLCALL_CAPTURE_HEIGHT", 480),
            model_dir: path("ROLLCALL_MODEL_DIR", rollcall_core::default_model_dir()),
            faces_dir: path("ROLLCALL_FACES_DIR", PathBuf::from("data/faces")),
            calibration_path: path("ROLLCALL_CALIBRATION", PathBuf::from("data/calibration.toml")),
            db_path: path("ROLLCALL_DB_PATH", rollcall_ledger::default_db_path()),
            sampling_interval: env_parse(var, "ROLLCALL_SAMPLING_INTERVAL", 20u64).max(1),
            inference_width: env_parse(var, "ROLLCALL_INFERENCE_WIDTH", 320),
            match_threshold: env_parse(var, "ROLLCALL_MATCH_THRESHOLD", 0.40),
            log_threshold: env_parse(var, "ROLLCALL_LOG_THRESHOLD", 0.50),
            shutdown_grace: Duration::from_millis(env_parse(var, "ROLLCALL_SHUTDOWN_GRACE_MS", 2000)),
            snapshot_path: path(
                "ROLLCALL_SNAPSHOT_PATH",
                std::env::temp_dir().join("rollcall-preview.jpg"),
            ),
            snapshot_every: env_parse(var, "ROLLCALL_SNAPSHOT_EVERY", 15),
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the FER+ emotion model.
    pub fn emotion_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::EMOTION_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_parse<T: FromStr>(var: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
