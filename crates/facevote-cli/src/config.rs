use facevote_core::detector::{DEFAULT_MIN_FACE_SIZE, DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR};
use facevote_core::enrollment::{DEFAULT_CAPTURE_WINDOW, DEFAULT_SAMPLES_REQUIRED};
use facevote_core::index::DEFAULT_NEIGHBORS;
use facevote_core::DetectorParams;
use std::path::PathBuf;
use std::time::Duration;

/// Station configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to an OpenCV Haar cascade, e.g. `haarcascade_frontalface_default.xml`.
    pub cascade_path: PathBuf,
    pub scale_factor: f32,
    pub min_neighbors: usize,
    /// Smallest face side, in pixels. 0 starts at the cascade window.
    pub min_face_size: u32,
    /// Samples an enrollment must collect.
    pub samples_required: usize,
    /// k for nearest-neighbor matching.
    pub neighbors: usize,
    /// Maximum frames consumed per enroll attempt.
    pub frames_per_enroll: usize,
    pub db_busy_timeout_ms: u64,
    /// Valid ballot choices. Empty accepts any non-blank choice.
    pub choices: Vec<String>,
}

impl Config {
    /// Load configuration from `FACEVOTE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facevote");

        Self {
            db_path: env_path("FACEVOTE_DB_PATH").unwrap_or_else(|| data_dir.join("facevote.db")),
            cascade_path: env_path("FACEVOTE_CASCADE_PATH")
                .unwrap_or_else(|| data_dir.join("haarcascade_frontalface_default.xml")),
            scale_factor: env_parse("FACEVOTE_SCALE_FACTOR", DEFAULT_SCALE_FACTOR),
            min_neighbors: env_parse("FACEVOTE_MIN_NEIGHBORS", DEFAULT_MIN_NEIGHBORS),
            min_face_size: env_parse("FACEVOTE_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            samples_required: env_parse("FACEVOTE_SAMPLES_REQUIRED", DEFAULT_SAMPLES_REQUIRED),
            neighbors: env_parse("FACEVOTE_NEIGHBORS", DEFAULT_NEIGHBORS),
            frames_per_enroll: env_parse("FACEVOTE_FRAMES_PER_ENROLL", DEFAULT_CAPTURE_WINDOW),
            db_busy_timeout_ms: env_parse("FACEVOTE_DB_BUSY_TIMEOUT_MS", 5000),
            choices: std::env::var("FACEVOTE_CHOICES")
                .map(|v| parse_choices(&v))
                .unwrap_or_default(),
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_face_size,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_choices(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}
