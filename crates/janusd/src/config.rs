use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Roster CSV mapping trained serials to identities.
    pub roster_path: PathBuf,
    /// Directory holding the per-date attendance partitions.
    pub attendance_dir: PathBuf,
    /// Recognition model artifact (LBP template gallery).
    pub model_path: PathBuf,
    /// V4L2 device path for the recognition feed.
    pub camera_device: String,
    /// Serial device of the door actuator.
    pub actuator_device: PathBuf,
    pub actuator_baud: u32,
    /// Acceptance boundary; matcher scores below this are trusted.
    pub confidence_threshold: f32,
    /// Seconds after a successful open before the door auto-closes.
    pub auto_close_secs: u64,
    /// Bounded timeout for actuator reads.
    pub connect_timeout_secs: u64,
    /// Post-connect delay before the firmware accepts commands.
    pub settle_secs: u64,
}

impl Config {
    /// Load configuration from `JANUS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("janus");

        Self {
            roster_path: env_path("JANUS_ROSTER_PATH", data_dir.join("roster.csv")),
            attendance_dir: env_path("JANUS_ATTENDANCE_DIR", data_dir.join("attendance")),
            model_path: env_path("JANUS_MODEL_PATH", data_dir.join("templates.json")),
            camera_device: std::env::var("JANUS_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            actuator_device: env_path("JANUS_ACTUATOR_DEVICE", PathBuf::from("/dev/ttyUSB0")),
            actuator_baud: env_u32("JANUS_ACTUATOR_BAUD", 9600),
            confidence_threshold: env_f32("JANUS_CONFIDENCE_THRESHOLD", 65.0),
            auto_close_secs: env_u64("JANUS_AUTO_CLOSE_SECS", 4),
            connect_timeout_secs: env_u64("JANUS_CONNECT_TIMEOUT_SECS", 1),
            settle_secs: env_u64("JANUS_SETTLE_SECS", 2),
        }
    }

    pub fn auto_close_delay(&self) -> Duration {
        Duration::from_secs(self.auto_close_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
