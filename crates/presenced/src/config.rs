use std::time::Duration;

use presence_core::DetectionConfig;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Detection thresholds and timing rules applied to every session.
    pub detection: DetectionConfig,
    /// Idle time after which a session is considered abandoned.
    pub session_timeout: Duration,
    /// Maximum number of live sessions across all users.
    pub max_sessions: usize,
    /// Whether the daemon is running on the session bus (development mode).
    /// UID validation is skipped on the session bus — all callers share the same user.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = DetectionConfig::default();
        let detection = DetectionConfig {
            ear_close_threshold: env_f32("PRESENCE_EAR_THRESHOLD", defaults.ear_close_threshold),
            mar_open_threshold: env_f32("PRESENCE_MAR_THRESHOLD", defaults.mar_open_threshold),
            nod_min_displacement: env_f32("PRESENCE_NOD_THRESHOLD", defaults.nod_min_displacement),
            mouth_hold: Duration::from_secs_f32(
                env_f32("PRESENCE_MOUTH_HOLD_SECS", 2.0).max(0.0),
            ),
            blink_confirm_delay: Duration::from_millis(env_u64("PRESENCE_BLINK_DELAY_MS", 500)),
            blink_count_min: env_u32("PRESENCE_BLINK_MIN", defaults.blink_count_min),
            blink_count_max: env_u32("PRESENCE_BLINK_MAX", defaults.blink_count_max),
        };

        Self {
            detection,
            session_timeout: Duration::from_secs(env_u64("PRESENCE_SESSION_TIMEOUT_SECS", 60)),
            max_sessions: env_usize("PRESENCE_MAX_SESSIONS", 32),
            session_bus: std::env::var("PRESENCE_SESSION_BUS").is_ok(),
        }
    }
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

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
