use std::time::Duration;
use thiserror::Error;

/// Detection thresholds and timing rules for one liveness session.
///
/// Fixed for the lifetime of a session; validated before use. EAR and MAR
/// thresholds are scale-free ratios, the nod threshold is absolute pixels
/// in the landmark coordinate space.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// EAR at or below which the eyes count as closed.
    pub ear_close_threshold: f32,
    /// MAR above which the mouth counts as open.
    pub mar_open_threshold: f32,
    /// Minimum vertical nose-tip displacement (pixels) that counts as a nod.
    pub nod_min_displacement: f32,
    /// How long the mouth must stay open, continuously.
    pub mouth_hold: Duration,
    /// How long the eyes must stay closed before a blink is counted.
    pub blink_confirm_delay: Duration,
    /// Lower bound (inclusive) for the randomized required blink count.
    pub blink_count_min: u32,
    /// Upper bound (inclusive) for the randomized required blink count.
    pub blink_count_max: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ear_close_threshold: 0.25,
            mar_open_threshold: 0.50,
            nod_min_displacement: 10.0,
            mouth_hold: Duration::from_secs(2),
            blink_confirm_delay: Duration::from_millis(500),
            blink_count_min: 2,
            blink_count_max: 5,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a positive finite number, got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },
    #[error("mouth hold duration must be non-zero")]
    ZeroMouthHold,
    #[error("blink confirmation delay must be non-zero")]
    ZeroBlinkDelay,
    #[error("blink count range [{min}, {max}] is empty or starts below 1")]
    InvalidBlinkRange { min: u32, max: u32 },
}

impl DetectionConfig {
    /// Reject configurations that would make confirmation predicates
    /// vacuous or panic at challenge generation time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("ear_close_threshold", self.ear_close_threshold),
            ("mar_open_threshold", self.mar_open_threshold),
            ("nod_min_displacement", self.nod_min_displacement),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.mouth_hold.is_zero() {
            return Err(ConfigError::ZeroMouthHold);
        }
        if self.blink_confirm_delay.is_zero() {
            return Err(ConfigError::ZeroBlinkDelay);
        }
        if self.blink_count_min < 1 || self.blink_count_min > self.blink_count_max {
            return Err(ConfigError::InvalidBlinkRange {
                min: self.blink_count_min,
                max: self.blink_count_max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        DetectionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let config = DetectionConfig {
            ear_close_threshold: f32::NAN,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidThreshold {
                name: "ear_close_threshold",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        let config = DetectionConfig {
            nod_min_displacement: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = DetectionConfig {
            mouth_hold: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ZeroMouthHold
        ));

        let config = DetectionConfig {
            blink_confirm_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ZeroBlinkDelay
        ));
    }

    #[test]
    fn test_rejects_inverted_blink_range() {
        let config = DetectionConfig {
            blink_count_min: 6,
            blink_count_max: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidBlinkRange { min: 6, max: 5 }
        ));
    }

    #[test]
    fn test_rejects_zero_blink_minimum() {
        let config = DetectionConfig {
            blink_count_min: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
