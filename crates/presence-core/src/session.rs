//! Per-frame gesture confirmation over a challenge run.
//!
//! A [`Session`] owns one sequencer plus the progress state of whatever
//! challenge is active, and is fed one observation per camera tick through
//! [`Session::observe`]. All cross-tick memory (hold start, eye phase, blink
//! count, nod baseline) lives in explicit fields here; behavior is a function
//! of the observation stream and its timestamps, with no timers or delayed
//! callbacks involved.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::challenge::{Challenge, ChallengeKind};
use crate::config::{ConfigError, DetectionConfig};
use crate::geometry::{self, Point};
use crate::sequencer::Sequencer;

/// What a single observed frame did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOutcome {
    /// No face was detected this frame; nothing was evaluated.
    NoFace,
    /// A face was present but the geometry was unusable (missing landmark
    /// or degenerate reference distance); the frame was skipped.
    NoReading,
    /// The frame was evaluated and the active challenge is still in progress.
    Pending,
    /// The frame confirmed the active challenge; a new one is now active.
    ChallengePassed,
    /// The session is verified — either this frame confirmed the final
    /// challenge, or it already was verified.
    Verified,
}

/// Eye closure phase for blink confirmation.
///
/// A closure is counted exactly once, on the `Closing` → `Closed`
/// transition; from `Closed`, only a reopening leads back to `Open`, so a
/// new count cannot begin until the eyes have visibly reopened.
#[derive(Debug, Clone, Copy, PartialEq)]
enum EyePhase {
    Open,
    Closing { since: Duration },
    Closed,
}

/// Progress of the active challenge. Replaced wholesale whenever the active
/// challenge changes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Progress {
    MouthOpen { open_since: Option<Duration> },
    Blink { count: u32, phase: EyePhase },
    Nod { baseline: Option<f32> },
    Done,
}

impl Progress {
    fn for_challenge(challenge: &Challenge) -> Self {
        match challenge {
            Challenge::MouthOpen { .. } => Progress::MouthOpen { open_since: None },
            Challenge::Blink { .. } => Progress::Blink {
                count: 0,
                phase: EyePhase::Open,
            },
            Challenge::Nod => Progress::Nod { baseline: None },
        }
    }
}

/// One liveness verification run.
pub struct Session {
    config: DetectionConfig,
    sequencer: Sequencer,
    progress: Progress,
}

impl Session {
    /// Create a session with a freshly randomized challenge plan.
    pub fn new(config: DetectionConfig, rng: &mut impl Rng) -> Result<Self, ConfigError> {
        config.validate()?;
        let sequencer = Sequencer::generate(&config, rng);
        let progress = match sequencer.active_challenge() {
            Some(challenge) => Progress::for_challenge(challenge),
            None => Progress::Done,
        };
        Ok(Self {
            config,
            sequencer,
            progress,
        })
    }

    /// Re-randomize the challenge plan and clear all progress, allowing a
    /// fresh run after verification (or at any point before it).
    pub fn reset(&mut self, rng: &mut impl Rng) {
        self.sequencer.reset(&self.config, rng);
        self.progress = match self.sequencer.active_challenge() {
            Some(challenge) => Progress::for_challenge(challenge),
            None => Progress::Done,
        };
        debug!("session reset with a fresh challenge plan");
    }

    /// Feed one frame's observation into the session.
    ///
    /// `landmarks` is `None` when no face was detected this frame; such
    /// frames are skipped without touching progress. `at` is the time since
    /// session start and must not decrease between calls.
    pub fn observe(&mut self, landmarks: Option<&[Point]>, at: Duration) -> FrameOutcome {
        if self.sequencer.verified() {
            return FrameOutcome::Verified;
        }
        let Some(landmarks) = landmarks else {
            return FrameOutcome::NoFace;
        };
        let Some(challenge) = self.sequencer.active_challenge().copied() else {
            return FrameOutcome::Verified;
        };

        let confirmed = match (challenge, &mut self.progress) {
            (Challenge::MouthOpen { hold }, Progress::MouthOpen { open_since }) => {
                let Some(mar) = geometry::mouth_aspect_ratio(landmarks) else {
                    return FrameOutcome::NoReading;
                };
                if mar > self.config.mar_open_threshold {
                    let since = *open_since.get_or_insert(at);
                    at.saturating_sub(since) >= hold
                } else {
                    // The hold must be continuous: any closed frame restarts it.
                    *open_since = None;
                    false
                }
            }
            (Challenge::Blink { required }, Progress::Blink { count, phase }) => {
                let Some(ear) = geometry::eye_aspect_ratio(landmarks) else {
                    return FrameOutcome::NoReading;
                };
                let closed = ear < self.config.ear_close_threshold;
                match *phase {
                    EyePhase::Open => {
                        if closed {
                            *phase = EyePhase::Closing { since: at };
                        }
                    }
                    EyePhase::Closing { since } => {
                        if !closed {
                            // Reopened before the confirmation delay: noise.
                            *phase = EyePhase::Open;
                        } else if at.saturating_sub(since) >= self.config.blink_confirm_delay {
                            *count += 1;
                            *phase = EyePhase::Closed;
                            debug!(count = *count, required, "blink confirmed");
                        }
                    }
                    EyePhase::Closed => {
                        if !closed {
                            *phase = EyePhase::Open;
                        }
                    }
                }
                *count >= required
            }
            (Challenge::Nod, Progress::Nod { baseline }) => {
                let Some(nose_y) = geometry::nose_tip_y(landmarks) else {
                    return FrameOutcome::NoReading;
                };
                match *baseline {
                    None => {
                        *baseline = Some(nose_y);
                        false
                    }
                    Some(base) => (nose_y - base).abs() > self.config.nod_min_displacement,
                }
            }
            // Progress is reinitialized on every challenge change, so the
            // pairs above are exhaustive in practice.
            _ => {
                debug_assert!(false, "progress out of sync with active challenge");
                false
            }
        };

        if confirmed {
            self.advance_active()
        } else {
            FrameOutcome::Pending
        }
    }

    /// Confirm the active challenge: advance the sequencer and reinitialize
    /// progress for whatever is active next.
    fn advance_active(&mut self) -> FrameOutcome {
        self.sequencer.advance();
        match self.sequencer.active_challenge() {
            Some(next) => {
                self.progress = Progress::for_challenge(next);
                debug!(next = ?next.kind(), "challenge confirmed");
                FrameOutcome::ChallengePassed
            }
            None => {
                self.progress = Progress::Done;
                debug!("final challenge confirmed, session verified");
                FrameOutcome::Verified
            }
        }
    }

    pub fn verified(&self) -> bool {
        self.sequencer.verified()
    }

    pub fn active_challenge(&self) -> Option<&Challenge> {
        self.sequencer.active_challenge()
    }

    /// The full challenge list for this run, in order.
    pub fn challenges(&self) -> &[Challenge] {
        self.sequencer.challenges()
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Read-only snapshot of the run for the presentation layer.
    pub fn status(&self) -> SessionStatus {
        let active = self.sequencer.active_challenge();
        let progress = match (active, &self.progress) {
            (Some(Challenge::MouthOpen { hold }), Progress::MouthOpen { open_since }) => {
                Some(ChallengeProgress::MouthOpen {
                    holding: open_since.is_some(),
                    required_secs: hold.as_secs_f32(),
                })
            }
            (Some(Challenge::Blink { required }), Progress::Blink { count, .. }) => {
                Some(ChallengeProgress::Blink {
                    count: *count,
                    required: *required,
                })
            }
            (Some(Challenge::Nod), Progress::Nod { baseline }) => Some(ChallengeProgress::Nod {
                baseline_recorded: baseline.is_some(),
            }),
            _ => None,
        };

        SessionStatus {
            verified: self.sequencer.verified(),
            challenge_index: self.sequencer.active_index(),
            challenge_total: self.sequencer.len(),
            kind: active.map(Challenge::kind),
            instruction: active.map(Challenge::instruction),
            progress,
        }
    }
}

/// Read-only session state exposed to presentation clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub verified: bool,
    pub challenge_index: Option<usize>,
    pub challenge_total: usize,
    pub kind: Option<ChallengeKind>,
    pub instruction: Option<String>,
    pub progress: Option<ChallengeProgress>,
}

/// Typed progress of the active challenge, for display ("2/4 blinks").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeProgress {
    MouthOpen { holding: bool, required_secs: f32 },
    Blink { count: u32, required: u32 },
    Nod { baseline_recorded: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::synthetic_face;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn session_with(challenges: Vec<Challenge>) -> Session {
        let sequencer = Sequencer::with_challenges(challenges);
        let progress = Progress::for_challenge(sequencer.active_challenge().unwrap());
        Session {
            config: DetectionConfig::default(),
            sequencer,
            progress,
        }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    // Feature frames around the default thresholds (EAR 0.25, MAR 0.50).
    fn neutral() -> Vec<Point> {
        synthetic_face(0.30, 0.10, 65.0)
    }

    fn mouth_open() -> Vec<Point> {
        synthetic_face(0.30, 0.80, 65.0)
    }

    fn eyes_closed() -> Vec<Point> {
        synthetic_face(0.10, 0.10, 65.0)
    }

    fn nose_at(y: f32) -> Vec<Point> {
        synthetic_face(0.30, 0.10, y)
    }

    #[test]
    fn test_mouth_hold_confirms_after_continuous_duration() {
        let mut s = session_with(vec![
            Challenge::MouthOpen {
                hold: secs(2.0),
            },
            Challenge::Nod,
        ]);

        for t in [0.0, 0.5, 1.0, 1.5, 1.9] {
            assert_eq!(s.observe(Some(&mouth_open()), secs(t)), FrameOutcome::Pending);
        }
        assert_eq!(
            s.observe(Some(&mouth_open()), secs(2.0)),
            FrameOutcome::ChallengePassed
        );
        assert_eq!(s.active_challenge(), Some(&Challenge::Nod));
    }

    #[test]
    fn test_mouth_gap_restarts_hold() {
        let mut s = session_with(vec![
            Challenge::MouthOpen {
                hold: secs(2.0),
            },
            Challenge::Nod,
        ]);

        assert_eq!(s.observe(Some(&mouth_open()), secs(0.0)), FrameOutcome::Pending);
        assert_eq!(s.observe(Some(&mouth_open()), secs(1.0)), FrameOutcome::Pending);
        // Mouth closes at the midpoint: the accumulated second must not carry over.
        assert_eq!(s.observe(Some(&neutral()), secs(1.1)), FrameOutcome::Pending);
        assert_eq!(s.observe(Some(&mouth_open()), secs(1.2)), FrameOutcome::Pending);
        assert_eq!(s.observe(Some(&mouth_open()), secs(3.1)), FrameOutcome::Pending);
        assert_eq!(
            s.observe(Some(&mouth_open()), secs(3.2)),
            FrameOutcome::ChallengePassed
        );
    }

    #[test]
    fn test_final_challenge_confirmation_verifies() {
        let mut s = session_with(vec![Challenge::MouthOpen { hold: secs(2.0) }]);
        assert_eq!(s.observe(Some(&mouth_open()), secs(0.0)), FrameOutcome::Pending);
        assert_eq!(
            s.observe(Some(&mouth_open()), secs(2.1)),
            FrameOutcome::Verified
        );
        assert!(s.verified());
        assert_eq!(s.active_challenge(), None);
    }

    #[test]
    fn test_blink_clean_cycles_count_once_each() {
        let mut s = session_with(vec![Challenge::Blink { required: 3 }, Challenge::Nod]);

        for (i, base) in [0.0f32, 1.0, 2.0].iter().enumerate() {
            assert_eq!(
                s.observe(Some(&eyes_closed()), secs(base + 0.0)),
                FrameOutcome::Pending
            );
            // Still closed past the confirmation delay: the blink is counted here.
            let outcome = s.observe(Some(&eyes_closed()), secs(base + 0.6));
            if i < 2 {
                assert_eq!(outcome, FrameOutcome::Pending);
                assert_eq!(s.observe(Some(&neutral()), secs(base + 0.8)), FrameOutcome::Pending);
                let status = s.status();
                assert_eq!(
                    status.progress,
                    Some(ChallengeProgress::Blink {
                        count: i as u32 + 1,
                        required: 3
                    })
                );
            } else {
                assert_eq!(outcome, FrameOutcome::ChallengePassed);
            }
        }
        assert_eq!(s.active_challenge(), Some(&Challenge::Nod));
    }

    #[test]
    fn test_blink_brief_flicker_not_counted() {
        let mut s = session_with(vec![Challenge::Blink { required: 2 }, Challenge::Nod]);

        // Closed for a single 100 ms frame, well under the 500 ms delay.
        s.observe(Some(&eyes_closed()), secs(0.0));
        s.observe(Some(&neutral()), secs(0.1));
        s.observe(Some(&neutral()), secs(0.2));

        assert_eq!(
            s.status().progress,
            Some(ChallengeProgress::Blink {
                count: 0,
                required: 2
            })
        );
    }

    #[test]
    fn test_blink_long_closure_counted_once() {
        let mut s = session_with(vec![Challenge::Blink { required: 2 }, Challenge::Nod]);

        // Eyes held closed for 2.4 s: one count, not four.
        for t in [0.0, 0.6, 1.2, 1.8, 2.4] {
            s.observe(Some(&eyes_closed()), secs(t));
        }
        assert_eq!(
            s.status().progress,
            Some(ChallengeProgress::Blink {
                count: 1,
                required: 2
            })
        );

        // Reopen, then a second clean closure counts again.
        s.observe(Some(&neutral()), secs(2.6));
        s.observe(Some(&eyes_closed()), secs(2.7));
        assert_eq!(
            s.observe(Some(&eyes_closed()), secs(3.3)),
            FrameOutcome::ChallengePassed
        );
    }

    #[test]
    fn test_no_face_frames_skip_without_resetting_progress() {
        let mut s = session_with(vec![
            Challenge::MouthOpen {
                hold: secs(2.0),
            },
            Challenge::Nod,
        ]);

        assert_eq!(s.observe(Some(&mouth_open()), secs(0.0)), FrameOutcome::Pending);
        assert_eq!(s.observe(None, secs(0.5)), FrameOutcome::NoFace);
        assert_eq!(s.observe(None, secs(1.0)), FrameOutcome::NoFace);
        // The hold started at t=0 and was not reset by the missing frames.
        assert_eq!(
            s.observe(Some(&mouth_open()), secs(2.0)),
            FrameOutcome::ChallengePassed
        );
    }

    #[test]
    fn test_degenerate_geometry_skips_frame() {
        let mut s = session_with(vec![Challenge::Blink { required: 1 }, Challenge::Nod]);

        s.observe(Some(&eyes_closed()), secs(0.0));

        // Collapsed eye corners: unusable reading, progress untouched.
        let mut degenerate = eyes_closed();
        degenerate[133] = degenerate[33];
        assert_eq!(
            s.observe(Some(&degenerate), secs(0.3)),
            FrameOutcome::NoReading
        );

        // The closure that began at t=0 still confirms on schedule.
        assert_eq!(
            s.observe(Some(&eyes_closed()), secs(0.6)),
            FrameOutcome::ChallengePassed
        );
    }

    #[test]
    fn test_nod_confirms_once_on_displacement() {
        let mut s = session_with(vec![Challenge::Nod, Challenge::Blink { required: 2 }]);

        // First usable frame records the baseline.
        assert_eq!(s.observe(Some(&nose_at(65.0)), secs(0.0)), FrameOutcome::Pending);
        // Displacement below threshold.
        assert_eq!(s.observe(Some(&nose_at(70.0)), secs(0.1)), FrameOutcome::Pending);
        // Past the 10 px threshold.
        assert_eq!(
            s.observe(Some(&nose_at(80.0)), secs(0.2)),
            FrameOutcome::ChallengePassed
        );
        // Continued displacement does not re-fire: the blink challenge is active now.
        assert_eq!(s.observe(Some(&nose_at(80.0)), secs(0.3)), FrameOutcome::Pending);
        assert_eq!(s.active_challenge(), Some(&Challenge::Blink { required: 2 }));
    }

    #[test]
    fn test_nod_without_motion_never_confirms() {
        let mut s = session_with(vec![Challenge::Nod, Challenge::Blink { required: 2 }]);
        for i in 0..50 {
            assert_eq!(
                s.observe(Some(&nose_at(65.0)), secs(i as f32 * 0.1)),
                FrameOutcome::Pending
            );
        }
        assert!(!s.verified());
    }

    #[test]
    fn test_end_to_end_mouth_then_blinks() {
        // The full scripted scenario: mouth held 2.1 s, then three blinks.
        let mut s = session_with(vec![
            Challenge::MouthOpen {
                hold: secs(2.0),
            },
            Challenge::Blink { required: 3 },
        ]);

        let mut passed = false;
        for step in 0..=7 {
            let outcome = s.observe(Some(&mouth_open()), secs(step as f32 * 0.3));
            if outcome == FrameOutcome::ChallengePassed {
                passed = true;
            }
        }
        assert!(passed, "mouth hold never confirmed");
        assert!(!s.verified());

        for base in [3.0f32, 4.0, 5.0] {
            s.observe(Some(&eyes_closed()), secs(base));
            let outcome = s.observe(Some(&eyes_closed()), secs(base + 0.6));
            if base < 5.0 {
                assert_eq!(outcome, FrameOutcome::Pending);
                s.observe(Some(&neutral()), secs(base + 0.8));
            } else {
                assert_eq!(outcome, FrameOutcome::Verified);
            }
        }
        assert!(s.verified());
    }

    #[test]
    fn test_observe_after_verified_is_a_no_op() {
        let mut s = session_with(vec![Challenge::Nod]);
        s.observe(Some(&nose_at(65.0)), secs(0.0));
        assert_eq!(
            s.observe(Some(&nose_at(80.0)), secs(0.1)),
            FrameOutcome::Verified
        );
        assert_eq!(
            s.observe(Some(&nose_at(200.0)), secs(0.2)),
            FrameOutcome::Verified
        );
        assert_eq!(s.observe(None, secs(0.3)), FrameOutcome::Verified);
        assert!(s.verified());
    }

    #[test]
    fn test_status_reflects_run_shape() {
        let mut s = session_with(vec![Challenge::Blink { required: 4 }, Challenge::Nod]);

        let status = s.status();
        assert!(!status.verified);
        assert_eq!(status.challenge_index, Some(0));
        assert_eq!(status.challenge_total, 2);
        assert_eq!(status.kind, Some(ChallengeKind::Blink));
        assert!(status.instruction.as_deref().unwrap().contains("4 times"));

        s.observe(Some(&eyes_closed()), secs(0.0));
        s.observe(Some(&eyes_closed()), secs(0.6));
        assert_eq!(
            s.status().progress,
            Some(ChallengeProgress::Blink {
                count: 1,
                required: 4
            })
        );
    }

    #[test]
    fn test_reset_allows_a_fresh_run() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut s = session_with(vec![Challenge::Nod]);
        s.observe(Some(&nose_at(65.0)), secs(0.0));
        s.observe(Some(&nose_at(80.0)), secs(0.1));
        assert!(s.verified());

        s.reset(&mut rng);
        assert!(!s.verified());
        let status = s.status();
        assert_eq!(status.challenge_index, Some(0));
        assert_eq!(status.challenge_total, 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = DetectionConfig {
            blink_count_min: 0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Session::new(config, &mut rng).is_err());
    }

    #[test]
    fn test_status_serde_roundtrip() {
        let s = session_with(vec![Challenge::Blink { required: 3 }, Challenge::Nod]);
        let json = serde_json::to_string(&s.status()).unwrap();
        let back: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s.status());
    }
}
