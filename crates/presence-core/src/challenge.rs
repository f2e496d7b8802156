//! Gesture challenges and randomized challenge plans.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;

/// The gesture a challenge asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    MouthOpen,
    Blink,
    Nod,
}

/// One gesture test, with its kind-specific parameters. Immutable once
/// generated; progress is tracked separately by the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Challenge {
    /// Keep the mouth open continuously for the given duration.
    MouthOpen { hold: Duration },
    /// Blink the given number of times.
    Blink { required: u32 },
    /// Move the head vertically past the displacement threshold.
    Nod,
}

impl Challenge {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            Challenge::MouthOpen { .. } => ChallengeKind::MouthOpen,
            Challenge::Blink { .. } => ChallengeKind::Blink,
            Challenge::Nod => ChallengeKind::Nod,
        }
    }

    /// Human-readable instruction text for the presentation layer.
    pub fn instruction(&self) -> String {
        match self {
            Challenge::MouthOpen { hold } => format!(
                "Please open your mouth wide for {:.0} seconds.",
                hold.as_secs_f32()
            ),
            Challenge::Blink { required } => {
                format!("Please blink your eyes {required} times.")
            }
            Challenge::Nod => "Please nod your head.".to_string(),
        }
    }
}

/// Generate a fresh challenge plan: a uniform shuffle of the full kind list,
/// with each blink challenge assigned a required count drawn uniformly from
/// the configured inclusive range.
pub fn generate_plan(config: &DetectionConfig, rng: &mut impl Rng) -> Vec<Challenge> {
    let mut kinds = [ChallengeKind::MouthOpen, ChallengeKind::Blink, ChallengeKind::Nod];
    kinds.shuffle(rng);

    kinds
        .iter()
        .map(|kind| match kind {
            ChallengeKind::MouthOpen => Challenge::MouthOpen {
                hold: config.mouth_hold,
            },
            ChallengeKind::Blink => Challenge::Blink {
                required: rng.gen_range(config.blink_count_min..=config.blink_count_max),
            },
            ChallengeKind::Nod => Challenge::Nod,
        })
        .collect()
}
