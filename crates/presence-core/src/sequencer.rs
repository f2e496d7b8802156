//! Ordered challenge checklist state machine.
//!
//! A sequencer holds the randomized challenge list for one run and walks
//! through it: exactly one challenge is active at a time until the final one
//! is confirmed, after which the run is verified and no challenge is active.
//! The index only ever increases. `advance` must be called exactly once per
//! confirmed challenge — that discipline belongs to the confirmation logic
//! in [`crate::session`].

use rand::Rng;

use crate::challenge::{generate_plan, Challenge};
use crate::config::DetectionConfig;

#[derive(Debug, Clone)]
pub struct Sequencer {
    challenges: Vec<Challenge>,
    active: usize,
    verified: bool,
}

impl Sequencer {
    /// Generate a freshly randomized run.
    pub fn generate(config: &DetectionConfig, rng: &mut impl Rng) -> Self {
        Self {
            challenges: generate_plan(config, rng),
            active: 0,
            verified: false,
        }
    }

    /// Build a sequencer over a fixed challenge list. Test-only: production
    /// runs always go through [`Sequencer::generate`].
    #[cfg(test)]
    pub(crate) fn with_challenges(challenges: Vec<Challenge>) -> Self {
        Self {
            challenges,
            active: 0,
            verified: false,
        }
    }

    /// Full re-randomization, identical to generating a new run.
    pub fn reset(&mut self, config: &DetectionConfig, rng: &mut impl Rng) {
        *self = Self::generate(config, rng);
    }

    /// Move past the active challenge. On the last challenge this sets the
    /// verified flag and deactivates the run instead.
    pub fn advance(&mut self) {
        if self.verified {
            return;
        }
        if self.active + 1 < self.challenges.len() {
            self.active += 1;
        } else {
            self.verified = true;
        }
    }

    /// The currently active challenge, or `None` once verified.
    pub fn active_challenge(&self) -> Option<&Challenge> {
        if self.verified {
            None
        } else {
            self.challenges.get(self.active)
        }
    }

    /// Index of the active challenge, or `None` once verified.
    pub fn active_index(&self) -> Option<usize> {
        if self.verified {
            None
        } else {
            Some(self.active)
        }
    }

    /// The full challenge list for this run, in order.
    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    pub fn verified(&self) -> bool {
        self.verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn fixed_plan() -> Vec<Challenge> {
        vec![
            Challenge::MouthOpen {
                hold: Duration::from_secs(2),
            },
            Challenge::Blink { required: 3 },
            Challenge::Nod,
        ]
    }

    #[test]
    fn test_starts_at_first_challenge() {
        let seq = Sequencer::with_challenges(fixed_plan());
        assert_eq!(seq.active_index(), Some(0));
        assert!(!seq.verified());
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn test_advance_len_times_verifies() {
        let mut seq = Sequencer::with_challenges(fixed_plan());
        for i in 0..3 {
            assert!(!seq.verified(), "verified too early after {i} advances");
            seq.advance();
        }
        assert!(seq.verified());
        assert_eq!(seq.active_challenge(), None);
        assert_eq!(seq.active_index(), None);
    }

    #[test]
    fn test_fewer_advances_leave_unverified() {
        let mut seq = Sequencer::with_challenges(fixed_plan());
        seq.advance();
        seq.advance();
        assert!(!seq.verified());
        assert_eq!(seq.active_index(), Some(2));
    }

    #[test]
    fn test_index_only_increases() {
        let mut seq = Sequencer::with_challenges(fixed_plan());
        let mut last = seq.active_index().unwrap();
        while !seq.verified() {
            seq.advance();
            if let Some(idx) = seq.active_index() {
                assert!(idx > last);
                last = idx;
            }
        }
    }

    #[test]
    fn test_advance_after_verified_is_a_no_op() {
        let mut seq = Sequencer::with_challenges(fixed_plan());
        for _ in 0..3 {
            seq.advance();
        }
        seq.advance();
        assert!(seq.verified());
        assert_eq!(seq.active_challenge(), None);
    }

    #[test]
    fn test_reset_rerandomizes_and_clears_verified() {
        let config = DetectionConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut seq = Sequencer::generate(&config, &mut rng);
        while !seq.verified() {
            seq.advance();
        }

        seq.reset(&config, &mut rng);
        assert!(!seq.verified());
        assert_eq!(seq.active_index(), Some(0));
        assert_eq!(seq.len(), 3);
    }
}
