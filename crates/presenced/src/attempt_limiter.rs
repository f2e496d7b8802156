use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Abandoned sessions tolerated within WINDOW before lockout.
const MAX_ABANDONED: u32 = 3;
/// Sliding window over which abandonment is counted.
const WINDOW: Duration = Duration::from_secs(120);
/// Lockout duration once the limit is hit.
const LOCKOUT: Duration = Duration::from_secs(300);

struct UserRecord {
    abandoned: Vec<Instant>,
    locked_until: Option<Instant>,
}

/// Per-user limiter on liveness attempts.
///
/// A session that expires without reaching verification counts as an
/// abandoned attempt; MAX_ABANDONED of those within WINDOW locks the user
/// out of starting new sessions for LOCKOUT.  User-initiated resets and
/// engine errors are not counted — only silent walk-aways are.
pub struct AttemptLimiter {
    records: HashMap<String, UserRecord>,
}

impl AttemptLimiter {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Return `Ok(())` if the user may start a session.
    /// Return `Err(message)` if the user is currently locked out.
    pub fn check(&mut self, user: &str) -> Result<(), String> {
        let now = Instant::now();
        let Some(record) = self.records.get_mut(user) else {
            return Ok(());
        };

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                let remaining = locked_until.duration_since(now).as_secs();
                return Err(format!(
                    "too many abandoned attempts; try again in {remaining}s"
                ));
            }
            // Lockout expired — forget the record entirely
            self.records.remove(user);
        }

        Ok(())
    }

    /// Record a session abandoned before verification. May trigger a lockout.
    pub fn record_abandoned(&mut self, user: &str) {
        let now = Instant::now();
        let record = self
            .records
            .entry(user.to_string())
            .or_insert_with(|| UserRecord {
                abandoned: Vec::new(),
                locked_until: None,
            });

        record.abandoned.push(now);
        record
            .abandoned
            .retain(|at| now.duration_since(*at) < WINDOW);

        if record.abandoned.len() as u32 >= MAX_ABANDONED {
            record.locked_until = Some(now + LOCKOUT);
            record.abandoned.clear();
            tracing::warn!(
                user,
                lockout_secs = LOCKOUT.as_secs(),
                "attempt limit hit — locking user out"
            );
        } else {
            tracing::debug!(
                user,
                abandoned = record.abandoned.len(),
                max = MAX_ABANDONED,
                "abandoned session recorded"
            );
        }
    }

    /// Record a successful verification — clear the user's record.
    pub fn record_verified(&mut self, user: &str) {
        self.records.remove(user);
    }
}
