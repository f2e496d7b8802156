use std::collections::HashMap;
use std::time::{Duration, Instant};

use presence_core::{FrameOutcome, Point, Session, SessionStatus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid detection config: {0}")]
    Config(#[from] presence_core::ConfigError),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session expired: {session_id}")]
    SessionExpired { session_id: String, user: String },
    #[error("session limit reached ({0} live sessions)")]
    SessionLimit(usize),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Engine-side configuration, fixed at spawn time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub detection: presence_core::DetectionConfig,
    pub session_timeout: Duration,
    pub max_sessions: usize,
}

/// Result of creating a session.
#[derive(Debug)]
pub struct CreatedSession {
    pub session_id: String,
    pub status: SessionStatus,
}

/// Result of observing one frame.
#[derive(Debug)]
pub struct FrameReport {
    pub user: String,
    pub outcome: FrameOutcome,
    pub status: SessionStatus,
}

/// Metadata about a live session (no landmark data).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub user: String,
    pub created_at: String,
    pub verified: bool,
    pub challenge_index: Option<usize>,
    pub challenge_total: usize,
}

/// A session that expired before reaching verification.
pub struct AbandonedSession {
    pub session_id: String,
    pub user: String,
}

pub struct EngineStats {
    pub live_sessions: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Create {
        user: String,
        reply: oneshot::Sender<Result<CreatedSession, EngineError>>,
    },
    Observe {
        session_id: String,
        landmarks: Option<Vec<Point>>,
        reply: oneshot::Sender<Result<FrameReport, EngineError>>,
    },
    Status {
        session_id: String,
        reply: oneshot::Sender<Result<SessionStatus, EngineError>>,
    },
    Reset {
        session_id: String,
        reply: oneshot::Sender<Result<SessionStatus, EngineError>>,
    },
    End {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    List {
        user: String,
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Prune {
        reply: oneshot::Sender<Vec<AbandonedSession>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn create_session(&self, user: &str) -> Result<CreatedSession, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Create {
                user: user.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn observe(
        &self,
        session_id: &str,
        landmarks: Option<Vec<Point>>,
    ) -> Result<FrameReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Observe {
                session_id: session_id.to_string(),
                landmarks,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn reset(&self, session_id: &str) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reset {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// End a session. Returns whether it existed.
    pub async fn end(&self, session_id: &str) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::End {
                session_id: session_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn list(&self, user: &str) -> Result<Vec<SessionInfo>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::List {
                user: user.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Drop every expired session and return the ones that were abandoned
    /// before reaching verification.
    pub async fn prune(&self) -> Result<Vec<AbandonedSession>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Prune { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Every live session is owned by this one thread and mutated strictly
/// sequentially as requests arrive, so frame processing needs no locking.
/// Fails fast if the detection config is invalid.
pub fn spawn_engine(config: EngineConfig) -> Result<EngineHandle, EngineError> {
    config.detection.validate()?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            let mut engine = Engine {
                config,
                rng: StdRng::from_entropy(),
                sessions: HashMap::new(),
            };
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

struct SessionEntry {
    user: String,
    session: Session,
    started: Instant,
    last_seen: Instant,
    created_at: String,
}

struct Engine {
    config: EngineConfig,
    rng: StdRng,
    sessions: HashMap<String, SessionEntry>,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Create { user, reply } => {
                let _ = reply.send(self.create(user));
            }
            EngineRequest::Observe {
                session_id,
                landmarks,
                reply,
            } => {
                let _ = reply.send(self.observe(&session_id, landmarks));
            }
            EngineRequest::Status { session_id, reply } => {
                let _ = reply.send(self.status(&session_id));
            }
            EngineRequest::Reset { session_id, reply } => {
                let _ = reply.send(self.reset(&session_id));
            }
            EngineRequest::End { session_id, reply } => {
                let _ = reply.send(self.end(&session_id));
            }
            EngineRequest::List { user, reply } => {
                let _ = reply.send(self.list(&user));
            }
            EngineRequest::Prune { reply } => {
                let _ = reply.send(self.prune());
            }
            EngineRequest::Stats { reply } => {
                let _ = reply.send(EngineStats {
                    live_sessions: self.sessions.len(),
                });
            }
        }
    }

    fn create(&mut self, user: String) -> Result<CreatedSession, EngineError> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(EngineError::SessionLimit(self.sessions.len()));
        }

        let session = Session::new(self.config.detection.clone(), &mut self.rng)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let status = session.status();

        tracing::info!(
            session_id = %session_id,
            user = %user,
            challenges = status.challenge_total,
            "session created"
        );

        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                user,
                session,
                started: now,
                last_seen: now,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        );

        Ok(CreatedSession { session_id, status })
    }

    fn observe(
        &mut self,
        session_id: &str,
        landmarks: Option<Vec<Point>>,
    ) -> Result<FrameReport, EngineError> {
        self.expire_if_stale(session_id)?;
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        entry.last_seen = Instant::now();
        let at = entry.started.elapsed();
        let was_verified = entry.session.verified();
        let outcome = entry.session.observe(landmarks.as_deref(), at);

        match outcome {
            FrameOutcome::ChallengePassed => {
                tracing::info!(session_id, user = %entry.user, "challenge passed");
            }
            FrameOutcome::Verified if !was_verified => {
                tracing::info!(session_id, user = %entry.user, "session verified");
            }
            _ => {}
        }

        Ok(FrameReport {
            user: entry.user.clone(),
            outcome,
            status: entry.session.status(),
        })
    }

    fn status(&mut self, session_id: &str) -> Result<SessionStatus, EngineError> {
        self.expire_if_stale(session_id)?;
        self.sessions
            .get(session_id)
            .map(|entry| entry.session.status())
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
    }

    fn reset(&mut self, session_id: &str) -> Result<SessionStatus, EngineError> {
        self.expire_if_stale(session_id)?;
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;

        entry.last_seen = Instant::now();
        entry.started = Instant::now();
        entry.session.reset(&mut self.rng);
        tracing::info!(session_id, user = %entry.user, "session reset");
        Ok(entry.session.status())
    }

    fn end(&mut self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some(entry) => {
                tracing::info!(
                    session_id,
                    user = %entry.user,
                    verified = entry.session.verified(),
                    "session ended"
                );
                true
            }
            None => false,
        }
    }

    fn list(&self, user: &str) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.user == user)
            .map(|(id, entry)| {
                let status = entry.session.status();
                SessionInfo {
                    id: id.clone(),
                    user: entry.user.clone(),
                    created_at: entry.created_at.clone(),
                    verified: status.verified,
                    challenge_index: status.challenge_index,
                    challenge_total: status.challenge_total,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Remove every idle-expired session. Unverified ones are reported so
    /// the caller can charge them as abandoned attempts.
    fn prune(&mut self) -> Vec<AbandonedSession> {
        let timeout = self.config.session_timeout;
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let mut abandoned = Vec::new();
        for id in stale {
            if let Some(entry) = self.sessions.remove(&id) {
                if entry.session.verified() {
                    tracing::debug!(session_id = %id, user = %entry.user, "verified session expired");
                } else {
                    tracing::info!(session_id = %id, user = %entry.user, "unverified session abandoned");
                    abandoned.push(AbandonedSession {
                        session_id: id,
                        user: entry.user,
                    });
                }
            }
        }
        abandoned
    }

    /// If the session exists but sat idle past the timeout, drop it and
    /// report the expiry to the caller.
    fn expire_if_stale(&mut self, session_id: &str) -> Result<(), EngineError> {
        let stale = self
            .sessions
            .get(session_id)
            .is_some_and(|entry| entry.last_seen.elapsed() > self.config.session_timeout);
        if stale {
            if let Some(entry) = self.sessions.remove(session_id) {
                tracing::info!(session_id, user = %entry.user, "session expired");
                return Err(EngineError::SessionExpired {
                    session_id: session_id.to_string(),
                    user: entry.user,
                });
            }
        }
        Ok(())
    }
}
