use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use presence_core::{FrameOutcome, Point};

use crate::attempt_limiter::AttemptLimiter;
use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub limiter: AttemptLimiter,
}

/// D-Bus interface for the Presence liveness daemon.
///
/// Bus name: org.freedesktop.Presence1
/// Object path: /org/freedesktop/Presence1
pub struct PresenceService {
    pub state: Arc<Mutex<AppState>>,
}

/// Retrieve the UID of the D-Bus peer identified by `sender_str` (a unique bus name).
async fn get_caller_uid(sender_str: &str, conn: &zbus::Connection) -> zbus::fdo::Result<u32> {
    let dbus_proxy = zbus::fdo::DBusProxy::new(conn)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    let bus_name = zbus::names::BusName::try_from(sender_str)
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    dbus_proxy
        .get_connection_unix_user(bus_name)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Look up the numeric UID for a local username by parsing `/etc/passwd`.
fn uid_for_name(name: &str) -> Option<u32> {
    let contents = std::fs::read_to_string("/etc/passwd").ok()?;
    for line in contents.lines() {
        let mut parts = line.split(':');
        let uname = parts.next()?;
        if uname != name {
            continue;
        }
        parts.next(); // password field
        let uid_str = parts.next()?;
        return uid_str.parse().ok();
    }
    None
}

#[interface(name = "org.freedesktop.Presence1")]
impl PresenceService {
    /// Start a liveness session for the given user.
    ///
    /// Returns the UUID of the new session.
    ///
    /// Security: on the system bus the caller UID is validated against the target
    /// username before any session is created.  Root (UID 0) is always permitted.
    /// On the session bus (development mode) UID validation is skipped.
    async fn start_session(
        &self,
        user: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(user, "start_session requested");

        let session_bus = self.state.lock().await.config.session_bus;

        // --- UID validation (system bus only) ---
        if !session_bus {
            let sender = header
                .sender()
                .ok_or_else(|| zbus::fdo::Error::Failed("no sender in message".to_string()))?;
            let caller_uid = get_caller_uid(sender.as_str(), conn).await?;
            if caller_uid != 0 {
                match uid_for_name(user) {
                    Some(expected_uid) if caller_uid == expected_uid => {}
                    Some(_) => {
                        tracing::warn!(
                            user,
                            caller_uid,
                            "start_session: caller UID does not match target user UID"
                        );
                        return Err(zbus::fdo::Error::AccessDenied(format!(
                            "caller is not permitted to start a session for user '{user}'"
                        )));
                    }
                    None => {
                        tracing::warn!(user, "start_session: unknown user");
                        return Err(zbus::fdo::Error::Failed(format!("unknown user '{user}'")));
                    }
                }
            }
        }

        let engine = self.state.lock().await.engine.clone();

        // --- Charge abandoned sessions, then check the limiter ---
        let abandoned = engine
            .prune()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        {
            let mut state = self.state.lock().await;
            for walkaway in &abandoned {
                tracing::debug!(
                    session_id = %walkaway.session_id,
                    user = %walkaway.user,
                    "charging abandoned session"
                );
                state.limiter.record_abandoned(&walkaway.user);
            }
            state.limiter.check(user).map_err(|msg| {
                tracing::warn!(user, "start_session: attempt limited");
                zbus::fdo::Error::Failed(msg)
            })?;
        }

        // --- Create the session (no lock held) ---
        let created = engine.create_session(user).await.map_err(|e| {
            tracing::error!(error = %e, "start_session failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;

        tracing::info!(
            session_id = %created.session_id,
            user,
            challenges = created.status.challenge_total,
            "session started"
        );
        Ok(created.session_id)
    }

    /// Submit one frame's landmark snapshot to a session.
    ///
    /// `landmarks_json` is a JSON array of `{"x": .., "y": ..}` points in the
    /// FaceMesh schema, or the literal `null` when no face was detected this
    /// frame.  Returns the frame outcome and the updated session state as JSON.
    async fn submit_frame(
        &self,
        session_id: &str,
        landmarks_json: &str,
    ) -> zbus::fdo::Result<String> {
        let landmarks: Option<Vec<Point>> = serde_json::from_str(landmarks_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed landmarks: {e}")))?;

        let engine = self.state.lock().await.engine.clone();
        match engine.observe(session_id, landmarks).await {
            Ok(report) => {
                if report.outcome == FrameOutcome::Verified {
                    self.state.lock().await.limiter.record_verified(&report.user);
                }
                Ok(serde_json::json!({
                    "outcome": report.outcome,
                    "status": report.status,
                })
                .to_string())
            }
            Err(EngineError::SessionExpired { session_id, user }) => {
                tracing::warn!(session_id = %session_id, user = %user, "frame for expired session");
                self.state.lock().await.limiter.record_abandoned(&user);
                Err(zbus::fdo::Error::Failed(format!(
                    "session expired: {session_id}"
                )))
            }
            Err(e) => {
                tracing::error!(error = %e, "submit_frame failed");
                Err(zbus::fdo::Error::Failed(e.to_string()))
            }
        }
    }

    /// Return the state of a session as JSON (for rendering).
    async fn session_status(&self, session_id: &str) -> zbus::fdo::Result<String> {
        let engine = self.state.lock().await.engine.clone();
        match engine.status(session_id).await {
            Ok(status) => serde_json::to_string(&status)
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string())),
            Err(EngineError::SessionExpired { session_id, user }) => {
                self.state.lock().await.limiter.record_abandoned(&user);
                Err(zbus::fdo::Error::Failed(format!(
                    "session expired: {session_id}"
                )))
            }
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Re-randomize a session's challenge plan and clear its progress.
    ///
    /// A user-initiated retry: it is not counted against the attempt limit.
    async fn reset_session(&self, session_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(session_id, "reset_session requested");
        let engine = self.state.lock().await.engine.clone();
        let status = engine.reset(session_id).await.map_err(|e| {
            tracing::warn!(error = %e, "reset_session failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// End a session. Returns whether it existed.
    async fn end_session(&self, session_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(session_id, "end_session requested");
        let engine = self.state.lock().await.engine.clone();
        engine
            .end(session_id)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// List live sessions for the given user as JSON.
    async fn list_sessions(&self, user: &str) -> zbus::fdo::Result<String> {
        let engine = self.state.lock().await.engine.clone();
        let sessions = engine
            .list(user)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&sessions).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (engine, detection) = {
            let state = self.state.lock().await;
            (state.engine.clone(), state.config.detection.clone())
        };
        let stats = engine
            .stats()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "live_sessions": stats.live_sessions,
            "ear_close_threshold": detection.ear_close_threshold,
            "mar_open_threshold": detection.mar_open_threshold,
            "nod_min_displacement": detection.nod_min_displacement,
        })
        .to_string())
    }
}
