//! D-Bus client commands against a running presenced.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::replay;

#[zbus::proxy(
    interface = "org.freedesktop.Presence1",
    default_service = "org.freedesktop.Presence1",
    default_path = "/org/freedesktop/Presence1"
)]
trait Presence {
    fn start_session(&self, user: &str) -> zbus::Result<String>;
    fn submit_frame(&self, session_id: &str, landmarks_json: &str) -> zbus::Result<String>;
    fn session_status(&self, session_id: &str) -> zbus::Result<String>;
    fn reset_session(&self, session_id: &str) -> zbus::Result<String>;
    fn end_session(&self, session_id: &str) -> zbus::Result<bool>;
    fn list_sessions(&self, user: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

/// Connect to the bus presenced is expected on: the session bus when
/// PRESENCE_SESSION_BUS is set (development mode), the system bus otherwise.
async fn proxy() -> Result<PresenceProxy<'static>> {
    let conn = if std::env::var("PRESENCE_SESSION_BUS").is_ok() {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus (is presenced running?)")?;

    PresenceProxy::new(&conn)
        .await
        .context("failed to create presence proxy")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub async fn status() -> Result<()> {
    print_json(&proxy().await?.status().await?)
}

pub async fn start(user: &str) -> Result<()> {
    let id = proxy().await?.start_session(user).await?;
    println!("{id}");
    Ok(())
}

pub async fn session(id: &str) -> Result<()> {
    print_json(&proxy().await?.session_status(id).await?)
}

pub async fn reset(id: &str) -> Result<()> {
    print_json(&proxy().await?.reset_session(id).await?)
}

pub async fn end(id: &str) -> Result<()> {
    let existed = proxy().await?.end_session(id).await?;
    if existed {
        println!("session ended");
    } else {
        println!("no such session");
    }
    Ok(())
}

pub async fn list(user: &str) -> Result<()> {
    print_json(&proxy().await?.list_sessions(user).await?)
}

/// Feed a recorded trace to a live session, pacing frames by their recorded
/// timestamps, and print every transition the daemon reports.
pub async fn feed(session_id: &str, trace: &Path) -> Result<()> {
    let frames = replay::load_trace(trace)?;
    println!("Feeding {} frames to session {session_id}", frames.len());

    let proxy = proxy().await?;
    let mut prev_t = frames.first().map(|f| f.t).unwrap_or(0.0);

    for frame in &frames {
        let gap = frame.t - prev_t;
        if gap > 0.0 {
            tokio::time::sleep(Duration::from_secs_f32(gap)).await;
        }
        prev_t = frame.t;

        let payload = serde_json::to_string(&frame.landmarks)?;
        let raw = proxy.submit_frame(session_id, &payload).await?;
        let report: serde_json::Value = serde_json::from_str(&raw)?;
        tracing::debug!(t = frame.t, outcome = ?report.get("outcome"), "frame submitted");

        match report.get("outcome").and_then(|v| v.as_str()) {
            Some("challenge_passed") => {
                let next = report
                    .pointer("/status/instruction")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!("  [{:7.2}s] challenge passed — next: {next}", frame.t);
            }
            Some("verified") => {
                println!("  [{:7.2}s] verified", frame.t);
                return Ok(());
            }
            _ => {}
        }
    }

    println!("trace exhausted without verification");
    Ok(())
}
