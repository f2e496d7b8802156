use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod attempt_limiter;
mod config;
mod dbus_interface;
mod engine;

use attempt_limiter::AttemptLimiter;
use config::Config;
use dbus_interface::{AppState, PresenceService};
use engine::EngineConfig;

const BUS_NAME: &str = "org.freedesktop.Presence1";
const OBJECT_PATH: &str = "/org/freedesktop/Presence1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    let engine = engine::spawn_engine(EngineConfig {
        detection: config.detection.clone(),
        session_timeout: config.session_timeout,
        max_sessions: config.max_sessions,
    })?;

    let session_bus = config.session_bus;
    let service = PresenceService {
        state: Arc::new(Mutex::new(AppState {
            config,
            engine,
            limiter: AttemptLimiter::new(),
        })),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        bus = if session_bus { "session" } else { "system" },
        name = BUS_NAME,
        "presenced ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");

    Ok(())
}
