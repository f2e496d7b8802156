//! `presence replay` — run a recorded landmark trace through the liveness
//! pipeline offline, printing the challenge plan and every transition.
//!
//! Traces are what the daemon's `SubmitFrame` method receives, with a
//! timestamp attached: a JSON array of frames, each `{"t": seconds,
//! "landmarks": [{"x": .., "y": ..}, ...]}` with `"landmarks": null` for
//! frames where no face was detected.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use presence_core::{DetectionConfig, FrameOutcome, Point, Session};

/// One recorded frame.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceFrame {
    /// Seconds since the start of the recording.
    pub t: f32,
    /// Landmark snapshot, or `None` when no face was detected.
    #[serde(default)]
    pub landmarks: Option<Vec<Point>>,
}

/// Load and validate a trace file.
pub fn load_trace(path: &Path) -> Result<Vec<TraceFrame>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trace {}", path.display()))?;
    let frames: Vec<TraceFrame> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse trace {}", path.display()))?;

    for frame in &frames {
        if !frame.t.is_finite() || frame.t < 0.0 {
            bail!("trace contains an invalid timestamp: {}", frame.t);
        }
    }
    for pair in frames.windows(2) {
        if pair[1].t < pair[0].t {
            bail!(
                "trace timestamps must be non-decreasing ({} follows {})",
                pair[1].t,
                pair[0].t
            );
        }
    }
    Ok(frames)
}

/// Run the trace through a fresh session. Returns whether it verified.
fn replay_session(frames: &[TraceFrame], seed: Option<u64>) -> Result<bool> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut session =
        Session::new(DetectionConfig::default(), &mut rng).context("invalid detection config")?;

    println!("Challenge plan:");
    for (i, challenge) in session.challenges().iter().enumerate() {
        println!("  {}. {}", i + 1, challenge.instruction());
    }

    let mut verified_at: Option<f32> = None;
    for frame in frames {
        let outcome = session.observe(frame.landmarks.as_deref(), Duration::from_secs_f32(frame.t));
        match outcome {
            FrameOutcome::ChallengePassed => {
                let next = session
                    .active_challenge()
                    .map(|c| c.instruction())
                    .unwrap_or_default();
                println!("  [{:7.2}s] challenge passed — next: {next}", frame.t);
            }
            FrameOutcome::Verified if verified_at.is_none() => {
                verified_at = Some(frame.t);
                println!("  [{:7.2}s] verified", frame.t);
            }
            _ => {}
        }
    }

    Ok(session.verified())
}

/// Run the replay command: load the trace, walk it through a session, report.
pub fn run(path: &Path, seed: Option<u64>) -> Result<()> {
    let frames = load_trace(path)?;
    println!("Loaded {} frames from {}", frames.len(), path.display());

    let verified = replay_session(&frames, seed)?;

    println!();
    if verified {
        println!("Result: verified");
    } else {
        println!("Result: not verified — trace ended mid-run");
    }
    Ok(())
}
