use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod replay;

#[derive(Parser)]
#[command(name = "presence", version, about = "Presence liveness verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a recorded landmark trace through the liveness pipeline offline.
    Replay {
        /// JSON trace: an array of {"t": seconds, "landmarks": [...] | null} frames.
        trace: PathBuf,
        /// Seed for the challenge plan, for reproducible runs.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Feed a recorded landmark trace to a live session over D-Bus, paced in real time.
    Feed {
        /// Session ID returned by `presence start`.
        id: String,
        /// JSON trace, same format as `replay`.
        trace: PathBuf,
    },
    /// Show daemon status.
    Status,
    /// Start a liveness session for a user.
    Start {
        #[arg(long)]
        user: String,
    },
    /// Show the state of a session.
    Session { id: String },
    /// Re-randomize the challenge plan of a session.
    Reset { id: String },
    /// End a session.
    End { id: String },
    /// List live sessions for a user.
    List {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay { trace, seed } => replay::run(&trace, seed),
        Command::Feed { id, trace } => client::feed(&id, &trace).await,
        Command::Status => client::status().await,
        Command::Start { user } => client::start(&user).await,
        Command::Session { id } => client::session(&id).await,
        Command::Reset { id } => client::reset(&id).await,
        Command::End { id } => client::end(&id).await,
        Command::List { user } => client::list(&user).await,
    }
}
