use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retrace::app::{send_once, App};
use retrace::protocol::{decode, ServerMessage};
use retrace::{
    util, Backend, ClientMessage, Config, HttpBackend, ReturnPolicy, SequenceId, SyncPayload,
    TimelineStore,
};
use tokio::io::BufReader;

#[derive(Debug, Parser)]
#[command(
    name = "retrace",
    about = "Follow, scrub and inspect a traced program's execution timeline",
    version
)]
struct Cli {
    /// Data directory (default: ~/.retrace)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base URL of the backend's HTTP API
    #[arg(long, global = true)]
    http_url: Option<String>,

    /// WebSocket URL of the backend's push channel
    #[arg(long, global = true)]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect and follow execution live, reading commands from stdin (default).
    Follow,
    /// Reconstruct the scope from a saved sync payload without connecting.
    Inspect {
        /// File holding a sync payload or a full `sync` frame
        path: PathBuf,
        /// Step to reconstruct at (default: the payload's selected step)
        #[arg(long)]
        at: Option<SequenceId>,
        /// How return values and errors carry over between steps
        #[arg(long)]
        policy: Option<ReturnPolicy>,
    },
    /// Resume the paused program.
    Continue,
    /// Move execution to a recorded step.
    Seek { id: SequenceId },
    /// Start a new run of the traced program.
    Restart,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (<data dir>/logs/retrace.log)
    util::ensure_layout()?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let mut config = Config::load();
    if let Some(url) = cli.http_url {
        config = config.with_http_url(url);
    }
    if let Some(url) = cli.ws_url {
        config = config.with_ws_url(url);
    }

    match cli.command.unwrap_or(Commands::Follow) {
        Commands::Follow => follow(&config).await,
        Commands::Inspect { path, at, policy } => inspect(&config, &path, at, policy),
        Commands::Continue => send_once(&config, ClientMessage::Continue).await,
        Commands::Seek { id } => {
            send_once(&config, ClientMessage::NewTimelineId { new_timeline_id: id }).await
        }
        Commands::Restart => {
            let backend = HttpBackend::new(&config.server.http_url, config.server.request_timeout)?;
            backend.start_app().await.context("failed to restart backend")?;
            println!("restarted");
            Ok(())
        }
    }
}

async fn follow(config: &Config) -> Result<()> {
    let backend = HttpBackend::new(&config.server.http_url, config.server.request_timeout)?;
    let mut app = App::new(config, Arc::new(backend), io::stdout());
    app.spawn_input(BufReader::new(tokio::io::stdin()));
    app.run().await
}

fn inspect(
    config: &Config,
    path: &Path,
    at: Option<SequenceId>,
    policy: Option<ReturnPolicy>,
) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let payload = match decode(&text) {
        Ok(ServerMessage::Sync(payload)) => payload,
        _ => serde_json::from_str::<SyncPayload>(&text)
            .with_context(|| format!("{} is not a sync payload", path.display()))?,
    };

    let cursor = at.or_else(|| payload.cursor());
    let policy = policy.unwrap_or(config.timeline.return_policy);
    let mut store = TimelineStore::new(config.timeline.capacity, policy);
    store.replace_all(payload.timeline, cursor);

    let cursor = cursor.context("no timeline position selected")?;
    let scope = store.scope_at(cursor).with_context(|| match store.evicted_through() {
        Some(horizon) if cursor < horizon => format!(
            "step {cursor} was evicted; retained history starts after step {horizon}"
        ),
        _ => format!("no scope at step {cursor}"),
    })?;
    println!("{}", serde_json::to_string_pretty(&scope)?);
    Ok(())
}
