//! flowwatch CLI: follow an agent workflow's event stream from a terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flowwatch::config::Config;
use flowwatch::event::{Event, IdGenerator, parse_payload};
use flowwatch::model::WorkflowSnapshot;
use flowwatch::session::Session;
use flowwatch::summary::WorkflowSummary;
use flowwatch::telemetry::{TelemetryConfig, init_telemetry};
use flowwatch::transport::SseTransport;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "flowwatch", about = "Live monitor for agent workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to a live event stream
    Watch {
        /// Event stream URL (defaults to FLOWWATCH_EVENTS_URL)
        #[arg(long)]
        url: Option<String>,
        /// Exit once the crew reports completion
        #[arg(long)]
        exit_on_complete: bool,
        /// Print the final snapshot as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Fold a file of newline-delimited JSON payloads
    Replay {
        /// File with one event payload per line
        file: PathBuf,
        /// Print the snapshot as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "flowwatch".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let result = match cli.command {
        Command::Watch {
            url,
            exit_on_complete,
            json,
        } => {
            let url = url.unwrap_or_else(|| config.events_url.clone());
            cmd_watch(url, exit_on_complete, json).await
        }
        Command::Replay { file, json } => cmd_replay(file, json).await,
    };

    guard.force_flush();
    result
}

async fn cmd_watch(url: String, exit_on_complete: bool, json: bool) -> anyhow::Result<()> {
    let session = Session::spawn(SseTransport::new());
    let mut updates = session.subscribe();
    session.connect(url.as_str()).await?;

    let mut seen = 0;
    let mut failure = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        for event in snapshot.events.iter().skip(seen) {
            log_event(event);
        }
        seen = snapshot.events.len();

        // Only the stream going away sets an error; nothing here disconnects.
        if let Some(error) = snapshot.last_error {
            warn!(%url, %error, "event stream lost");
            if !snapshot.is_complete {
                failure = Some(error);
            }
            break;
        }
        if exit_on_complete && snapshot.is_review_ready() {
            info!("workflow complete");
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let snapshot = session.snapshot();
    session.shutdown().await?;
    print_result(&snapshot, json)?;

    match failure {
        Some(error) => anyhow::bail!("event stream at {url} lost before completion: {error}"),
        None => Ok(()),
    }
}

async fn cmd_replay(file: PathBuf, json: bool) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&file).await?;

    let mut ids = IdGenerator::new();
    let mut snapshot = WorkflowSnapshot::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_payload(line) {
            Ok(payload) => snapshot.record(ids.stamp(payload)),
            Err(error) => warn!(line = line_no + 1, %error, "skipping malformed payload"),
        }
    }

    print_result(&snapshot, json)
}

fn print_result(snapshot: &WorkflowSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        println!("{}", WorkflowSummary::of(snapshot));
    }
    Ok(())
}

fn log_event(event: &Event) {
    match &event.kind {
        Some(kind) => info!(
            id = %event.id,
            event_type = kind.type_name(),
            action = %kind.action(),
            "event"
        ),
        None => warn!(id = %event.id, payload = %event.payload, "unrecognized event"),
    }
}
