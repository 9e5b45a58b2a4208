//! notepipe - queue-based note processing pipeline runner.
//!
//! Boots individual workers, enqueues a note for processing, inspects a
//! note's completion status, or serves the status/metrics transport.

mod runtime;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "notepipe", about = "Queue-based note processing pipeline")]
struct Cli {
    #[arg(long, global = true, env = "NOTEPIPE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the worker bound to one queue (note, ingredient, instruction,
    /// image, or categorization), or every queue if none is given.
    RunWorker { queue: Option<String> },
    /// Enqueues a note job from an HTML file on disk.
    EnqueueNote {
        path: PathBuf,
        #[arg(long)]
        import_id: Option<String>,
    },
    /// Prints the completion-tracker snapshot for a note.
    Status { note_id: String },
    /// Serves the status/metrics HTTP transport.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notepipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = notepipe_core::config::Settings::load(cli.config.as_deref())?;
    let app = runtime::App::new(settings);

    match cli.command {
        Command::RunWorker { queue } => app.run_worker(queue.as_deref()).await,
        Command::EnqueueNote { path, import_id } => app.enqueue_note(&path, import_id).await,
        Command::Status { note_id } => app.print_status(&note_id).await,
        Command::Serve { addr } => app.serve(addr).await,
    }
}
