//! Tally Redrive - replays the telemetry archive into the stream.
//!
//! Runs one redrive invocation: a cursor payload comes in, one page of
//! archive objects (or one drain pass) is processed, and the cursor
//! for the next invocation goes out. An external controller loops this
//! binary until the emitted payload is null. With `--to-completion`
//! the loop runs in-process instead.
//!
//! Output (last stdout line) is a JSON object:
//!
//! ```text
//! {"Payload": "data/composer/PROD/PAGE_VIEW/..."}   more to do
//! {"Payload": "SCALING_DOWN_STREAM"}                draining
//! {"Payload": null}                                 finished
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tally_pipeline::{
    CapacityController, KinesisStreamClient, KinesisStreamControl, RedriveConfig, RedriveCursor,
    RedriveOrchestrator, S3ArchiveStore,
};

/// Replay the telemetry archive into the analytics stream.
#[derive(Parser, Debug)]
#[command(name = "tally-redrive")]
#[command(about = "Replays the telemetry archive into the analytics stream", long_about = None)]
struct Args {
    /// Cursor payload from the previous invocation. Omit to start a
    /// fresh redrive from the beginning of the archive.
    #[arg(long)]
    payload: Option<String>,

    /// Keep invoking until the redrive reports done instead of
    /// emitting a cursor for an external controller.
    #[arg(long)]
    to_completion: bool,

    /// S3 bucket holding the telemetry archive.
    #[arg(long, env = "TELEMETRY_BUCKET_NAME")]
    bucket: String,

    /// Kinesis stream to forward into.
    #[arg(long, env = "TELEMETRY_STREAM_NAME")]
    stream: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads env-backed args.
    let dotenv = std::env::var("DOTENV_PATH").unwrap_or_else(|_| ".env".to_string());
    if std::path::Path::new(&dotenv).exists() {
        dotenvy::from_path(&dotenv)?;
        eprintln!("Loaded environment from {dotenv}");
    }

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let archive = Arc::new(S3ArchiveStore::new(args.bucket.clone()).await);
    let stream = Arc::new(KinesisStreamClient::new(args.stream.clone()).await);
    let capacity = CapacityController::new(Arc::new(
        KinesisStreamControl::new(args.stream.clone()).await,
    ));
    let orchestrator =
        RedriveOrchestrator::new(archive, stream, capacity, RedriveConfig::default());

    let mut cursor = RedriveCursor::from_payload(args.payload.as_deref());
    tracing::info!(bucket = %args.bucket, stream = %args.stream, ?cursor, "starting redrive invocation");

    loop {
        cursor = orchestrator.run(cursor).await?;
        if !args.to_completion || cursor == RedriveCursor::Done {
            break;
        }
        tracing::info!(?cursor, "redrive invocation complete, continuing");
    }

    let output = serde_json::json!({ "Payload": cursor.to_payload() });
    println!("{output}");

    Ok(())
}
