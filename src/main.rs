//! CLI for orderpub
//!
//! Subcommands:
//! - `publish`: publish a single message and wait briefly for delivery
//! - `run`: publish `<topic> <json>` lines read from stdin
//! - `inspect`: print the persisted queue
//! - `compact`: fold the append log into the snapshot

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use orderpub::config::{Settings, load_config};
use orderpub::persistence::QueueStore;
use orderpub::producer::{DeliveryQueue, Publisher};
use orderpub::transport::WsBrokerClient;
use orderpub::utils::logging;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "orderpub")]
enum Command {
    /// Publish one message, waiting up to `wait_ms` for the queue to drain
    Publish {
        #[arg(long)]
        topic: String,
        /// JSON payload
        #[arg(long)]
        payload: String,
        #[arg(long, default_value_t = 5000)]
        wait_ms: u64,
    },
    /// Publish every `<topic> <json>` line from stdin until EOF or Ctrl-C
    Run,
    /// Print the persisted queue, one JSON record per line
    Inspect,
    /// Rewrite the snapshot from the persisted queue and truncate the log
    Compact,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Publish {
            topic,
            payload,
            wait_ms,
        } => run_publish(&settings, topic, &payload, Duration::from_millis(wait_ms)).await,
        Command::Run => run_stdin(&settings).await,
        Command::Inspect => run_inspect(&settings),
        Command::Compact => run_compact(&settings),
    };

    if let Err(e) = result {
        error!("orderpub failed: {}", e);
        std::process::exit(1);
    }
}

fn build_publisher(settings: &Settings) -> Publisher {
    let client = Arc::new(WsBrokerClient::from_settings(&settings.broker));
    Publisher::from_settings(client, settings)
}

async fn stop(publisher: &Publisher, drain_for: Duration) {
    if publisher.wait_until_drained(drain_for).await {
        info!("All messages delivered to broker");
    } else {
        warn!(
            queued = publisher.queue_len(),
            "Broker unavailable, messages stay queued on disk for the next run"
        );
    }
    publisher.on_stop().await;
}

async fn run_publish(
    settings: &Settings,
    topic: String,
    payload: &str,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: Value = serde_json::from_str(payload)?;
    let publisher = build_publisher(settings);

    publisher.on_start().await;
    publisher.publish(topic, payload);
    stop(&publisher, wait).await;

    Ok(())
}

async fn run_stdin(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let publisher = build_publisher(settings);
    publisher.on_start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some((topic, json)) = line.split_once(char::is_whitespace) else {
                    warn!("Ignoring line without payload: {}", line);
                    continue;
                };
                match serde_json::from_str::<Value>(json.trim()) {
                    Ok(payload) => publisher.publish(topic, payload),
                    Err(e) => warn!(%topic, "Ignoring line with invalid JSON: {}", e),
                }
            }
        }
    }

    stop(&publisher, Duration::from_millis(settings.broker.send_timeout_ms)).await;
    Ok(())
}

fn run_inspect(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = QueueStore::from_settings(&settings.storage);
    let messages = store.load();

    for msg in &messages {
        println!("{}", serde_json::to_string(msg)?);
    }
    info!(
        queued = messages.len(),
        snapshot = %store.snapshot_path().display(),
        log = %store.log_path().display(),
        "Persisted queue"
    );
    Ok(())
}

fn run_compact(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = QueueStore::from_settings(&settings.storage);
    store.ensure()?;

    let queue = DeliveryQueue::new(Arc::new(store));
    queue.load_from_disk();
    let written = queue.compact()?;

    info!(written, "Compacted persisted queue");
    Ok(())
}
