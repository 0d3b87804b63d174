use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::{Map, Value, json};
use sheetsync::{EngineConfig, MemoryDocumentStore, PendingPatch, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetsync")]
#[command(about = "Write-back sync engine for character sheets")]
struct Cli {
    /// JSON engine configuration; defaults apply to anything left out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate an editing session against an in-memory store
    Demo {
        #[arg(long, default_value_t = 20)]
        edits: usize,
        /// Pause between edits
        #[arg(long, default_value_t = 40)]
        edit_interval_ms: u64,
        /// Overrides the configured debounce window
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Number of store calls that fail before the store recovers
        #[arg(long, default_value_t = 0)]
        fail_first: usize,
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,
        #[arg(long, default_value_t = 5_000)]
        drain_timeout_ms: u64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Demo {
            edits,
            edit_interval_ms,
            debounce_ms,
            fail_first,
            latency_ms,
            drain_timeout_ms,
        } => {
            if let Some(debounce_ms) = debounce_ms {
                config.autosave.debounce_ms = debounce_ms;
            }
            run_demo(
                config,
                edits,
                Duration::from_millis(edit_interval_ms),
                fail_first,
                Duration::from_millis(latency_ms),
                Duration::from_millis(drain_timeout_ms),
            )
            .await
        }
    }
}

async fn run_demo(
    config: EngineConfig,
    edits: usize,
    edit_interval: Duration,
    fail_first: usize,
    latency: Duration,
    drain_timeout: Duration,
) -> Result<()> {
    let store = Arc::new(MemoryDocumentStore::new().with_latency(latency));
    let character = store.create(initial_sheet()).await;
    info!("created character {} at version {}", character.id, character.version);

    let engine = SyncEngine::new(store.clone(), config)?;
    let autosave = engine.autosave(&character.id);
    store.fail_next(fail_first);

    for step in 0..edits {
        autosave.schedule(PendingPatch::from_value(simulated_edit(step))?);
        tokio::time::sleep(edit_interval).await;
    }

    let report = engine.drain(drain_timeout).await;
    info!(
        "drain: flushed={} conflicts={} errors={} timed_out={} queue_drained={}",
        report.flushed,
        report.conflicts,
        report.errors.len(),
        report.timed_out,
        report.queue_drained
    );
    for (entity_id, err) in &report.errors {
        info!("save for {} failed: {}", entity_id, err);
    }

    let saved = engine.get_character(&character.id).await?;
    let counts = store.call_counts();
    info!(
        "{} edits became {} field path writes; final version {}",
        edits, counts.field_path_updates, saved.version
    );
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

fn initial_sheet() -> Map<String, Value> {
    let sheet = json!({
        "identity": { "name": "Unnamed", "race": "Human", "class": "Fighter" },
        "status": { "hp": 10, "max_hp": 10, "ac": 12 },
        "level": 1,
        "inventory": []
    });
    sheet.as_object().cloned().unwrap_or_default()
}

/// A keystroke-sized change touching a different part of the sheet each step.
fn simulated_edit(step: usize) -> Value {
    match step % 4 {
        0 => json!({ "identity": { "name": format!("Vex {}", step) } }),
        1 => json!({ "status": { "hp": 10 - (step % 10) as i64 } }),
        2 => json!({
            "inventory": (0..=step % 3)
                .map(|i| json!({ "name": format!("Item {}", i), "quantity": i + 1 }))
                .collect::<Vec<_>>()
        }),
        _ => json!({ "level": 1 + step / 4 }),
    }
}
