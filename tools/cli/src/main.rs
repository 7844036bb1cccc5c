//! Tidemark CLI - drive replication passes against a remote document store.
//!
//! This tool downloads collections, fetches single documents, and runs full
//! sync passes (query, pull, optional push) from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use tidemark_client::{HttpTransport, QueryEngine};
use tidemark_common::Document;
use tidemark_sync::{Orchestrator, Pacing, PushPlan, SyncConfig};

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Tidemark - replication client for remote document stores")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync pass over a set of collections.
    Sync {
        /// Base URL of the remote store.
        #[arg(short, long)]
        endpoint: Url,

        /// Collections to synchronize, in order.
        #[arg(short, long, value_delimiter = ',')]
        collections: Vec<String>,

        /// Page size for bulk reads.
        #[arg(long, default_value_t = 2000)]
        limit: u32,

        /// Page size for checkpoint pulls.
        #[arg(long, default_value_t = 100)]
        pull_batch: u32,

        /// Fallback document key for the verification read.
        #[arg(long)]
        scenario_id: Option<String>,

        /// Minimum pacing delay between remote calls, in milliseconds.
        #[arg(long, default_value_t = 100)]
        pace_min_ms: u64,

        /// Maximum pacing delay between remote calls, in milliseconds.
        #[arg(long, default_value_t = 500)]
        pace_max_ms: u64,

        /// Push each pulled document back with this numeric field bumped.
        #[arg(long)]
        bump_field: Option<String>,

        /// Mark the first pushed row stale to exercise the conflict path.
        #[arg(long)]
        probe_conflicts: bool,
    },

    /// Download one page of a collection.
    List {
        /// Base URL of the remote store.
        #[arg(short, long)]
        endpoint: Url,

        /// Collection to read.
        #[arg(short, long)]
        collection: String,

        /// Page size.
        #[arg(long, default_value_t = 2000)]
        limit: u32,

        /// Page offset.
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Request the collection total.
        #[arg(long)]
        total: bool,
    },

    /// Fetch a single document by key.
    Get {
        /// Base URL of the remote store.
        #[arg(short, long)]
        endpoint: Url,

        /// Collection holding the document.
        #[arg(short, long)]
        collection: String,

        /// Document key.
        #[arg(short, long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Sync {
            endpoint,
            collections,
            limit,
            pull_batch,
            scenario_id,
            pace_min_ms,
            pace_max_ms,
            bump_field,
            probe_conflicts,
        } => {
            run_sync(
                endpoint,
                collections,
                limit,
                pull_batch,
                scenario_id,
                pace_min_ms,
                pace_max_ms,
                bump_field,
                probe_conflicts,
            )
            .await
        }
        Commands::List {
            endpoint,
            collection,
            limit,
            offset,
            total,
        } => run_list(endpoint, collection, limit, offset, total).await,
        Commands::Get {
            endpoint,
            collection,
            id,
        } => run_get(endpoint, collection, id).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_sync(
    endpoint: Url,
    collections: Vec<String>,
    limit: u32,
    pull_batch: u32,
    scenario_id: Option<String>,
    pace_min_ms: u64,
    pace_max_ms: u64,
    bump_field: Option<String>,
    probe_conflicts: bool,
) -> Result<()> {
    let transport = Arc::new(
        HttpTransport::new(Duration::from_secs(30)).context("creating HTTP transport")?,
    );

    let mut config = SyncConfig::new(endpoint)
        .with_page_limit(limit)
        .with_pull_batch_size(pull_batch);
    if let Some(id) = scenario_id {
        config = config.with_default_scenario_id(id);
    }
    let pacing = Pacing::between(
        Duration::from_millis(pace_min_ms),
        Duration::from_millis(pace_max_ms),
    );
    let orchestrator = Orchestrator::new(config, transport, pacing);

    let plan = bump_field.map(|field| {
        let plan = PushPlan::new(move |document| bump_counter(document, &field));
        if probe_conflicts {
            plan.with_conflict_probe()
        } else {
            plan
        }
    });

    let report = orchestrator.run_pass(&collections, plan.as_ref()).await;

    for outcome in &report.outcomes {
        match &outcome.error {
            None => info!(
                "[{}] {} queried, {} pulled, {} pushed, {} conflict(s)",
                outcome.collection,
                outcome.queried,
                outcome.pulled,
                outcome.pushed,
                outcome.conflicts
            ),
            Some(error) => warn!(
                "[{}] aborted during {:?}: {}",
                outcome.collection, outcome.phase, error
            ),
        }
    }
    for conflict in &report.conflicts {
        let key = conflict
            .document
            .key()
            .map(|key| key.as_str().to_string())
            .unwrap_or_else(|_| "<unidentified>".to_string());
        info!("conflict in '{}' on '{}'", conflict.collection, key);
    }
    info!(
        "pass over {} collection(s) took {} milliseconds",
        report.outcomes.len(),
        report.duration.as_millis()
    );

    Ok(())
}

async fn run_list(
    endpoint: Url,
    collection: String,
    limit: u32,
    offset: u64,
    total: bool,
) -> Result<()> {
    let transport = Arc::new(
        HttpTransport::new(Duration::from_secs(30)).context("creating HTTP transport")?,
    );
    let engine = QueryEngine::new(endpoint, transport);

    let start = Instant::now();
    let page = engine.list(&collection, limit, offset, None, total).await?;
    info!(
        "downloaded [{}] collection ({} items) in {} milliseconds",
        collection,
        page.count,
        start.elapsed().as_millis()
    );
    if let Some(total) = page.total {
        info!("[{}] holds {} document(s) in total", collection, total);
    }

    println!("{}", serde_json::to_string_pretty(&page.items)?);
    Ok(())
}

async fn run_get(endpoint: Url, collection: String, id: String) -> Result<()> {
    let transport = Arc::new(
        HttpTransport::new(Duration::from_secs(30)).context("creating HTTP transport")?,
    );
    let engine = QueryEngine::new(endpoint, transport);

    let document = engine.get(&collection, &id).await?;
    println!("{}", serde_json::to_string_pretty(document.fields())?);
    Ok(())
}

fn bump_counter(document: &Document, field: &str) -> Document {
    let mut next = document.clone();
    let current = next.get(field).and_then(Value::as_i64).unwrap_or(0);
    next.set(field, Value::from(current + 1));
    next
}
