//! # Facility Harvest
//!
//! A resilient batch harvester for senior living facility records. It
//! scrapes detail pages, enriches known facilities with contact data, and
//! merges datasets while flagging near-duplicates for review.
//!
//! ## Features
//!
//! - Bounded concurrency with a per-slot pacing delay and per-task timeout
//! - A fresh randomized client identity for every task
//! - Durable batches: records, failures and a checkpoint are flushed after
//!   every batch, and `--resume` continues where a run stopped
//! - Batch enrichment through an OpenAI-compatible chat API with one
//!   whole-batch retry on malformed replies
//! - Exact and fuzzy dedup across datasets
//!
//! ## Usage
//!
//! ```sh
//! facility_harvest scrape -i urls.csv -o facilities.csv
//! facility_harvest enrich-llm -i facilities.csv -o enriched.csv
//! facility_harvest merge -i a.csv -i b.csv -o merged.csv --report clusters.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Frontier**: Load and validate input rows; invalid rows go straight to the failure log
//! 2. **Batching**: Split valid items into batches of `B`
//! 3. **Driving**: A governor runs one extractor per item (at most `N` at a time),
//!    or the enricher answers the whole batch in one request
//! 4. **Checkpoint**: Persist results and progress before the next batch starts

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod checkpoint;
mod cli;
mod config;
mod enrich;
mod error;
mod extractors;
mod frontier;
mod governor;
mod identity;
mod merge;
mod models;
mod outputs;
mod runner;
mod utils;

use checkpoint::CheckpointFile;
use cli::{Cli, Command, MergeArgs, RunArgs};
use config::{HarvestConfig, require_credential};
use enrich::StructuredEnricher;
use extractors::contact_search::ContactSearchExtractor;
use extractors::detail_page::DetailPageExtractor;
use frontier::{Frontier, InputMode};
use governor::Governor;
use merge::{MergeSettings, merge};
use outputs::failures::CsvFailureSink;
use outputs::records::{Columns, CsvRecordSink, read_dataset};
use outputs::{RecordSink, json};
use runner::{BatchDriver, BatchRunner, RunSummary};
use utils::ensure_writable_parent;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "Loaded .env");
    }

    let start_time = std::time::Instant::now();
    info!("facility_harvest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.command, "Parsed CLI arguments");

    // ---- Load and check config before anything is scheduled ----
    let config = HarvestConfig::load(args.config.as_deref())?.apply(&args.tuning.overrides());
    config.validate()?;
    info!(
        concurrency = config.concurrency,
        batch_size = config.batch_size,
        min_delay_ms = config.min_delay_ms,
        max_delay_ms = config.max_delay_ms,
        task_timeout_secs = config.task_timeout_secs,
        "Configuration ready"
    );

    match args.command {
        Command::Scrape(run) => {
            let extractor = DetailPageExtractor::new(&config.detail_page)?;
            let governor = Governor::new(config.governor_settings(), extractor);
            run_batches(&run, InputMode::Url, Columns::Base, config.batch_size, &governor).await?;
        }
        Command::EnrichContacts(run) => {
            let extractor = ContactSearchExtractor::new(&config.search)?;
            let governor = Governor::new(config.governor_settings(), extractor);
            run_batches(&run, InputMode::Facility, Columns::Enriched, config.batch_size, &governor)
                .await?;
        }
        Command::EnrichLlm { run, api_key } => {
            let api_key = require_credential(api_key.as_deref(), "GROK_API_KEY")?;
            let client = api::client_with_backoff(&config.llm, api_key)?;
            info!(model = %config.llm.model, base_url = %config.llm.base_url, "Chat client ready");
            let enricher = StructuredEnricher::new(
                client,
                Duration::from_millis(config.llm.retry_delay_ms),
                Duration::from_millis(config.llm.batch_pause_ms),
            );
            run_batches(&run, InputMode::Facility, Columns::Enriched, config.llm.batch_size, &enricher)
                .await?;
        }
        Command::Merge(m) => {
            run_merge(&m, config.similarity_threshold).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// Drive every batch of `run.input` through `driver`, checkpointing as it goes.
async fn run_batches<D: BatchDriver>(
    run: &RunArgs,
    mode: InputMode,
    columns: Columns,
    batch_size: usize,
    driver: &D,
) -> Result<RunSummary, Box<dyn Error>> {
    // Early check: ensure output locations are writable
    ensure_writable_parent(&run.output).await?;
    ensure_writable_parent(&run.failures).await?;

    let frontier = Frontier::load(&run.input, mode)?;
    if frontier.is_empty() {
        warn!(input = %run.input.display(), "Input has no rows");
    }
    let records = CsvRecordSink::create(&run.output, columns, run.resume)?;
    let failures = CsvFailureSink::open(&run.failures)?;

    let mut runner = BatchRunner::new(batch_size, records, failures)
        .with_checkpoint(CheckpointFile::beside(&run.output), run.resume);
    let summary = runner.run(&frontier, driver).await?;

    let (_, failures) = runner.into_sinks();
    info!(
        failures_written = failures.written(),
        failure_log = %run.failures.display(),
        "Failure log updated"
    );

    if let Some(path) = &run.summary {
        json::write_report(&summary, path).await?;
    }
    Ok(summary)
}

async fn run_merge(m: &MergeArgs, threshold: f64) -> Result<(), Box<dyn Error>> {
    ensure_writable_parent(&m.output).await?;

    let datasets = m
        .inputs
        .iter()
        .map(|p| read_dataset(p))
        .collect::<Result<Vec<_>, _>>()?;

    let settings = MergeSettings {
        threshold,
        bucketing: m.bucket,
        scorer: m.scorer,
    };
    let report = merge(&datasets, &settings);

    write_merged(&m.output, &report.records)?;
    info!(
        path = %m.output.display(),
        kept = report.kept_records,
        exact_duplicates = report.exact_duplicates,
        clusters = report.clusters.len(),
        "Wrote merged dataset"
    );

    if let Some(path) = &m.report {
        json::write_report(&report, path).await?;
    }
    Ok(())
}

fn write_merged(path: &Path, records: &[models::ExtractedRecord]) -> Result<(), Box<dyn Error>> {
    let columns = if records.iter().any(|r| r.rating.is_available()) {
        Columns::Enriched
    } else {
        Columns::Base
    };
    let mut sink = CsvRecordSink::create(path, columns, false)?;
    sink.append(records)?;
    Ok(())
}
