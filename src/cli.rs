//! Command-line interface definitions for Facility Harvest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Tuning flags are global and override the YAML configuration; the most
//! common ones can also be provided via environment variables.

use crate::config::Overrides;
use crate::merge::{Bucketing, Scorer};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Facility Harvest application.
///
/// # Examples
///
/// ```sh
/// # Scrape detail pages listed in urls.csv
/// facility_harvest scrape -i urls.csv -o facilities.csv
///
/// # Continue an interrupted run
/// facility_harvest scrape -i urls.csv -o facilities.csv --resume
///
/// # Batch-enrich through the chat completion API
/// GROK_API_KEY=... facility_harvest enrich-llm -i facilities.csv -o enriched.csv
///
/// # Merge datasets and report near-duplicates
/// facility_harvest merge -i a.csv -i b.csv -o merged.csv --report clusters.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract records from facility detail pages (input: one URL per row)
    Scrape(RunArgs),

    /// Look up phone and website through web search (input: facility table)
    EnrichContacts(RunArgs),

    /// Fill phone, website and rating through the chat completion API (input: facility table)
    EnrichLlm {
        #[command(flatten)]
        run: RunArgs,

        /// API key for the chat completion endpoint
        #[arg(long, env = "GROK_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Merge datasets, drop exact duplicates and report near-duplicates
    Merge(MergeArgs),
}

/// Input and output locations shared by the batch commands.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input CSV
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output CSV for succeeded records
    #[arg(short, long)]
    pub output: PathBuf,

    /// Append-only failure log
    #[arg(short, long, default_value = "failed.csv")]
    pub failures: PathBuf,

    /// Continue from the checkpoint next to the output file
    #[arg(long)]
    pub resume: bool,

    /// Write the run summary as JSON
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Input datasets, merged in the order given
    #[arg(short, long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output CSV for the merged records
    #[arg(short, long)]
    pub output: PathBuf,

    /// Write the near-duplicate clusters as JSON
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// How records are grouped before fuzzy comparison
    #[arg(long, value_enum, default_value_t = Bucketing::Name)]
    pub bucket: Bucketing,

    /// Address similarity function
    #[arg(long, value_enum, default_value_t = Scorer::Indel)]
    pub scorer: Scorer,
}

/// Overrides for the YAML configuration.
#[derive(Args, Debug, Default)]
pub struct TuningArgs {
    /// Maximum concurrent tasks per batch
    #[arg(long, global = true, env = "HARVEST_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Items per batch
    #[arg(long, global = true, env = "HARVEST_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Lower bound of the per-slot delay
    #[arg(long, global = true)]
    pub min_delay_ms: Option<u64>,

    /// Upper bound of the per-slot delay
    #[arg(long, global = true)]
    pub max_delay_ms: Option<u64>,

    /// Per-task timeout
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Near-duplicate threshold, 0 to 100
    #[arg(long, global = true)]
    pub threshold: Option<f64>,
}

impl TuningArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
            task_timeout_secs: self.timeout_secs,
            similarity_threshold: self.threshold,
        }
    }
}
