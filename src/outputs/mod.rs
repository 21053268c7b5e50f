//! Output sinks for records, failures, and merge reports.
//!
//! # Submodules
//!
//! - [`records`]: Fixed-column CSV record tables, plus header-tolerant reading of datasets
//! - [`failures`]: Append-only failure log
//! - [`json`]: Merge report for near-duplicate review
//!
//! # Output Structure
//!
//! ```text
//! facilities.csv                   # one row per succeeded item
//! facilities.csv.checkpoint.json   # progress marker, rewritten per batch
//! failed.csv                       # item,batch,reason,detail,timestamp
//! merged.csv / clusters.json       # from the merge command
//! ```
//!
//! Sinks are only ever written by the batch runner, between batches.

pub mod failures;
pub mod json;
pub mod records;

use crate::error::HarvestError;
use crate::models::{ExtractedRecord, FailureRecord};

/// Destination for succeeded records. `append` must be durable on return.
pub trait RecordSink {
    fn append(&mut self, records: &[ExtractedRecord]) -> Result<(), HarvestError>;
}

/// Append-only destination for failures. `append` must be durable on return.
pub trait FailureSink {
    fn append(&mut self, failures: &[FailureRecord]) -> Result<(), HarvestError>;
}
