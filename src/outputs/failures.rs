//! Append-only failure log.
//!
//! One CSV row per failed item: `item,batch,reason,detail,timestamp`.
//! Rows are never rewritten or removed; the header is written once, when
//! the file is first created.

use super::FailureSink;
use crate::error::HarvestError;
use crate::models::FailureRecord;
use csv::{Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const HEADERS: [&str; 5] = ["item", "batch", "reason", "detail", "timestamp"];

#[derive(Debug)]
pub struct CsvFailureSink {
    path: PathBuf,
    writer: Writer<File>,
    written: usize,
}

impl CsvFailureSink {
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, HarvestError> {
        let has_content = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if !has_content {
            writer.write_record(HEADERS)?;
            writer.flush()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            written: 0,
        })
    }

    /// Failures written by this sink instance.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl FailureSink for CsvFailureSink {
    fn append(&mut self, failures: &[FailureRecord]) -> Result<(), HarvestError> {
        if failures.is_empty() {
            return Ok(());
        }
        for f in failures {
            let batch = f.batch_id.map(|b| b.to_string()).unwrap_or_default();
            let timestamp = f.timestamp.to_rfc3339();
            self.writer
                .write_record([
                    f.item_id.as_str(),
                    batch.as_str(),
                    f.reason,
                    f.detail.as_str(),
                    timestamp.as_str(),
                ])?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.written += failures.len();
        debug!(path = %self.path.display(), rows = failures.len(), "Appended failures");
        Ok(())
    }
}
