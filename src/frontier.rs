//! Ordered, validated input sequence.
//!
//! The frontier keeps the raw rows it was loaded from, so [`Frontier::admit`]
//! can be called any number of times and always yields the same sequence.
//! Rows that fail validation become `invalid-input` failures and never
//! reach the scheduler.

use crate::error::{HarvestError, TaskError};
use crate::models::{ExtractedRecord, FailureRecord, ItemPayload, WorkItem};
use crate::outputs::records::ColumnMap;
use csv::ReaderBuilder;
use itertools::{Either, Itertools};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument, warn};
use url::Url;

/// How input rows are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// First column is a URL; no header required.
    Url,
    /// Headered table with at least a name and an address.
    Facility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawItem {
    Url(String),
    Facility(ExtractedRecord),
}

/// Result of validating the frontier.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    pub accepted: Vec<WorkItem>,
    pub rejected: Vec<FailureRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct Frontier {
    rows: Vec<RawItem>,
}

impl Frontier {
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rows: urls.into_iter().map(|u| RawItem::Url(u.into())).collect(),
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = ExtractedRecord>) -> Self {
        Self {
            rows: records.into_iter().map(RawItem::Facility).collect(),
        }
    }

    #[instrument(level = "info", skip_all, fields(path = %path.display(), ?mode))]
    pub fn load(path: &Path, mode: InputMode) -> Result<Self, HarvestError> {
        let frontier = Self::from_reader(File::open(path)?, mode)?;
        info!(rows = frontier.len(), "Loaded frontier");
        Ok(frontier)
    }

    pub fn from_reader<R: Read>(reader: R, mode: InputMode) -> Result<Self, HarvestError> {
        match mode {
            InputMode::Url => {
                let mut rdr = ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(reader);
                let mut urls = Vec::new();
                for (i, row) in rdr.records().enumerate() {
                    let row = row?;
                    let cell = row.get(0).unwrap_or_default().trim().to_string();
                    if i == 0 && cell.eq_ignore_ascii_case("url") {
                        continue;
                    }
                    urls.push(cell);
                }
                Ok(Self::from_urls(urls))
            }
            InputMode::Facility => {
                let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
                let map = ColumnMap::from_headers(rdr.headers()?);
                let mut records = Vec::new();
                for row in rdr.records() {
                    records.push(map.record(&row?));
                }
                Ok(Self::from_records(records))
            }
        }
    }

    /// Number of raw input rows, valid or not.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validate every row, splitting work items from invalid-input failures.
    pub fn admit(&self) -> Admission {
        let (accepted, rejected): (Vec<WorkItem>, Vec<FailureRecord>) = self
            .rows
            .iter()
            .enumerate()
            .map(|(index, raw)| validate(index, raw))
            .partition_map(|res| match res {
                Ok(item) => Either::Left(item),
                Err(failure) => Either::Right(failure),
            });

        if !rejected.is_empty() {
            warn!(invalid = rejected.len(), "Rejected invalid input rows");
        }
        Admission { accepted, rejected }
    }
}

fn validate(index: usize, raw: &RawItem) -> Result<WorkItem, FailureRecord> {
    match raw {
        RawItem::Url(s) => match parse_url(s) {
            Ok(url) => Ok(WorkItem {
                index,
                id: s.clone(),
                payload: ItemPayload::Url(url),
            }),
            Err(e) => Err(FailureRecord::new(s.clone(), None, &e)),
        },
        RawItem::Facility(base) => {
            let name = base.name.value().unwrap_or_default().to_string();
            let address = base.address_text();
            let id = format!("{name} | {address}");
            if name.is_empty() || address.is_empty() {
                let e = TaskError::InvalidInput("name and address are required".into());
                return Err(FailureRecord::new(id, None, &e));
            }
            Ok(WorkItem {
                index,
                id,
                payload: ItemPayload::Facility {
                    name,
                    address,
                    base: base.clone(),
                },
            })
        }
    }
}

/// A URL is valid when it has an http(s) scheme and a host.
fn parse_url(s: &str) -> Result<Url, TaskError> {
    let url = Url::parse(s).map_err(|e| TaskError::InvalidInput(format!("{s}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TaskError::InvalidInput(format!("{s}: unsupported scheme")));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TaskError::InvalidInput(format!("{s}: missing host")));
    }
    Ok(url)
}
