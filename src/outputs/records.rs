//! CSV record tables.
//!
//! Written tables always carry the same columns in the same order,
//! regardless of which fields were unavailable:
//!
//! ```text
//! Facility Name,Street Address,City,State,Zip Code,Phone,Care Type,Website,Description[,Rating]
//! ```
//!
//! Reading is lenient about headers so that datasets from other sources
//! (for example `name,address,phone`) can be merged too.

use super::RecordSink;
use crate::error::HarvestError;
use crate::models::{ExtractedRecord, Field, FieldName};
use crate::utils::fold;
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const BASE_COLUMNS: [(&str, FieldName); 9] = [
    ("Facility Name", FieldName::Name),
    ("Street Address", FieldName::Street),
    ("City", FieldName::City),
    ("State", FieldName::State),
    ("Zip Code", FieldName::Zip),
    ("Phone", FieldName::Phone),
    ("Care Type", FieldName::CareType),
    ("Website", FieldName::Website),
    ("Description", FieldName::Description),
];

const RATING_COLUMN: (&str, FieldName) = ("Rating", FieldName::Rating);

/// Column layout of a written table. Fixed for the lifetime of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Columns {
    Base,
    /// Base columns plus `Rating`, used wherever enrichment ran.
    Enriched,
}

impl Columns {
    pub fn layout(&self) -> Vec<(&'static str, FieldName)> {
        let mut cols = BASE_COLUMNS.to_vec();
        if *self == Columns::Enriched {
            cols.push(RATING_COLUMN);
        }
        cols
    }

    pub fn headers(&self) -> Vec<&'static str> {
        self.layout().into_iter().map(|(h, _)| h).collect()
    }

    fn row<'a>(&self, record: &'a ExtractedRecord) -> Vec<&'a str> {
        self.layout()
            .into_iter()
            .map(|(_, f)| record.field(f).as_cell())
            .collect()
    }
}

/// Appends records to a CSV file, flushing and syncing on every call.
#[derive(Debug)]
pub struct CsvRecordSink {
    path: PathBuf,
    columns: Columns,
    writer: Writer<File>,
}

impl CsvRecordSink {
    /// Open `path`. With `append`, existing rows are kept and the header is
    /// only written if the file is new or empty.
    #[instrument(level = "info", skip_all, fields(path = %path.display(), append = append))]
    pub fn create(path: &Path, columns: Columns, append: bool) -> Result<Self, HarvestError> {
        let has_content = append && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if !has_content {
            writer.write_record(columns.headers())?;
            writer.flush()?;
        }
        info!(?columns, "Record sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            columns,
            writer,
        })
    }
}

impl RecordSink for CsvRecordSink {
    fn append(&mut self, records: &[ExtractedRecord]) -> Result<(), HarvestError> {
        for r in records {
            self.writer.write_record(self.columns.row(r))?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        debug!(path = %self.path.display(), rows = records.len(), "Appended records");
        Ok(())
    }
}

/// Maps arbitrary CSV headers onto record fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    fields: Vec<(FieldName, usize)>,
    /// A one-line address column, split on read.
    address: Option<usize>,
}

impl ColumnMap {
    /// Recognise headers case-insensitively. Without a name header column 0
    /// is the name; without any address header column 1 is the address.
    pub fn from_headers(headers: &StringRecord) -> Self {
        let mut map = ColumnMap::default();
        for (i, h) in headers.iter().enumerate() {
            let field = match fold(h).as_str() {
                "facility name" | "name" => FieldName::Name,
                "street address" | "street" => FieldName::Street,
                "city" => FieldName::City,
                "state" => FieldName::State,
                "zip code" | "zip" => FieldName::Zip,
                "phone" => FieldName::Phone,
                "care type" => FieldName::CareType,
                "website" => FieldName::Website,
                "description" => FieldName::Description,
                "rating" => FieldName::Rating,
                "address" => {
                    map.address = Some(i);
                    continue;
                }
                _ => continue,
            };
            map.fields.push((field, i));
        }

        if !map.has(FieldName::Name) {
            map.fields.push((FieldName::Name, 0));
        }
        if map.address.is_none() && !map.has(FieldName::Street) && headers.len() > 1 {
            map.address = Some(1);
        }
        map
    }

    fn has(&self, field: FieldName) -> bool {
        self.fields.iter().any(|(f, _)| *f == field)
    }

    pub fn record(&self, row: &StringRecord) -> ExtractedRecord {
        let mut record = ExtractedRecord::default();
        if let Some(a) = self.address {
            record.set_address(row.get(a).unwrap_or_default());
        }
        for (field, i) in &self.fields {
            let value = Field::from(row.get(*i).unwrap_or_default());
            if value.is_available() || !record.field(*field).is_available() {
                *record.field_mut(*field) = value;
            }
        }
        record
    }
}

/// Read every row of a headered CSV into records.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<ExtractedRecord>, HarvestError> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let map = ColumnMap::from_headers(rdr.headers()?);
    let mut records = Vec::new();
    for row in rdr.records() {
        records.push(map.record(&row?));
    }
    Ok(records)
}

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn read_dataset(path: &Path) -> Result<Vec<ExtractedRecord>, HarvestError> {
    let records = read_records(File::open(path)?)?;
    info!(count = records.len(), "Read dataset");
    Ok(records)
}
