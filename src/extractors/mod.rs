//! Pluggable extractors that turn one [`WorkItem`] into a record.
//!
//! Each extractor follows the same contract:
//!
//! 1. It receives a [`Session`] it owns exclusively for the duration of the task
//! 2. Field extraction is attempted independently per field through a [`RecordBuilder`]
//! 3. Only whole-item conditions (connection error, bad status) fail the task
//!
//! # Provided Extractors
//!
//! | Extractor | Module | Input | Notes |
//! |-----------|--------|-------|-------|
//! | Detail page | [`detail_page`] | URL | CSS selectors from config |
//! | Contact search | [`contact_search`] | name/address | phone regex over search snippets |
//!
//! The LLM batch enricher answers whole batches at once and lives in
//! [`crate::enrich`] instead.

pub mod contact_search;
pub mod detail_page;

use crate::error::{FieldError, TaskError};
use crate::identity::Session;
use crate::models::{ExtractedRecord, Field, FieldName, WorkItem};

/// Turns one work item into a record, or a task-level failure.
pub trait Extractor {
    async fn extract(&self, item: &WorkItem, session: Session) -> Result<Extraction, TaskError>;
}

/// A successful extraction. Some fields may have degraded.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub record: ExtractedRecord,
    pub field_errors: Vec<FieldError>,
}

/// Aggregates typed per-field results into one record.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    record: ExtractedRecord,
    errors: Vec<FieldError>,
}

impl RecordBuilder {
    /// Start from already known columns.
    pub fn new(base: ExtractedRecord) -> Self {
        Self {
            record: base,
            errors: Vec::new(),
        }
    }

    pub fn field(&mut self, name: FieldName, result: Result<String, FieldError>) -> &mut Self {
        *self.record.field_mut(name) = match result {
            Ok(v) => Field::from(v.as_str()),
            Err(e) => {
                self.errors.push(e);
                Field::Unavailable
            }
        };
        self
    }

    /// Set an optional field; `None` is "confirmed absent", not an error.
    pub fn optional(&mut self, name: FieldName, value: Option<String>) -> &mut Self {
        *self.record.field_mut(name) = Field::from(value);
        self
    }

    /// Split a one-line address into street, city, state and zip.
    pub fn address(&mut self, result: Result<String, FieldError>) -> &mut Self {
        match result {
            Ok(a) => self.record.set_address(&a),
            Err(e) => {
                self.errors.push(e);
                for f in [FieldName::Street, FieldName::City, FieldName::State, FieldName::Zip] {
                    *self.record.field_mut(f) = Field::Unavailable;
                }
            }
        }
        self
    }

    pub fn finish(self) -> Extraction {
        Extraction {
            record: self.record,
            field_errors: self.errors,
        }
    }
}
