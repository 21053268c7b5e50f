//! Data models for work items, extracted records, and task results.
//!
//! This module defines the core data structures used throughout the application:
//! - [`WorkItem`]: One validated unit of input (a URL or a name/address pair)
//! - [`Batch`]: A bounded, ordered slice of work items
//! - [`ExtractedRecord`]: A facility record where every field is always present
//! - [`TaskResult`]: The terminal outcome of one task
//! - [`FailureRecord`]: One line of the append-only failure log

use crate::error::{FieldError, TaskError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Sentinel text written wherever a field is [`Field::Unavailable`].
pub const UNAVAILABLE: &str = "Not available";

/// A record field: either a value or an explicit "unavailable" marker.
///
/// Serializes as a JSON string or `null`. Empty strings, `"null"` and
/// [`UNAVAILABLE`] all read back as `Unavailable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Field {
    Value(String),
    #[default]
    Unavailable,
}

impl Field {
    pub fn value(&self) -> Option<&str> {
        match self {
            Field::Value(v) => Some(v),
            Field::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Field::Value(_))
    }

    /// Text used in tabular output.
    pub fn as_cell(&self) -> &str {
        self.value().unwrap_or(UNAVAILABLE)
    }
}

impl From<Option<String>> for Field {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => Field::from(s.as_str()),
            None => Field::Unavailable,
        }
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("null") || t == UNAVAILABLE {
            Field::Unavailable
        } else {
            Field::Value(t.to_string())
        }
    }
}

impl From<Field> for Option<String> {
    fn from(f: Field) -> Self {
        match f {
            Field::Value(v) => Some(v),
            Field::Unavailable => None,
        }
    }
}

/// Names of the record fields, used to attribute [`FieldError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Name,
    Street,
    City,
    State,
    Zip,
    Phone,
    CareType,
    Website,
    Description,
    Rating,
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldName::Name => "name",
            FieldName::Street => "street",
            FieldName::City => "city",
            FieldName::State => "state",
            FieldName::Zip => "zip",
            FieldName::Phone => "phone",
            FieldName::CareType => "care_type",
            FieldName::Website => "website",
            FieldName::Description => "description",
            FieldName::Rating => "rating",
        };
        f.write_str(s)
    }
}

/// A harvested facility record.
///
/// Every field is always present; missing data is [`Field::Unavailable`],
/// never an absent key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub name: Field,
    pub street: Field,
    pub city: Field,
    pub state: Field,
    pub zip: Field,
    pub phone: Field,
    pub care_type: Field,
    pub website: Field,
    pub description: Field,
    pub rating: Field,
}

impl ExtractedRecord {
    pub fn field(&self, name: FieldName) -> &Field {
        match name {
            FieldName::Name => &self.name,
            FieldName::Street => &self.street,
            FieldName::City => &self.city,
            FieldName::State => &self.state,
            FieldName::Zip => &self.zip,
            FieldName::Phone => &self.phone,
            FieldName::CareType => &self.care_type,
            FieldName::Website => &self.website,
            FieldName::Description => &self.description,
            FieldName::Rating => &self.rating,
        }
    }

    pub fn field_mut(&mut self, name: FieldName) -> &mut Field {
        match name {
            FieldName::Name => &mut self.name,
            FieldName::Street => &mut self.street,
            FieldName::City => &mut self.city,
            FieldName::State => &mut self.state,
            FieldName::Zip => &mut self.zip,
            FieldName::Phone => &mut self.phone,
            FieldName::CareType => &mut self.care_type,
            FieldName::Website => &mut self.website,
            FieldName::Description => &mut self.description,
            FieldName::Rating => &mut self.rating,
        }
    }

    /// Fill street, city, state and zip from a single comma separated address.
    pub fn set_address(&mut self, address: &str) {
        let (street, city, state, zip) = split_address(address);
        self.street = street;
        self.city = city;
        self.state = state;
        self.zip = zip;
    }

    /// Address as one line, e.g. `"123 Main St, Springfield, IL 62701"`.
    /// Unavailable parts are skipped.
    pub fn address_text(&self) -> String {
        let state_zip = [self.state.value(), self.zip.value()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let state_zip = (!state_zip.is_empty()).then_some(state_zip);

        [
            self.street.value().map(str::to_string),
            self.city.value().map(str::to_string),
            state_zip,
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Split `"street, city, STATE ZIP"` into its parts.
///
/// Missing parts come back as [`Field::Unavailable`].
pub fn split_address(address: &str) -> (Field, Field, Field, Field) {
    let parts: Vec<&str> = address.split(',').map(str::trim).collect();
    let street = parts.first().copied().map(Field::from).unwrap_or_default();
    let city = parts.get(1).copied().map(Field::from).unwrap_or_default();

    let mut state_zip = parts.get(2).copied().unwrap_or_default().split_whitespace();
    let state = state_zip.next().map(Field::from).unwrap_or_default();
    let zip = state_zip.next().map(Field::from).unwrap_or_default();

    (street, city, state, zip)
}

/// What a work item points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPayload {
    /// A facility detail page.
    Url(Url),
    /// A known facility to enrich. `base` carries the columns already known.
    Facility {
        name: String,
        address: String,
        base: ExtractedRecord,
    },
}

/// One validated unit of input. Immutable once admitted by the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in the input sequence.
    pub index: usize,
    /// Identity token written to logs and the failure sink.
    pub id: String,
    pub payload: ItemPayload,
}

impl WorkItem {
    pub fn url(&self) -> Option<&Url> {
        match &self.payload {
            ItemPayload::Url(u) => Some(u),
            ItemPayload::Facility { .. } => None,
        }
    }

    /// Known columns for this item; empty for URL items.
    pub fn base_record(&self) -> ExtractedRecord {
        match &self.payload {
            ItemPayload::Url(_) => ExtractedRecord::default(),
            ItemPayload::Facility { base, .. } => base.clone(),
        }
    }
}

/// A consecutive slice of at most `B` work items.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based batch number.
    pub id: usize,
    pub items: Vec<WorkItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Task lifecycle. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded {
        record: ExtractedRecord,
        /// Fields that degraded to the sentinel, with their causes.
        field_errors: Vec<FieldError>,
    },
    Failed(TaskError),
}

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub index: usize,
    pub item_id: String,
    pub batch_id: usize,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn state(&self) -> TaskState {
        match self.outcome {
            TaskOutcome::Succeeded { .. } => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }
}

/// One append-only line of the failure log.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub item_id: String,
    /// `None` for items rejected before scheduling.
    pub batch_id: Option<usize>,
    pub reason: &'static str,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(item_id: impl Into<String>, batch_id: Option<usize>, error: &TaskError) -> Self {
        Self {
            item_id: item_id.into(),
            batch_id,
            reason: error.reason(),
            detail: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_normalizes_sentinels() {
        assert_eq!(Field::from(""), Field::Unavailable);
        assert_eq!(Field::from("null"), Field::Unavailable);
        assert_eq!(Field::from(UNAVAILABLE), Field::Unavailable);
        assert_eq!(Field::from("  555-0100 "), Field::Value("555-0100".into()));
    }

    #[test]
    fn test_field_json_null() {
        let f: Field = serde_json::from_str("null").unwrap();
        assert_eq!(f, Field::Unavailable);
        assert_eq!(serde_json::to_string(&Field::Unavailable).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Field::from("x")).unwrap(), "\"x\"");
    }

    #[test]
    fn test_default_record_is_all_sentinel() {
        let r = ExtractedRecord::default();
        let json = serde_json::to_value(&r).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 10);
        assert!(obj.values().all(|v| v.is_null()));
    }

    #[test]
    fn test_split_address_full() {
        let (street, city, state, zip) = split_address("123 Main St, Springfield, IL 62701");
        assert_eq!(street, Field::from("123 Main St"));
        assert_eq!(city, Field::from("Springfield"));
        assert_eq!(state, Field::from("IL"));
        assert_eq!(zip, Field::from("62701"));
    }

    #[test]
    fn test_split_address_partial() {
        let (street, city, state, zip) = split_address("123 Main St");
        assert_eq!(street, Field::from("123 Main St"));
        assert_eq!(city, Field::Unavailable);
        assert_eq!(state, Field::Unavailable);
        assert_eq!(zip, Field::Unavailable);
    }

    #[test]
    fn test_address_text_round_trips_split() {
        let mut r = ExtractedRecord::default();
        r.set_address("123 Main St, Springfield, IL 62701");
        assert_eq!(r.address_text(), "123 Main St, Springfield, IL 62701");

        let mut r = ExtractedRecord::default();
        r.set_address("123 Main St, Springfield");
        assert_eq!(r.address_text(), "123 Main St, Springfield");
    }

    #[test]
    fn test_failure_record_reason() {
        let f = FailureRecord::new("not-a-url", None, &TaskError::InvalidInput("bad".into()));
        assert_eq!(f.reason, "invalid-input");
        assert_eq!(f.batch_id, None);
        assert_eq!(f.detail, "invalid input: bad");
    }
}
