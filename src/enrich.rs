//! Batch enrichment through a structured-inference API.
//!
//! One request answers a whole batch: the prompt lists every facility and
//! the model must reply with a JSON array holding one
//! `{phone, website, rating}` object per facility, in order.
//!
//! # Shape validation
//!
//! A reply is accepted only if it parses as a JSON array whose length
//! equals the batch size. Entries are then read one by one: anything that
//! is not an object, and any value that is neither a string nor a number,
//! reads as unavailable. Otherwise the whole batch is asked again
//! once, as a fresh request. If that fails as well, every item keeps its
//! known columns with `phone`, `website` and `rating` unavailable. Those
//! items still count as processed; they are not written to the failure log.
//!
//! Only the shape is checked. A well-formed reply with invented values
//! passes.

use crate::api::AskAsync;
use crate::error::{FieldError, ResponseShapeError};
use crate::models::{
    Batch, ExtractedRecord, Field, FieldName, ItemPayload, TaskOutcome, TaskResult, WorkItem,
};
use crate::runner::BatchDriver;
use crate::utils::{looks_truncated, strip_code_fence, truncate_for_log};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Whole-batch retries allowed after a shape failure.
pub const MAX_SHAPE_RETRIES: usize = 1;

const ENRICHED_FIELDS: [FieldName; 3] = [FieldName::Phone, FieldName::Website, FieldName::Rating];

/// One entry of the model's reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactEstimate {
    pub phone: Field,
    pub website: Field,
    pub rating: Field,
}

impl ContactEstimate {
    /// Read one array entry. Never fails; odd entries degrade to unavailable.
    pub fn from_entry(entry: &Value) -> Self {
        let Value::Object(map) = entry else {
            return Self::default();
        };
        let field = |key: &str| match map.get(key) {
            Some(Value::String(s)) => Field::from(s.as_str()),
            Some(Value::Number(n)) => Field::from(n.to_string().as_str()),
            _ => Field::Unavailable,
        };
        Self {
            phone: field("phone"),
            website: field("website"),
            rating: field("rating"),
        }
    }
}

pub fn build_prompt(items: &[WorkItem]) -> String {
    let facilities = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let (name, address) = match &item.payload {
                ItemPayload::Facility { name, address, .. } => (name.as_str(), address.as_str()),
                ItemPayload::Url(u) => (u.as_str(), ""),
            };
            format!("Facility {}: Name: {}, Address: {}", i + 1, name, address)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a data extractor. For each senior living facility below, extract ONLY these fields from reliable public sources (prefer Google Business, official website, Yelp):

- phone: US format phone number (e.g. +1 512-555-0123 or 512-555-0123) or null
- website: full official website URL (starting with https:// or http://) or null
- rating: string in exact format "X.X / 5 from YYY reviews" (e.g. "4.3 / 5 from 127 reviews") or null if not found

Facilities:
{facilities}

Return ONLY a valid JSON array of {count} objects in this exact order, nothing else:
[
  {{"phone": "... or null", "website": "... or null", "rating": "... or null"}},
  ...
]

Do NOT add explanations, introductions, conclusions or any other text."#,
        count = items.len()
    )
}

/// Check that `text` is a JSON array of exactly `expected` estimates.
pub fn validate_response(
    text: &str,
    expected: usize,
) -> Result<Vec<ContactEstimate>, ResponseShapeError> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| {
        if looks_truncated(&e) {
            ResponseShapeError::Unparseable(format!("truncated: {e}"))
        } else {
            ResponseShapeError::Unparseable(e.to_string())
        }
    })?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(_) => return Err(ResponseShapeError::NotAnArray("an object")),
        Value::String(_) => return Err(ResponseShapeError::NotAnArray("a string")),
        Value::Number(_) => return Err(ResponseShapeError::NotAnArray("a number")),
        Value::Bool(_) => return Err(ResponseShapeError::NotAnArray("a boolean")),
        Value::Null => return Err(ResponseShapeError::NotAnArray("null")),
    };

    if entries.len() != expected {
        return Err(ResponseShapeError::LengthMismatch {
            expected,
            actual: entries.len(),
        });
    }

    Ok(entries.iter().map(ContactEstimate::from_entry).collect())
}

/// Batch driver backed by a structured-inference client.
#[derive(Debug)]
pub struct StructuredEnricher<A> {
    client: A,
    retry_delay: Duration,
    batch_pause: Duration,
}

impl<A: AskAsync> StructuredEnricher<A> {
    pub fn new(client: A, retry_delay: Duration, batch_pause: Duration) -> Self {
        Self {
            client,
            retry_delay,
            batch_pause,
        }
    }

    #[instrument(level = "info", skip_all, fields(batch = batch.id, size = batch.len()))]
    pub async fn enrich(&self, batch: &Batch) -> Vec<TaskResult> {
        if batch.is_empty() {
            return Vec::new();
        }
        let t0 = Instant::now();
        let prompt = build_prompt(&batch.items);
        let estimates = self.request_validated(&prompt, batch.len()).await;

        let results: Vec<TaskResult> = match estimates {
            Ok(estimates) => batch
                .items
                .iter()
                .zip(estimates)
                .map(|(item, est)| {
                    let mut record = item.base_record();
                    record.phone = est.phone;
                    record.website = est.website;
                    record.rating = est.rating;
                    succeeded(batch.id, item, record, Vec::new())
                })
                .collect(),
            Err(e) => {
                error!(batch = batch.id, error = %e, "Batch left without enrichment data");
                batch
                    .items
                    .iter()
                    .map(|item| {
                        let mut record = item.base_record();
                        let mut errors = Vec::new();
                        for f in ENRICHED_FIELDS {
                            *record.field_mut(f) = Field::Unavailable;
                            errors.push(FieldError {
                                field: f,
                                message: e.to_string(),
                            });
                        }
                        succeeded(batch.id, item, record, errors)
                    })
                    .collect()
            }
        };

        info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Batch enriched");
        sleep(self.batch_pause).await;
        results
    }

    /// Ask, validate, and retry the whole batch at most [`MAX_SHAPE_RETRIES`] times.
    async fn request_validated(
        &self,
        prompt: &str,
        expected: usize,
    ) -> Result<Vec<ContactEstimate>, ResponseShapeError> {
        let mut retries_left = MAX_SHAPE_RETRIES;
        loop {
            let err = match self.attempt(prompt, expected).await {
                Ok(estimates) => return Ok(estimates),
                Err(e) => e,
            };
            if retries_left == 0 {
                return Err(err);
            }
            retries_left -= 1;
            warn!(error = %err, "Response failed shape validation; retrying batch");
            sleep(self.retry_delay).await;
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        expected: usize,
    ) -> Result<Vec<ContactEstimate>, ResponseShapeError> {
        let text = self
            .client
            .ask(prompt)
            .await
            .map_err(|e| ResponseShapeError::Transport(e.to_string()))?;

        validate_response(&text, expected).inspect_err(|e| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&text, 300),
                "Non-conforming response"
            );
        })
    }
}

impl<A: AskAsync> BatchDriver for StructuredEnricher<A> {
    async fn process(&self, batch: &Batch) -> Vec<TaskResult> {
        self.enrich(batch).await
    }
}

fn succeeded(
    batch_id: usize,
    item: &WorkItem,
    record: ExtractedRecord,
    field_errors: Vec<FieldError>,
) -> TaskResult {
    TaskResult {
        index: item.index,
        item_id: item.id.clone(),
        batch_id,
        outcome: TaskOutcome::Succeeded {
            record,
            field_errors,
        },
    }
}
