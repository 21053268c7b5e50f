//! Facility detail page extractor.
//!
//! Fetches one facility page with the task's session and reads each field
//! through its own CSS selector. A missing element degrades that field only;
//! a connection error or non-success status fails the task.

use super::{Extraction, Extractor, RecordBuilder};
use crate::config::DetailPageSelectors;
use crate::error::{FieldError, HarvestError, TaskError};
use crate::identity::Session;
use crate::models::{ExtractedRecord, FieldName, WorkItem};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct DetailPageExtractor {
    name: Selector,
    address: Selector,
    care_type: Selector,
    phone: Selector,
    website: Selector,
    description: Selector,
}

impl DetailPageExtractor {
    pub fn new(selectors: &DetailPageSelectors) -> Result<Self, HarvestError> {
        Ok(Self {
            name: parse_selector("name", &selectors.name)?,
            address: parse_selector("address", &selectors.address)?,
            care_type: parse_selector("care_type", &selectors.care_type)?,
            phone: parse_selector("phone", &selectors.phone)?,
            website: parse_selector("website", &selectors.website)?,
            description: parse_selector("description", &selectors.description)?,
        })
    }

    /// Read every field from an already fetched page.
    pub fn parse(&self, html: &str) -> Extraction {
        let document = Html::parse_document(html);
        let mut b = RecordBuilder::new(ExtractedRecord::default());

        b.field(FieldName::Name, first_text(&document, &self.name, FieldName::Name))
            .address(first_text(&document, &self.address, FieldName::Street))
            .field(FieldName::CareType, care_types(&document, &self.care_type))
            .field(FieldName::Phone, first_text(&document, &self.phone, FieldName::Phone))
            .field(FieldName::Website, website(&document, &self.website))
            .field(
                FieldName::Description,
                first_text(&document, &self.description, FieldName::Description),
            );
        b.finish()
    }
}

impl Extractor for DetailPageExtractor {
    #[instrument(level = "debug", skip_all, fields(item = %item.id))]
    async fn extract(&self, item: &WorkItem, session: Session) -> Result<Extraction, TaskError> {
        let url = item
            .url()
            .ok_or_else(|| TaskError::InvalidInput(format!("{}: not a URL item", item.id)))?;

        let resp = session
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| session.request_error(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TaskError::Navigation(format!("{url}: HTTP {status}")));
        }
        let body = resp.text().await.map_err(|e| session.request_error(e))?;
        debug!(bytes = body.len(), "Fetched detail page");

        Ok(self.parse(&body))
    }
}

fn parse_selector(field: &str, css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css)
        .map_err(|e| HarvestError::Config(format!("invalid {field} selector {css:?}: {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(doc: &Html, sel: &Selector, field: FieldName) -> Result<String, FieldError> {
    doc.select(sel)
        .map(element_text)
        .find(|t| !t.is_empty())
        .ok_or(FieldError::missing(field))
}

fn care_types(doc: &Html, sel: &Selector) -> Result<String, FieldError> {
    let types: Vec<String> = doc
        .select(sel)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() {
        return Err(FieldError::missing(FieldName::CareType));
    }
    Ok(types.join(", "))
}

/// Prefer the link target; fall back to the visible text.
fn website(doc: &Html, sel: &Selector) -> Result<String, FieldError> {
    let el = doc
        .select(sel)
        .next()
        .ok_or(FieldError::missing(FieldName::Website))?;
    let href = el
        .value()
        .attr("href")
        .or_else(|| {
            el.select(&Selector::parse("a[href]").ok()?)
                .next()
                .and_then(|a| a.value().attr("href"))
        })
        .map(str::trim)
        .filter(|h| !h.is_empty());
    match href {
        Some(h) => Ok(h.to_string()),
        None => Some(element_text(el))
            .filter(|t| !t.is_empty())
            .ok_or(FieldError::missing(FieldName::Website)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClientIdentity;
    use crate::models::{Field, ItemPayload};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><body>
        <h1 class="Facility_name"> Sunny  Acres </h1>
        <div class="Facility_address">123 Main St, Springfield, IL 62701</div>
        <ul>
          <li class="Facility__careTypeItem">Assisted Living</li>
          <li class="Facility__careTypeItem">Memory Care</li>
        </ul>
        <a class="Facility_website" href="https://sunnyacres.example">Visit website</a>
        <p class="Facility_description">A quiet community.</p>
    </body></html>"#;

    fn extractor() -> DetailPageExtractor {
        DetailPageExtractor::new(&DetailPageSelectors::default()).unwrap()
    }

    fn item(url: &str) -> WorkItem {
        WorkItem {
            index: 0,
            id: url.to_string(),
            payload: ItemPayload::Url(url::Url::parse(url).unwrap()),
        }
    }

    fn session() -> Session {
        Session::open(ClientIdentity::random(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_degrades_missing_fields_only() {
        let out = extractor().parse(PAGE);
        let r = &out.record;

        assert_eq!(r.name, Field::from("Sunny Acres"));
        assert_eq!(r.street, Field::from("123 Main St"));
        assert_eq!(r.state, Field::from("IL"));
        assert_eq!(r.zip, Field::from("62701"));
        assert_eq!(r.care_type, Field::from("Assisted Living, Memory Care"));
        assert_eq!(r.website, Field::from("https://sunnyacres.example"));
        assert_eq!(r.phone, Field::Unavailable);
        assert_eq!(out.field_errors, vec![FieldError::missing(FieldName::Phone)]);
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let selectors = DetailPageSelectors {
            phone: "[[".into(),
            ..Default::default()
        };
        assert!(matches!(
            DetailPageExtractor::new(&selectors),
            Err(HarvestError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_fetches_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/facility/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let out = extractor()
            .extract(&item(&format!("{}/facility/1", server.uri())), session())
            .await
            .unwrap();
        assert_eq!(out.record.city, Field::from("Springfield"));
    }

    #[tokio::test]
    async fn test_non_success_status_fails_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = extractor()
            .extract(&item(&format!("{}/gone", server.uri())), session())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "navigation");
    }

    #[tokio::test]
    async fn test_slow_page_is_a_timeout_not_navigation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(PAGE)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let session = Session::open(ClientIdentity::random(), Duration::from_millis(100)).unwrap();
        let err = extractor()
            .extract(&item(&format!("{}/slow", server.uri())), session)
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Timeout(Duration::from_millis(100)));
        assert_eq!(err.reason(), "timeout");
    }
}
