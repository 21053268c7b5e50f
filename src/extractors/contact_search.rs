//! Phone and website lookup through an HTML search endpoint.
//!
//! Queries `"{name} phone site"`, takes the first US phone number found in
//! the result snippets and the first external link. Neither being found is
//! an ordinary outcome, not an error.

use super::{Extraction, Extractor, RecordBuilder};
use crate::config::SearchConfig;
use crate::error::{HarvestError, TaskError};
use crate::identity::Session;
use crate::models::{FieldName, ItemPayload, WorkItem};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+1\s?)?(\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4})").expect("valid phone regex")
});

#[derive(Debug)]
pub struct ContactSearchExtractor {
    endpoint: Url,
    snippet: Selector,
    link: Selector,
}

impl ContactSearchExtractor {
    pub fn new(config: &SearchConfig) -> Result<Self, HarvestError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| HarvestError::Config(format!("search endpoint {:?}: {e}", config.endpoint)))?;
        let selector = |css: &str| {
            Selector::parse(css)
                .map_err(|e| HarvestError::Config(format!("invalid search selector {css:?}: {e}")))
        };
        Ok(Self {
            endpoint,
            snippet: selector(&config.snippet_selector)?,
            link: selector(&config.link_selector)?,
        })
    }

    fn query_url(&self, name: &str) -> String {
        let query = urlencoding::encode(&format!("{name} phone site")).into_owned();
        let sep = if self.endpoint.query().is_some() { '&' } else { '?' };
        format!("{}{sep}q={query}", self.endpoint)
    }

    /// First phone number in the snippets and first link leaving the search host.
    pub fn parse(&self, html: &str) -> (Option<String>, Option<String>) {
        let document = Html::parse_document(html);

        let phone = document
            .select(&self.snippet)
            .map(|el| el.text().collect::<String>())
            .find_map(|text| PHONE_RE.find(&text).map(|m| m.as_str().trim().to_string()));

        let search_host = self.endpoint.host_str();
        let website = document
            .select(&self.link)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| Url::parse(href).ok())
            .find(|u| matches!(u.scheme(), "http" | "https") && u.host_str() != search_host)
            .map(String::from);

        (phone, website)
    }
}

impl Extractor for ContactSearchExtractor {
    #[instrument(level = "debug", skip_all, fields(item = %item.id))]
    async fn extract(&self, item: &WorkItem, session: Session) -> Result<Extraction, TaskError> {
        let ItemPayload::Facility { name, .. } = &item.payload else {
            return Err(TaskError::InvalidInput(format!("{}: not a facility item", item.id)));
        };

        let resp = session
            .client
            .get(self.query_url(name))
            .send()
            .await
            .map_err(|e| session.request_error(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TaskError::Navigation(format!("search returned HTTP {status}")));
        }
        let body = resp.text().await.map_err(|e| session.request_error(e))?;

        let (phone, website) = self.parse(&body);
        debug!(found_phone = phone.is_some(), found_website = website.is_some(), "Search parsed");

        let mut b = RecordBuilder::new(item.base_record());
        b.optional(FieldName::Phone, phone)
            .optional(FieldName::Website, website);
        Ok(b.finish())
    }
}
