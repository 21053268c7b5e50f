//! Run configuration.
//!
//! Settings come from an optional YAML file (`--config`), then CLI flags and
//! environment variables override individual knobs. Every knob has a default
//! so a run works without any file.
//!
//! ```yaml
//! concurrency: 3
//! batch_size: 20
//! min_delay_ms: 1000
//! max_delay_ms: 3000
//! task_timeout_secs: 60
//! similarity_threshold: 90.0
//! detail_page:
//!   name: ".Facility_name"
//! llm:
//!   model: "grok-beta"
//! ```

use crate::error::HarvestError;
use crate::governor::{GovernorSettings, Pacing};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub task_timeout_secs: u64,
    pub similarity_threshold: f64,
    pub detail_page: DetailPageSelectors,
    pub search: SearchConfig,
    pub llm: LlmConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_size: 20,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
            task_timeout_secs: 60,
            similarity_threshold: 90.0,
            detail_page: DetailPageSelectors::default(),
            search: SearchConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// CSS selectors for facility detail pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailPageSelectors {
    pub name: String,
    pub address: String,
    pub care_type: String,
    pub phone: String,
    pub website: String,
    pub description: String,
}

impl Default for DetailPageSelectors {
    fn default() -> Self {
        Self {
            name: ".Facility_name".into(),
            address: ".Facility_address".into(),
            care_type: ".Facility__careTypeItem".into(),
            phone: ".Facility_phone".into(),
            website: ".Facility_website".into(),
            description: ".Facility_description".into(),
        }
    }
}

/// HTML search endpoint used by the contact enricher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Base URL; the query is appended as `q=<query>`.
    pub endpoint: String,
    pub snippet_selector: String,
    pub link_selector: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".into(),
            snippet_selector: ".result__snippet".into(),
            link_selector: "a[href]".into(),
        }
    }
}

/// OpenAI-compatible chat completion settings for batch enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub batch_size: usize,
    pub retry_delay_ms: u64,
    pub batch_pause_ms: u64,
    /// Transport retries inside one attempt (HTTP errors, 5xx, 429).
    pub transport_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".into(),
            model: "grok-beta".into(),
            temperature: 0.2,
            max_tokens: 1000,
            batch_size: 5,
            retry_delay_ms: 2000,
            batch_pause_ms: 1000,
            transport_retries: 2,
        }
    }
}

/// Per-flag overrides collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub task_timeout_secs: Option<u64>,
    pub similarity_threshold: Option<f64>,
}

impl HarvestConfig {
    /// Load from a YAML file, or defaults when `path` is `None`.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, HarvestError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)?;
        let config: HarvestConfig = serde_yaml::from_str(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn apply(mut self, o: &Overrides) -> Self {
        if let Some(v) = o.concurrency {
            self.concurrency = v;
        }
        if let Some(v) = o.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = o.min_delay_ms {
            self.min_delay_ms = v;
        }
        if let Some(v) = o.max_delay_ms {
            self.max_delay_ms = v;
        }
        if let Some(v) = o.task_timeout_secs {
            self.task_timeout_secs = v;
        }
        if let Some(v) = o.similarity_threshold {
            self.similarity_threshold = v;
        }
        self
    }

    /// Reject settings the engine cannot honour. Called before scheduling.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.concurrency == 0 {
            return Err(HarvestError::Config("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 || self.llm.batch_size == 0 {
            return Err(HarvestError::Config("batch size must be at least 1".into()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(HarvestError::Config(format!(
                "min delay {}ms exceeds max delay {}ms",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.task_timeout_secs == 0 {
            return Err(HarvestError::Config("task timeout must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.similarity_threshold) {
            return Err(HarvestError::Config(format!(
                "similarity threshold {} is outside 0..=100",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    pub fn governor_settings(&self) -> GovernorSettings {
        GovernorSettings {
            concurrency: self.concurrency,
            pacing: Pacing::new(
                Duration::from_millis(self.min_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
        }
    }
}

/// Fetch a mandatory credential, failing before any task is scheduled.
pub fn require_credential(
    value: Option<&str>,
    name: &'static str,
) -> Result<String, HarvestError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(HarvestError::MissingCredential(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let c = HarvestConfig::default();
        c.validate().unwrap();
        assert_eq!(c.concurrency, 3);
        assert_eq!(c.batch_size, 20);
        assert_eq!(c.llm.batch_size, 5);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "concurrency: 8\nllm:\n  model: custom-model\n").unwrap();
        let c = HarvestConfig::load(Some(f.path())).unwrap();
        assert_eq!(c.concurrency, 8);
        assert_eq!(c.batch_size, 20);
        assert_eq!(c.llm.model, "custom-model");
        assert_eq!(c.llm.base_url, "https://api.x.ai/v1");
    }

    #[test]
    fn test_overrides_win() {
        let c = HarvestConfig::default().apply(&Overrides {
            batch_size: Some(7),
            similarity_threshold: Some(85.0),
            ..Default::default()
        });
        assert_eq!(c.batch_size, 7);
        assert_eq!(c.similarity_threshold, 85.0);
        assert_eq!(c.concurrency, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            HarvestConfig { concurrency: 0, ..Default::default() },
            HarvestConfig { batch_size: 0, ..Default::default() },
            HarvestConfig { min_delay_ms: 5, max_delay_ms: 1, ..Default::default() },
            HarvestConfig { task_timeout_secs: 0, ..Default::default() },
            HarvestConfig { similarity_threshold: 101.0, ..Default::default() },
        ];
        for c in bad {
            assert!(matches!(c.validate(), Err(HarvestError::Config(_))), "{c:?}");
        }
    }

    #[test]
    fn test_require_credential() {
        assert_eq!(require_credential(Some("key"), "GROK_API_KEY").unwrap(), "key");
        assert!(matches!(
            require_credential(None, "GROK_API_KEY"),
            Err(HarvestError::MissingCredential("GROK_API_KEY"))
        ));
        assert!(require_credential(Some("  "), "GROK_API_KEY").is_err());
    }
}
