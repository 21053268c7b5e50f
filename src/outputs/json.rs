//! JSON reports.
//!
//! The merge command writes its [`MergeReport`](crate::merge::MergeReport)
//! here, and any command can write its run summary with `--summary`:
//!
//! ```text
//! {
//!   "input_records": 412,
//!   "exact_duplicates": 37,
//!   "kept_records": 375,
//!   "threshold": 90.0,
//!   "bucketing": "name",
//!   "scorer": "indel",
//!   "clusters": [ { "bucket": "sunny acres", "representative": 12, "members": [...] } ]
//! }
//! ```

use crate::error::HarvestError;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Serialize `report` as pretty JSON to `path`, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report<T: Serialize>(report: &T, path: &Path) -> Result<(), HarvestError> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!("Wrote JSON report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{MergeSettings, merge};
    use crate::models::{ExtractedRecord, Field};

    #[tokio::test]
    async fn test_write_merge_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/clusters.json");

        let record = |street: &str| ExtractedRecord {
            name: Field::from("Sunny Acres"),
            street: Field::from(street),
            city: Field::from("Springfield"),
            ..Default::default()
        };
        let report = merge(
            &[vec![record("123 Main St"), record("123 Main Street")]],
            &MergeSettings::default(),
        );
        write_report(&report, &path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["kept_records"], 2);
        assert_eq!(value["bucketing"], "name");
        assert_eq!(value["clusters"][0]["members"][1]["address"], "123 Main Street, Springfield");
        assert!(value.get("records").is_none());
    }
}
