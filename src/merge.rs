//! Dataset merging with exact dedup and near-duplicate reporting.
//!
//! # Passes
//!
//! 1. **Exact**: records are concatenated in input order and the first
//!    record per [`MergeKey`] (folded name + folded address) is kept.
//! 2. **Fuzzy**: the surviving records are bucketed (by folded name, or by
//!    `city|state`). Within a bucket each record's folded address is scored
//!    against every cluster representative; a score strictly above the
//!    threshold joins that cluster, otherwise the record starts a new one.
//!
//! The fuzzy pass only reports. Clusters with two or more members are
//! listed for review, and no record is dropped because of them.

use crate::models::ExtractedRecord;
use crate::utils::fold;
use clap::ValueEnum;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Identity of a record for the exact pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub name: String,
    pub address: String,
}

impl MergeKey {
    pub fn of(record: &ExtractedRecord) -> Self {
        Self {
            name: fold(record.name.value().unwrap_or_default()),
            address: fold(&record.address_text()),
        }
    }
}

/// How records are grouped before fuzzy comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucketing {
    /// Same folded facility name.
    #[default]
    Name,
    /// Same `city|state`.
    Locality,
}

/// Address similarity function, 0 to 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scorer {
    /// `200 * LCS / (|a| + |b|)` over characters.
    #[default]
    Indel,
    JaroWinkler,
}

impl Scorer {
    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            Scorer::Indel => indel_ratio(a, b),
            Scorer::JaroWinkler => strsim::jaro_winkler(a, b) * 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeSettings {
    pub threshold: f64,
    pub bucketing: Bucketing,
    pub scorer: Scorer,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            threshold: 90.0,
            bucketing: Bucketing::default(),
            scorer: Scorer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    /// Position in the merged output.
    pub index: usize,
    pub name: String,
    pub address: String,
    /// Score against the representative; 100 for the representative itself.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub bucket: String,
    pub representative: usize,
    pub members: Vec<ClusterMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub input_records: usize,
    pub exact_duplicates: usize,
    pub kept_records: usize,
    pub threshold: f64,
    pub bucketing: Bucketing,
    pub scorer: Scorer,
    pub clusters: Vec<DuplicateCluster>,
    #[serde(skip)]
    pub records: Vec<ExtractedRecord>,
}

/// Normalised indel similarity: `200 * LCS / (|a| + |b|)`.
///
/// Two empty strings score 100.
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let lcs = prev[b.len()];
    200.0 * lcs as f64 / total as f64
}

fn bucket_key(record: &ExtractedRecord, bucketing: Bucketing) -> String {
    match bucketing {
        Bucketing::Name => fold(record.name.value().unwrap_or_default()),
        Bucketing::Locality => format!(
            "{}|{}",
            fold(record.city.value().unwrap_or_default()),
            fold(record.state.value().unwrap_or_default())
        ),
    }
}

/// Merge `datasets` in order.
#[instrument(level = "info", skip_all, fields(datasets = datasets.len(), threshold = settings.threshold))]
pub fn merge(datasets: &[Vec<ExtractedRecord>], settings: &MergeSettings) -> MergeReport {
    let input_records: usize = datasets.iter().map(Vec::len).sum();

    let records: Vec<ExtractedRecord> = datasets
        .iter()
        .flatten()
        .unique_by(|r| MergeKey::of(r))
        .cloned()
        .collect();
    let exact_duplicates = input_records - records.len();
    info!(input_records, kept = records.len(), exact_duplicates, "Exact pass done");

    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
    let mut bucket_order: Vec<String> = Vec::new();
    for (i, r) in records.iter().enumerate() {
        let key = bucket_key(r, settings.bucketing);
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                bucket_order.push(key);
                Vec::new()
            })
            .push(i);
    }

    let addresses: Vec<String> = records.iter().map(|r| fold(&r.address_text())).collect();
    let mut clusters = Vec::new();
    for key in bucket_order {
        let members = &buckets[&key];
        if members.len() < 2 {
            continue;
        }

        let mut groups: Vec<Vec<(usize, f64)>> = Vec::new();
        for &i in members {
            let joined = groups.iter_mut().find_map(|g| {
                let rep = g[0].0;
                let score = settings.scorer.score(&addresses[i], &addresses[rep]);
                (score > settings.threshold).then(|| g.push((i, score)))
            });
            if joined.is_none() {
                groups.push(vec![(i, 100.0)]);
            }
        }

        for g in groups.into_iter().filter(|g| g.len() >= 2) {
            debug!(bucket = %key, size = g.len(), "Near-duplicate cluster");
            clusters.push(DuplicateCluster {
                bucket: key.clone(),
                representative: g[0].0,
                members: g
                    .into_iter()
                    .map(|(index, score)| ClusterMember {
                        index,
                        name: records[index].name.as_cell().to_string(),
                        address: records[index].address_text(),
                        score: (score * 100.0).round() / 100.0,
                    })
                    .collect(),
            });
        }
    }

    info!(clusters = clusters.len(), "Fuzzy pass done");
    MergeReport {
        input_records,
        exact_duplicates,
        kept_records: records.len(),
        threshold: settings.threshold,
        bucketing: settings.bucketing,
        scorer: settings.scorer,
        clusters,
        records,
    }
}
