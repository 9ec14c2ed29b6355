//! Baseline Store: versioned reference distributions with a single active pointer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::domain::{CanonicalRecord, CategoricalField, NumericField};
use crate::error::{PipelineError, Result};
use crate::pipeline::drift::stats::{BinEdges, CategoricalProfile, NumericProfile};

/// Immutable per-field summary of a historical record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub name: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source_years: Vec<i32>,
    pub record_count: usize,
    pub numeric: BTreeMap<String, NumericProfile>,
    pub categorical: BTreeMap<String, CategoricalProfile>,
    /// `sha256:<hex>` over the profiles; equal data gives equal fingerprints
    pub fingerprint: String,
}

impl Baseline {
    pub fn build(
        name: &str,
        version: u32,
        records: &[CanonicalRecord],
        bins: usize,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut source_years: Vec<i32> = records.iter().map(|r| r.year).collect();
        source_years.sort_unstable();
        source_years.dedup();

        let mut numeric = BTreeMap::new();
        for field in NumericField::ALL {
            let values: Vec<f64> = records.iter().map(|r| r.numeric_value(field)).collect();
            let edges = match field.bounds() {
                Some((lower, upper)) => BinEdges::fixed(lower, upper, bins),
                None => BinEdges::spanning(&values, bins),
            };
            numeric.insert(field.name().to_string(), NumericProfile::from_values(&values, edges));
        }

        let mut categorical = BTreeMap::new();
        for field in CategoricalField::ALL {
            let profile = CategoricalProfile::from_labels(
                &field.vocabulary(),
                records.iter().map(|r| r.category_label(field)),
            );
            categorical.insert(field.name().to_string(), profile);
        }

        let fingerprint = fingerprint(&numeric, &categorical)?;

        Ok(Self {
            name: name.to_string(),
            version,
            created_at,
            source_years,
            record_count: records.len(),
            numeric,
            categorical,
            fingerprint,
        })
    }
}

fn fingerprint(
    numeric: &BTreeMap<String, NumericProfile>,
    categorical: &BTreeMap<String, CategoricalProfile>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(numeric)?);
    hasher.update(serde_json::to_vec(categorical)?);
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// All versions of one named baseline plus the activation history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineStore {
    versions: Vec<Baseline>,
    /// Versions in activation order; the last one is active
    activations: Vec<u32>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted store; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn active(&self) -> Option<&Baseline> {
        let version = *self.activations.last()?;
        self.get(version)
    }

    pub fn get(&self, version: u32) -> Option<&Baseline> {
        self.versions.iter().find(|b| b.version == version)
    }

    /// Every version ever promoted, oldest first
    pub fn versions(&self) -> &[Baseline] {
        &self.versions
    }

    pub fn activation_history(&self) -> &[u32] {
        &self.activations
    }

    /// Build a new version from `records` and make it active. Prior versions are retained.
    pub fn promote(
        &mut self,
        name: &str,
        records: &[CanonicalRecord],
        bins: usize,
        created_at: DateTime<Utc>,
    ) -> Result<&Baseline> {
        if records.is_empty() {
            return Err(PipelineError::EmptyBaseline);
        }
        let version = self.versions.iter().map(|b| b.version).max().unwrap_or(0) + 1;
        let baseline = Baseline::build(name, version, records, bins, created_at)?;
        info!(
            name,
            version,
            records = baseline.record_count,
            years = ?baseline.source_years,
            fingerprint = %baseline.fingerprint,
            "Promoted baseline"
        );
        let slot = self.versions.len();
        self.versions.push(baseline);
        self.activations.push(version);
        Ok(&self.versions[slot])
    }

    /// Re-activate the version that was active before the current one
    pub fn rollback(&mut self) -> Result<&Baseline> {
        if self.activations.len() < 2 {
            return Err(PipelineError::NothingToRollBack {
                what: "baseline".to_string(),
            });
        }
        let retired = self.activations.pop();
        let version = *self.activations.last().ok_or_else(|| PipelineError::NothingToRollBack {
            what: "baseline".to_string(),
        })?;
        info!(retired = ?retired, active = version, "Rolled back baseline");
        self.get(version).ok_or(PipelineError::BaselineMissing)
    }
}
