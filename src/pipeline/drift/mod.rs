//! Drift Detector.
//!
//! Owns the [`BaselineStore`] and compares validated batches against the
//! active baseline. The verdict is a plain value: fields in a fixed order,
//! maps sorted, no timestamps other than the batch's own ingestion time, so
//! the same inputs always serialize to the same bytes.

pub mod baseline;
pub mod stats;

pub use baseline::{Baseline, BaselineStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::{DriftConfig, DriftStatistic};
use crate::domain::{CanonicalRecord, CategoricalField, NumericField};
use crate::error::{PipelineError, Result};
use crate::metrics::drift::DriftMetrics;
use stats::{ks_distance, mean_and_std, population_stability_index, proportions, CategoricalProfile};

/// Lifecycle of the detector with respect to its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriftState {
    NoBaseline,
    BaselineActive { version: u32 },
    /// Held only while one batch is being compared
    BatchCompared { version: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDetail {
    Numeric {
        baseline_mean: f64,
        batch_mean: f64,
        /// Mean shift in baseline standard deviations; absent when the baseline is constant
        mean_shift_sd: Option<f64>,
    },
    Categorical {
        deltas: BTreeMap<String, f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    pub field: String,
    pub kind: FieldKind,
    pub statistic: String,
    pub score: f64,
    pub threshold: f64,
    pub drifted: bool,
    pub detail: FieldDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftVerdict {
    pub batch_year: i32,
    pub ingested_at: DateTime<Utc>,
    pub baseline_name: String,
    pub baseline_version: u32,
    pub baseline_fingerprint: String,
    pub rows: usize,
    pub fields: Vec<FieldDrift>,
    /// OR of the per-field flags
    pub drifted: bool,
}

impl DriftVerdict {
    pub fn drifted_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.drifted)
            .map(|f| f.field.as_str())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDrift> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Artifact key derived from the batch ingestion timestamp
    pub fn artifact_key(&self) -> String {
        artifact_key(self.batch_year, &self.ingested_at)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn artifact_key(year: i32, ingested_at: &DateTime<Utc>) -> String {
    format!("drift_{}_{}", year, ingested_at.format("%Y%m%dT%H%M%S%.6fZ"))
}

pub struct DriftDetector {
    config: DriftConfig,
    store: BaselineStore,
    state: DriftState,
}

impl DriftDetector {
    pub fn new(config: DriftConfig, store: BaselineStore) -> Self {
        let state = match store.active() {
            Some(baseline) => DriftState::BaselineActive {
                version: baseline.version,
            },
            None => DriftState::NoBaseline,
        };
        Self {
            config,
            store,
            state,
        }
    }

    pub fn state(&self) -> DriftState {
        self.state
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    pub fn active_baseline(&self) -> Option<&Baseline> {
        self.store.active()
    }

    /// First baseline load. Only valid while no baseline is active.
    pub fn seed_baseline(
        &mut self,
        records: &[CanonicalRecord],
        created_at: DateTime<Utc>,
    ) -> Result<&Baseline> {
        if let DriftState::BaselineActive { version } = self.state {
            return Err(PipelineError::BaselineAlreadyActive { version });
        }
        self.promote_baseline(records, created_at)
    }

    /// Explicit re-promotion from a historical record set
    pub fn promote_baseline(
        &mut self,
        records: &[CanonicalRecord],
        created_at: DateTime<Utc>,
    ) -> Result<&Baseline> {
        let baseline = self
            .store
            .promote(&self.config.baseline_name, records, self.config.bins, created_at)?;
        let version = baseline.version;
        DriftMetrics::record_baseline_promoted(version);
        self.state = DriftState::BaselineActive { version };
        Ok(baseline)
    }

    pub fn rollback_baseline(&mut self) -> Result<&Baseline> {
        let baseline = self.store.rollback()?;
        let version = baseline.version;
        DriftMetrics::record_baseline_rolled_back(version);
        self.state = DriftState::BaselineActive { version };
        Ok(baseline)
    }

    /// Compare a validated batch against the active baseline
    pub fn compare(
        &mut self,
        year: i32,
        ingested_at: DateTime<Utc>,
        records: &[CanonicalRecord],
    ) -> Result<DriftVerdict> {
        let DriftState::BaselineActive { version } = self.state else {
            return Err(PipelineError::BaselineMissing);
        };
        let baseline = self.store.active().ok_or(PipelineError::BaselineMissing)?;

        self.state = DriftState::BatchCompared { version };
        debug!(year, baseline_version = version, "Comparing batch against baseline");

        let mut fields = Vec::with_capacity(NumericField::ALL.len() + CategoricalField::ALL.len());
        for field in NumericField::ALL {
            let name = field.name();
            let Some(profile) = baseline.numeric.get(name) else {
                continue;
            };
            let values: Vec<f64> = records.iter().map(|r| r.numeric_value(field)).collect();
            let expected = profile.proportions();
            let actual = proportions(&profile.edges.counts(&values), values.len() as u64);

            let (statistic, score) = match self.config.statistic {
                DriftStatistic::KolmogorovSmirnov => ("ks", ks_distance(&expected, &actual)),
                DriftStatistic::PopulationStability => {
                    ("psi", population_stability_index(&expected, &actual))
                }
            };
            let threshold = self.config.threshold_for(name);
            let (batch_mean, _) = mean_and_std(&values);
            let mean_shift_sd = (profile.std_dev > 0.0)
                .then(|| (batch_mean - profile.mean) / profile.std_dev);

            fields.push(FieldDrift {
                field: name.to_string(),
                kind: FieldKind::Numeric,
                statistic: statistic.to_string(),
                score,
                threshold,
                drifted: !values.is_empty() && score > threshold,
                detail: FieldDetail::Numeric {
                    baseline_mean: profile.mean,
                    batch_mean,
                    mean_shift_sd,
                },
            });
        }

        for field in CategoricalField::ALL {
            let name = field.name();
            let Some(profile) = baseline.categorical.get(name) else {
                continue;
            };
            let current = CategoricalProfile::from_labels(
                &field.vocabulary(),
                records.iter().map(|r| r.category_label(field)),
            );
            let deltas = profile.deltas(&current);
            let score = deltas.values().copied().fold(0.0, f64::max);
            let threshold = self.config.categorical_threshold_for(name);

            fields.push(FieldDrift {
                field: name.to_string(),
                kind: FieldKind::Categorical,
                statistic: "max_frequency_delta".to_string(),
                score,
                threshold,
                drifted: current.total > 0 && score > threshold,
                detail: FieldDetail::Categorical { deltas },
            });
        }

        let drifted = fields.iter().any(|f| f.drifted);
        let verdict = DriftVerdict {
            batch_year: year,
            ingested_at,
            baseline_name: baseline.name.clone(),
            baseline_version: version,
            baseline_fingerprint: baseline.fingerprint.clone(),
            rows: records.len(),
            fields,
            drifted,
        };

        DriftMetrics::record_comparison(drifted, verdict.drifted_fields().len());
        if drifted {
            warn!(
                year,
                baseline_version = version,
                fields = ?verdict.drifted_fields(),
                "Drift detected"
            );
        } else {
            info!(year, baseline_version = version, "No drift detected");
        }

        self.state = DriftState::BaselineActive { version };
        Ok(verdict)
    }

    /// Persist the baseline store next to the other pipeline state
    pub fn save_store(&self, path: &std::path::Path) -> Result<()> {
        self.store.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::record;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn history() -> Vec<CanonicalRecord> {
        (1..=60u64)
            .map(|i| {
                let mut r = record(i, 2022 + (i % 3) as i32, -((i % 3) as i32));
                r.indices.ieg = 3.0 + (i % 5) as f64 * 0.5;
                r.age = 8 + (i % 6) as u8;
                r
            })
            .collect()
    }

    #[test]
    fn test_compare_without_baseline_is_error() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        assert_eq!(detector.state(), DriftState::NoBaseline);
        let err = detector.compare(2025, at(), &history()).unwrap_err();
        assert!(matches!(err, PipelineError::BaselineMissing));
    }

    #[test]
    fn test_seed_is_one_way() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();
        assert_eq!(detector.state(), DriftState::BaselineActive { version: 1 });

        let err = detector.seed_baseline(&history(), at()).unwrap_err();
        assert!(matches!(err, PipelineError::BaselineAlreadyActive { version: 1 }));

        detector.promote_baseline(&history(), at()).unwrap();
        assert_eq!(detector.state(), DriftState::BaselineActive { version: 2 });
    }

    #[test]
    fn test_same_distribution_does_not_drift() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();

        let verdict = detector.compare(2025, at(), &history()).unwrap();
        assert!(!verdict.drifted);
        assert!(verdict.fields.iter().all(|f| f.score.abs() < 1e-12));
        assert_eq!(detector.state(), DriftState::BaselineActive { version: 1 });
    }

    #[test]
    fn test_shifted_field_drifts_and_verdict_is_or_of_fields() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();

        let shifted: Vec<_> = history()
            .into_iter()
            .map(|mut r| {
                r.indices.ieg = (r.indices.ieg + 5.0).min(10.0);
                r
            })
            .collect();
        let verdict = detector.compare(2025, at(), &shifted).unwrap();

        assert!(verdict.drifted);
        assert_eq!(verdict.drifted_fields(), vec!["ieg"]);
        let ieg = verdict.field("ieg").unwrap();
        assert_eq!(ieg.statistic, "ks");
        assert!(ieg.score > 0.9);
    }

    #[test]
    fn test_categorical_shift_is_detected() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();

        let shifted: Vec<_> = history()
            .into_iter()
            .map(|mut r| {
                r.institution = crate::domain::Institution::Private;
                r
            })
            .collect();
        let verdict = detector.compare(2025, at(), &shifted).unwrap();
        assert_eq!(verdict.drifted_fields(), vec!["institution"]);
    }

    #[test]
    fn test_identical_inputs_serialize_identically() {
        let mut a = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        let mut b = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        a.seed_baseline(&history(), at()).unwrap();
        b.seed_baseline(&history(), at()).unwrap();

        let batch: Vec<_> = history().into_iter().take(25).collect();
        let first = a.compare(2025, at(), &batch).unwrap().to_json().unwrap();
        let second = b.compare(2025, at(), &batch).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_psi_statistic_and_field_override() {
        let mut config = DriftConfig {
            statistic: DriftStatistic::PopulationStability,
            ..DriftConfig::default()
        };
        config.field_thresholds.insert("ieg".into(), 100.0);
        let mut detector = DriftDetector::new(config, BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();

        let shifted: Vec<_> = history()
            .into_iter()
            .map(|mut r| {
                r.indices.ieg = 9.5;
                r
            })
            .collect();
        let verdict = detector.compare(2025, at(), &shifted).unwrap();
        let ieg = verdict.field("ieg").unwrap();
        assert_eq!(ieg.statistic, "psi");
        assert!(ieg.score > 0.2);
        assert!(!ieg.drifted);
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let mut detector = DriftDetector::new(DriftConfig::default(), BaselineStore::new());
        detector.seed_baseline(&history(), at()).unwrap();
        detector.promote_baseline(&history()[..30], at()).unwrap();
        detector.rollback_baseline().unwrap();
        assert_eq!(detector.state(), DriftState::BaselineActive { version: 1 });
    }
}
