//! Data Contract Validator.
//!
//! Every reconciled row is checked against the canonical contract and either
//! becomes a [`CanonicalRecord`] or is quarantined with reason codes. Small
//! repairs (clipping, unknown-category bucketing) are kept as notes on the
//! valid side. A batch whose quarantine share is above the configured ratio
//! fails as a whole.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{RangePolicy, ValidationConfig};
use crate::domain::{
    CanonicalRecord, EntityId, Gender, IndexField, IndexSet, Institution, Stone,
};
use crate::error::{PipelineError, Result};
use crate::metrics::validate::ValidateMetrics;
use crate::pipeline::processing::reconcile::{ReconciledBatch, ReconciledRecord, RowSignal};

/// Why a row was quarantined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum QuarantineReason {
    /// A required field is null after reconciliation
    MissingField { field: String },
    /// Entity key absent, without digits, or zero
    InvalidEntityKey { raw: Option<String> },
    OutOfRange { field: String, value: f64 },
    /// Another row of the same batch already claimed this entity
    DuplicateEntity { entity_id: EntityId, first_row: usize },
    /// Composite index stayed null because its components were missing
    ReconstructionIncomplete { field: IndexField, missing: Vec<IndexField> },
}

impl QuarantineReason {
    pub fn code(&self) -> &'static str {
        match self {
            QuarantineReason::MissingField { .. } => "missing_field",
            QuarantineReason::InvalidEntityKey { .. } => "invalid_entity_key",
            QuarantineReason::OutOfRange { .. } => "out_of_range",
            QuarantineReason::DuplicateEntity { .. } => "duplicate_entity",
            QuarantineReason::ReconstructionIncomplete { .. } => "reconstruction_incomplete",
        }
    }
}

/// A repair applied to a row that was still accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractNote {
    Clipped { field: IndexField, original: f64, clipped: f64 },
    /// Value outside the vocabulary (or null) mapped to the `unknown` bucket
    CategoryDefaulted { field: String, value: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowNote {
    pub row_index: usize,
    pub entity_id: EntityId,
    pub note: ContractNote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRow {
    pub record: ReconciledRecord,
    pub reasons: Vec<QuarantineReason>,
}

/// Outcome of checking one row
#[derive(Debug, Clone, PartialEq)]
pub enum ContractDecision {
    Valid {
        record: CanonicalRecord,
        notes: Vec<ContractNote>,
    },
    Quarantine {
        reasons: Vec<QuarantineReason>,
    },
}

/// Partition of one batch into valid records and quarantined rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedBatch {
    pub year: i32,
    pub ingested_at: DateTime<Utc>,
    pub source_name: String,
    pub valid: Vec<CanonicalRecord>,
    pub quarantined: Vec<QuarantinedRow>,
    pub notes: Vec<RowNote>,
}

impl ValidatedBatch {
    pub fn total(&self) -> usize {
        self.valid.len() + self.quarantined.len()
    }

    pub fn quarantine_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.quarantined.len() as f64 / total as f64,
        }
    }

    /// Quarantined row counts per reason code
    pub fn reason_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for row in &self.quarantined {
            for reason in &row.reasons {
                *counts.entry(reason.code()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Row-level contract check
pub trait QualityGate {
    fn assess(&self, record: &ReconciledRecord) -> ContractDecision;
}

pub struct DataContractValidator {
    pub config: ValidationConfig,
}

impl Default for DataContractValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl DataContractValidator {
    pub fn new() -> Self {
        Self {
            config: ValidationConfig::default(),
        }
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Check every row and split the batch, without applying the batch threshold
    pub fn partition(&self, batch: ReconciledBatch) -> ValidatedBatch {
        let decisions: Vec<ContractDecision> =
            batch.records.par_iter().map(|record| self.assess(record)).collect();

        let mut valid = Vec::new();
        let mut quarantined = Vec::new();
        let mut notes = Vec::new();
        let mut first_seen: HashMap<EntityId, usize> = HashMap::new();

        for (reconciled, decision) in batch.records.into_iter().zip(decisions) {
            match decision {
                ContractDecision::Valid { record, notes: row_notes } => {
                    if let Some(first_row) = first_seen.get(&record.entity_id) {
                        quarantined.push(QuarantinedRow {
                            reasons: vec![QuarantineReason::DuplicateEntity {
                                entity_id: record.entity_id,
                                first_row: *first_row,
                            }],
                            record: reconciled,
                        });
                        continue;
                    }
                    first_seen.insert(record.entity_id, reconciled.row_index);
                    notes.extend(row_notes.into_iter().map(|note| RowNote {
                        row_index: reconciled.row_index,
                        entity_id: record.entity_id,
                        note,
                    }));
                    valid.push(record);
                }
                ContractDecision::Quarantine { reasons } => {
                    quarantined.push(QuarantinedRow {
                        record: reconciled,
                        reasons,
                    });
                }
            }
        }

        ValidatedBatch {
            year: batch.year,
            ingested_at: batch.ingested_at,
            source_name: batch.source_name,
            valid,
            quarantined,
            notes,
        }
    }

    /// Partition the batch and fail it when too many rows were quarantined
    pub fn validate(&self, batch: ReconciledBatch) -> Result<ValidatedBatch> {
        let validated = self.partition(batch);

        let clipped = validated
            .notes
            .iter()
            .filter(|n| matches!(n.note, ContractNote::Clipped { .. }))
            .count();
        ValidateMetrics::record_batch(validated.valid.len(), validated.quarantined.len());
        ValidateMetrics::record_clipped(clipped);
        for row in &validated.quarantined {
            for reason in &row.reasons {
                ValidateMetrics::record_quarantine_reason(reason.code());
            }
        }

        let ratio = validated.quarantine_ratio();
        let threshold = self.config.max_quarantine_ratio;
        if ratio > threshold {
            ValidateMetrics::record_batch_rejected();
            warn!(
                year = validated.year,
                quarantined = validated.quarantined.len(),
                total = validated.total(),
                ratio,
                threshold,
                "Quarantine threshold exceeded, rejecting batch"
            );
            return Err(PipelineError::QuarantineExceeded {
                year: validated.year,
                quarantined: validated.quarantined.len(),
                total: validated.total(),
                ratio,
                threshold,
            });
        }

        for (code, count) in validated.reason_counts() {
            debug!(year = validated.year, reason = code, count, "Quarantine reason");
        }
        info!(
            year = validated.year,
            valid = validated.valid.len(),
            quarantined = validated.quarantined.len(),
            clipped,
            "Validated batch"
        );
        Ok(validated)
    }

    fn check_index(
        &self,
        field: IndexField,
        value: Option<f64>,
        record: &ReconciledRecord,
        reasons: &mut Vec<QuarantineReason>,
        notes: &mut Vec<ContractNote>,
    ) -> f64 {
        let Some(value) = value else {
            let incomplete = record.signals.iter().find_map(|signal| match signal {
                RowSignal::ReconstructionIncomplete { field: f, missing } if *f == field => {
                    Some(missing.clone())
                }
                _ => None,
            });
            reasons.push(match incomplete {
                Some(missing) => QuarantineReason::ReconstructionIncomplete { field, missing },
                None => QuarantineReason::MissingField {
                    field: field.as_str().to_string(),
                },
            });
            return 0.0;
        };

        let (min, max) = (self.config.index_min, self.config.index_max);
        if (min..=max).contains(&value) {
            return value;
        }
        match self.config.index_policy {
            RangePolicy::Clip => {
                let clipped = value.clamp(min, max);
                notes.push(ContractNote::Clipped {
                    field,
                    original: value,
                    clipped,
                });
                clipped
            }
            RangePolicy::Reject => {
                reasons.push(QuarantineReason::OutOfRange {
                    field: field.as_str().to_string(),
                    value,
                });
                value
            }
        }
    }
}

impl QualityGate for DataContractValidator {
    fn assess(&self, record: &ReconciledRecord) -> ContractDecision {
        let mut reasons = Vec::new();
        let mut notes = Vec::new();

        let entity_id = match record.entity_id {
            Some(id) if id > 0 => id,
            _ => {
                reasons.push(QuarantineReason::InvalidEntityKey {
                    raw: record.entity_key.clone(),
                });
                0
            }
        };

        let phase = bounded_integer(
            record.phase,
            crate::constants::PHASE,
            0,
            i64::from(self.config.max_phase),
            &mut reasons,
        );
        let age = bounded_integer(
            record.age,
            crate::constants::AGE,
            i64::from(self.config.min_age),
            i64::from(self.config.max_age),
            &mut reasons,
        );
        let years_in_program = bounded_integer(
            record.years_in_program,
            crate::constants::YEARS_IN_PROGRAM,
            0,
            i64::from(u32::MAX),
            &mut reasons,
        );
        let target_lag = bounded_integer(
            record.target_lag,
            crate::constants::TARGET_LAG,
            i64::from(i32::MIN),
            i64::from(i32::MAX),
            &mut reasons,
        );

        let mut indices = IndexSet::<f64>::default();
        for field in IndexField::ALL {
            *indices.get_mut(field) =
                self.check_index(field, record.indices.get(field), record, &mut reasons, &mut notes);
        }

        let gender = Gender::from_label(record.gender.as_deref());
        if gender == Gender::Unknown {
            notes.push(category_note(crate::constants::GENDER, &record.gender));
        }
        let institution = Institution::from_label(record.institution.as_deref());
        if institution == Institution::Unknown {
            notes.push(category_note(crate::constants::INSTITUTION, &record.institution));
        }
        let stone = Stone::from_label(record.stone.as_deref());
        if stone == Stone::Unknown {
            notes.push(category_note(crate::constants::STONE, &record.stone));
        }

        if !reasons.is_empty() {
            return ContractDecision::Quarantine { reasons };
        }

        ContractDecision::Valid {
            record: CanonicalRecord {
                entity_id,
                year: record.year,
                phase: phase as u8,
                age: age as u8,
                gender,
                institution,
                stone,
                years_in_program: years_in_program as u32,
                indices,
                target_lag: target_lag as i32,
            },
            notes,
        }
    }
}

/// Null or out-of-range integers become quarantine reasons; the returned value
/// is only meaningful when no reason was pushed
fn bounded_integer(
    value: Option<i64>,
    field: &str,
    min: i64,
    max: i64,
    reasons: &mut Vec<QuarantineReason>,
) -> i64 {
    match value {
        None => {
            reasons.push(QuarantineReason::MissingField {
                field: field.to_string(),
            });
            0
        }
        Some(v) if v < min || v > max => {
            reasons.push(QuarantineReason::OutOfRange {
                field: field.to_string(),
                value: v as f64,
            });
            0
        }
        Some(v) => v,
    }
}

fn category_note(field: &str, value: &Option<String>) -> ContractNote {
    ContractNote::CategoryDefaulted {
        field: field.to_string(),
        value: value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciled(row_index: usize, entity_id: u64) -> ReconciledRecord {
        ReconciledRecord {
            row_index,
            year: 2023,
            entity_key: Some(format!("RA-{entity_id}")),
            entity_id: Some(entity_id),
            phase: Some(3),
            age: Some(12),
            gender: Some("F".into()),
            enrollment_year: Some(2021),
            years_in_program: Some(2),
            institution: Some("public".into()),
            stone: Some("ametista".into()),
            indices: IndexSet {
                inde: Some(7.1),
                iaa: Some(8.0),
                ieg: Some(7.5),
                ips: Some(6.9),
                ida: Some(6.2),
                ipv: Some(7.3),
                ian: Some(5.0),
                ipp: Some(7.0),
            },
            target_lag: Some(-1),
            signals: Vec::new(),
        }
    }

    fn batch(records: Vec<ReconciledRecord>) -> ReconciledBatch {
        ReconciledBatch {
            year: 2023,
            ingested_at: Utc::now(),
            source_name: "test".into(),
            records,
            column_sources: Default::default(),
            dropped_columns: Vec::new(),
        }
    }

    #[test]
    fn test_clean_row_is_valid() {
        let validator = DataContractValidator::new();
        match validator.assess(&reconciled(0, 7)) {
            ContractDecision::Valid { record, notes } => {
                assert_eq!(record.entity_id, 7);
                assert_eq!(record.target_lag, -1);
                assert!(notes.is_empty());
            }
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_index_is_clipped_by_default() {
        let validator = DataContractValidator::new();
        let mut row = reconciled(0, 7);
        row.indices.ieg = Some(11.5);

        let ContractDecision::Valid { record, notes } = validator.assess(&row) else {
            panic!("expected valid");
        };
        assert_eq!(record.indices.ieg, 10.0);
        assert_eq!(
            notes,
            vec![ContractNote::Clipped {
                field: IndexField::Ieg,
                original: 11.5,
                clipped: 10.0
            }]
        );
    }

    #[test]
    fn test_reject_policy_quarantines_out_of_range() {
        let validator = DataContractValidator::with_config(ValidationConfig {
            index_policy: RangePolicy::Reject,
            ..ValidationConfig::default()
        });
        let mut row = reconciled(0, 7);
        row.indices.ida = Some(-0.5);

        let ContractDecision::Quarantine { reasons } = validator.assess(&row) else {
            panic!("expected quarantine");
        };
        assert_eq!(reasons[0].code(), "out_of_range");
    }

    #[test]
    fn test_unknown_category_goes_to_unknown_bucket() {
        let validator = DataContractValidator::new();
        let mut row = reconciled(0, 7);
        row.stone = Some("diamante".into());

        let ContractDecision::Valid { record, notes } = validator.assess(&row) else {
            panic!("expected valid");
        };
        assert_eq!(record.stone, Stone::Unknown);
        assert!(matches!(&notes[0], ContractNote::CategoryDefaulted { field, .. } if field == "stone"));
    }

    #[test]
    fn test_incomplete_reconstruction_is_quarantined_with_its_reason() {
        let validator = DataContractValidator::new();
        let mut row = reconciled(0, 7);
        row.indices.ipp = None;
        row.indices.ips = None;
        row.signals.push(RowSignal::ReconstructionIncomplete {
            field: IndexField::Ipp,
            missing: vec![IndexField::Ips],
        });

        let ContractDecision::Quarantine { reasons } = validator.assess(&row) else {
            panic!("expected quarantine");
        };
        let codes: Vec<_> = reasons.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["missing_field", "reconstruction_incomplete"]);
    }

    #[test]
    fn test_invalid_entity_key_and_age() {
        let validator = DataContractValidator::new();
        let mut row = reconciled(0, 0);
        row.age = Some(62);

        let ContractDecision::Quarantine { reasons } = validator.assess(&row) else {
            panic!("expected quarantine");
        };
        let codes: Vec<_> = reasons.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec!["invalid_entity_key", "out_of_range"]);
    }

    #[test]
    fn test_duplicate_entity_keeps_first_occurrence() {
        let validator = DataContractValidator::with_config(ValidationConfig {
            max_quarantine_ratio: 0.5,
            ..ValidationConfig::default()
        });
        let validated = validator
            .validate(batch(vec![reconciled(0, 5), reconciled(1, 6), reconciled(2, 5)]))
            .unwrap();

        assert_eq!(validated.valid.len(), 2);
        assert_eq!(validated.quarantined.len(), 1);
        assert_eq!(validated.quarantined[0].record.row_index, 2);
        assert_eq!(
            validated.quarantined[0].reasons,
            vec![QuarantineReason::DuplicateEntity {
                entity_id: 5,
                first_row: 0
            }]
        );
    }

    #[test]
    fn test_quarantine_ratio_above_threshold_fails_batch() {
        let validator = DataContractValidator::new();
        let mut bad = reconciled(1, 8);
        bad.target_lag = None;

        let err = validator
            .validate(batch(vec![reconciled(0, 7), bad]))
            .unwrap_err();
        match err {
            PipelineError::QuarantineExceeded {
                year,
                quarantined,
                total,
                threshold,
                ..
            } => {
                assert_eq!(year, 2023);
                assert_eq!(quarantined, 1);
                assert_eq!(total, 2);
                assert_eq!(threshold, 0.2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ratio_equal_to_threshold_passes() {
        let validator = DataContractValidator::new();
        let mut records: Vec<_> = (0..4).map(|i| reconciled(i, i as u64 + 1)).collect();
        let mut bad = reconciled(4, 99);
        bad.phase = None;
        records.push(bad);

        let validated = validator.validate(batch(records)).unwrap();
        assert_eq!(validated.quarantine_ratio(), 0.2);
        assert_eq!(validated.reason_counts().get("missing_field"), Some(&1));
    }
}
