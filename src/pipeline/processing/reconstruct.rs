//! Derived Index Reconstructor.
//!
//! Older exports lack the psycho-pedagogical index (IPP). When the components
//! are present it is rebuilt from a static weighted combination; when any
//! component is missing the field stays null and a row signal records which
//! ones, so the validator can decide what to do with the row.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ReconstructionConfig;
use crate::domain::{IndexField, IndexSet};
use crate::error::{PipelineError, Result};
use crate::metrics::reconcile::ReconcileMetrics;
use crate::pipeline::processing::reconcile::{ReconciledBatch, ReconciledRecord, RowSignal};

/// What happened to the composite field of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconstructionOutcome {
    /// The export carried the value; left untouched
    SourceValue,
    Reconstructed(f64),
    Incomplete { missing: Vec<IndexField> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    field: IndexField,
    divisor: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionSummary {
    pub source_values: usize,
    pub reconstructed: usize,
    pub incomplete: usize,
}

pub struct DerivedIndexReconstructor {
    target: IndexField,
    weights: Vec<(IndexField, f64)>,
    anchor: Option<Anchor>,
    round_decimals: u32,
}

impl Default for DerivedIndexReconstructor {
    fn default() -> Self {
        Self::from_config(&ReconstructionConfig::default())
            .expect("default reconstruction weights name known indices")
    }
}

impl DerivedIndexReconstructor {
    pub fn from_config(config: &ReconstructionConfig) -> Result<Self> {
        let target = IndexField::Ipp;
        let mut weights = Vec::with_capacity(config.weights.len());
        for (name, weight) in &config.weights {
            let field = IndexField::from_name(name).ok_or_else(|| {
                PipelineError::Config(format!("reconstruction weight for unknown index '{name}'"))
            })?;
            if field == target {
                return Err(PipelineError::Config(format!(
                    "'{name}' cannot be a component of itself"
                )));
            }
            weights.push((field, *weight));
        }
        if weights.is_empty() {
            return Err(PipelineError::Config(
                "reconstruction needs at least one component weight".to_string(),
            ));
        }

        let anchor = match &config.anchor {
            Some(anchor) => {
                let field = IndexField::from_name(&anchor.field).ok_or_else(|| {
                    PipelineError::Config(format!("unknown anchor index '{}'", anchor.field))
                })?;
                Some(Anchor {
                    field,
                    divisor: anchor.divisor,
                })
            }
            None => None,
        };

        Ok(Self {
            target,
            weights,
            anchor,
            round_decimals: config.round_decimals,
        })
    }

    pub fn target(&self) -> IndexField {
        self.target
    }

    /// Compute the composite from components, or list what is missing
    pub fn compute(&self, indices: &IndexSet<Option<f64>>) -> std::result::Result<f64, Vec<IndexField>> {
        let mut missing = Vec::new();
        let mut weighted = 0.0;

        for (field, weight) in &self.weights {
            match indices.get(*field) {
                Some(value) => weighted += value * weight,
                None => missing.push(*field),
            }
        }

        let anchor_value = match self.anchor {
            Some(anchor) => match indices.get(anchor.field) {
                Some(value) => Some((value, anchor.divisor)),
                None => {
                    missing.push(anchor.field);
                    None
                }
            },
            None => None,
        };

        if !missing.is_empty() {
            missing.sort();
            return Err(missing);
        }

        let composite = match anchor_value {
            Some((value, divisor)) => (value - weighted) / divisor,
            None => weighted,
        };
        Ok(round_to(composite, self.round_decimals))
    }

    /// Fill the composite on one row if absent. Never overwrites a source value.
    pub fn reconstruct(&self, record: &mut ReconciledRecord) -> ReconstructionOutcome {
        if record.indices.get(self.target).is_some() {
            return ReconstructionOutcome::SourceValue;
        }

        match self.compute(&record.indices) {
            Ok(value) => {
                *record.indices.get_mut(self.target) = Some(value);
                ReconstructionOutcome::Reconstructed(value)
            }
            Err(missing) => {
                let signal = RowSignal::ReconstructionIncomplete {
                    field: self.target,
                    missing: missing.clone(),
                };
                if !record.signals.contains(&signal) {
                    record.signals.push(signal);
                }
                ReconstructionOutcome::Incomplete { missing }
            }
        }
    }

    pub fn apply(&self, batch: &mut ReconciledBatch) -> ReconstructionSummary {
        let mut summary = ReconstructionSummary::default();
        for record in batch.records.iter_mut() {
            match self.reconstruct(record) {
                ReconstructionOutcome::SourceValue => summary.source_values += 1,
                ReconstructionOutcome::Reconstructed(_) => summary.reconstructed += 1,
                ReconstructionOutcome::Incomplete { .. } => summary.incomplete += 1,
            }
        }

        ReconcileMetrics::record_reconstruction(summary.reconstructed, summary.incomplete);
        if summary.reconstructed > 0 || summary.incomplete > 0 {
            info!(
                year = batch.year,
                field = %self.target,
                reconstructed = summary.reconstructed,
                incomplete = summary.incomplete,
                "Reconstructed composite index"
            );
        }
        summary
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
