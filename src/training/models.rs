//! Reference trainers. Both are small enough to inspect by hand and cover the
//! two shapes a payload can take: a constant prior and a geometric model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::preprocessing::FeatureMatrix;
use super::Trainer;
use crate::domain::TargetClass;
use crate::error::{PipelineError, Result};

/// Per-row class probabilities, indexed by class code
pub trait ClassScorer: Send + Sync {
    fn probabilities(&self, row: &[f64]) -> [f64; 3];

    fn classify(&self, row: &[f64]) -> TargetClass {
        most_likely(&self.probabilities(row))
    }
}

/// Highest probability wins; ties go to the more severe class
pub fn most_likely(probabilities: &[f64; 3]) -> TargetClass {
    let mut best = 0;
    for code in 1..3 {
        if probabilities[code] > probabilities[best] {
            best = code;
        }
    }
    TargetClass::ALL[best]
}

fn require_labels(features: &FeatureMatrix, labels: &[TargetClass]) -> Result<()> {
    if labels.is_empty() {
        return Err(PipelineError::Training("no labelled rows to fit".to_string()));
    }
    if features.len() != labels.len() {
        return Err(PipelineError::Training(format!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        )));
    }
    Ok(())
}

fn decode<T: for<'de> Deserialize<'de>>(kind: &str, payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| PipelineError::Artifact(format!("invalid {kind} payload: {e}")))
}

/// Predicts the training prior regardless of input
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityClassTrainer;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassPriors {
    priors: [f64; 3],
}

impl ClassScorer for ClassPriors {
    fn probabilities(&self, _row: &[f64]) -> [f64; 3] {
        self.priors
    }
}

impl Trainer for MajorityClassTrainer {
    fn kind(&self) -> &'static str {
        "majority_class"
    }

    fn fit(&self, features: &FeatureMatrix, labels: &[TargetClass]) -> Result<serde_json::Value> {
        require_labels(features, labels)?;
        let mut counts = [0usize; 3];
        for label in labels {
            counts[label.code() as usize] += 1;
        }
        let total = labels.len() as f64;
        let priors = counts.map(|c| c as f64 / total);
        Ok(serde_json::to_value(ClassPriors { priors })?)
    }

    fn scorer(&self, payload: &serde_json::Value) -> Result<Box<dyn ClassScorer>> {
        Ok(Box::new(decode::<ClassPriors>(self.kind(), payload)?))
    }
}

/// Standardizes every column, then assigns the class with the closest mean
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestCentroidTrainer;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CentroidModel {
    means: Vec<f64>,
    scales: Vec<f64>,
    /// Indexed by class code; `None` for classes absent from training
    centroids: Vec<Option<Vec<f64>>>,
}

impl CentroidModel {
    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect()
    }
}

impl ClassScorer for CentroidModel {
    fn probabilities(&self, row: &[f64]) -> [f64; 3] {
        let z = self.standardize(row);
        let distances: Vec<Option<f64>> = self
            .centroids
            .iter()
            .map(|centroid| {
                centroid.as_ref().map(|c| {
                    c.iter().zip(&z).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
                })
            })
            .collect();

        // softmax over negative squared distance, shifted by the minimum
        let nearest = distances
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let mut weights = [0.0; 3];
        for (code, distance) in distances.iter().enumerate().take(3) {
            if let Some(d) = distance {
                weights[code] = (-(d - nearest)).exp();
            }
        }
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.map(|w| w / total)
        } else {
            weights
        }
    }
}

impl Trainer for NearestCentroidTrainer {
    fn kind(&self) -> &'static str {
        "nearest_centroid"
    }

    fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("metric".to_string(), "squared_euclidean".into()),
            ("standardize".to_string(), true.into()),
        ])
    }

    fn fit(&self, features: &FeatureMatrix, labels: &[TargetClass]) -> Result<serde_json::Value> {
        require_labels(features, labels)?;
        let width = features.width();
        let n = features.len() as f64;

        let mut means = vec![0.0; width];
        for row in &features.rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; width];
        for row in &features.rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        // constant columns keep their raw offset
        let scales: Vec<f64> = scales
            .into_iter()
            .map(|var| if var > 0.0 { var.sqrt() } else { 1.0 })
            .collect();

        let mut model = CentroidModel {
            means,
            scales,
            centroids: vec![None, None, None],
        };
        let mut sums = vec![vec![0.0; width]; 3];
        let mut counts = [0usize; 3];
        for (row, label) in features.rows.iter().zip(labels) {
            let code = label.code() as usize;
            counts[code] += 1;
            for (s, v) in sums[code].iter_mut().zip(model.standardize(row)) {
                *s += v;
            }
        }
        for code in 0..3 {
            if counts[code] > 0 {
                let count = counts[code] as f64;
                model.centroids[code] = Some(sums[code].iter().map(|s| s / count).collect());
            }
        }
        Ok(serde_json::to_value(model)?)
    }

    fn scorer(&self, payload: &serde_json::Value) -> Result<Box<dyn ClassScorer>> {
        let model: CentroidModel = decode(self.kind(), payload)?;
        if model.centroids.len() != 3 || model.means.len() != model.scales.len() {
            return Err(PipelineError::Artifact(
                "nearest_centroid payload has inconsistent shapes".to_string(),
            ));
        }
        Ok(Box::new(model))
    }
}
