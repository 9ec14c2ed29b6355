use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::TargetClass;

/// Multi-class scores; macro averages run over classes seen in truth or predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision_macro: f64,
    pub recall_macro: f64,
    pub f1_macro: f64,
    pub support: usize,
    /// confusion[truth][predicted], indexed by class code
    pub confusion: [[usize; 3]; 3],
}

impl ClassificationReport {
    pub fn compute(truth: &[TargetClass], predicted: &[TargetClass]) -> Self {
        let mut confusion = [[0usize; 3]; 3];
        for (t, p) in truth.iter().zip(predicted) {
            confusion[t.code() as usize][p.code() as usize] += 1;
        }
        let support = truth.len().min(predicted.len());
        let correct: usize = (0..3).map(|c| confusion[c][c]).sum();
        let accuracy = if support == 0 { 0.0 } else { correct as f64 / support as f64 };

        let mut precision_sum = 0.0;
        let mut recall_sum = 0.0;
        let mut f1_sum = 0.0;
        let mut seen = 0usize;
        for class in 0..3 {
            let actual: usize = confusion[class].iter().sum();
            let predicted_as: usize = (0..3).map(|t| confusion[t][class]).sum();
            if actual == 0 && predicted_as == 0 {
                continue;
            }
            seen += 1;
            let tp = confusion[class][class] as f64;
            let precision = if predicted_as == 0 { 0.0 } else { tp / predicted_as as f64 };
            let recall = if actual == 0 { 0.0 } else { tp / actual as f64 };
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            precision_sum += precision;
            recall_sum += recall;
            f1_sum += f1;
        }
        let macro_avg = |sum: f64| if seen == 0 { 0.0 } else { sum / seen as f64 };

        Self {
            accuracy,
            precision_macro: macro_avg(precision_sum),
            recall_macro: macro_avg(recall_sum),
            f1_macro: macro_avg(f1_sum),
            support,
            confusion,
        }
    }

    /// Flat metric map as stored on a model version
    pub fn as_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("f1_macro".to_string(), self.f1_macro),
            ("precision_macro".to_string(), self.precision_macro),
            ("recall_macro".to_string(), self.recall_macro),
        ])
    }
}
