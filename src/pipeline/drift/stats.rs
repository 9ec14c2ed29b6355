//! Binned distributions and the distances computed between them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Floor applied to bin proportions before taking logs in PSI
const PSI_EPSILON: f64 = 1e-4;

/// Uniform bin edges over `[lower, upper]`. Values below or above land in
/// dedicated underflow and overflow bins, so counts always have `bins + 2` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinEdges {
    pub lower: f64,
    pub upper: f64,
    pub bins: usize,
}

impl BinEdges {
    /// Edges spanning the observed range; a single repeated value gets a unit-wide range
    pub fn spanning(values: &[f64], bins: usize) -> Self {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        if !min.is_finite() || !max.is_finite() {
            return Self::fixed(0.0, 1.0, bins);
        }
        if (max - min).abs() < f64::EPSILON {
            return Self::fixed(min - 0.5, max + 0.5, bins);
        }
        Self::fixed(min, max, bins)
    }

    pub fn fixed(lower: f64, upper: f64, bins: usize) -> Self {
        Self {
            lower,
            upper,
            bins: bins.max(1),
        }
    }

    pub fn slots(&self) -> usize {
        self.bins + 2
    }

    /// Slot index of a value: 0 underflow, 1..=bins regular, bins+1 overflow
    pub fn slot(&self, value: f64) -> usize {
        if value < self.lower {
            return 0;
        }
        if value > self.upper {
            return self.bins + 1;
        }
        let width = (self.upper - self.lower) / self.bins as f64;
        let index = ((value - self.lower) / width).floor() as usize;
        // The upper edge belongs to the last regular bin
        index.min(self.bins - 1) + 1
    }

    pub fn counts(&self, values: &[f64]) -> Vec<u64> {
        let mut counts = vec![0u64; self.slots()];
        for value in values {
            counts[self.slot(*value)] += 1;
        }
        counts
    }
}

/// Summary of one numeric field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericProfile {
    pub edges: BinEdges,
    pub counts: Vec<u64>,
    pub total: u64,
    pub mean: f64,
    pub std_dev: f64,
}

impl NumericProfile {
    pub fn from_values(values: &[f64], edges: BinEdges) -> Self {
        let counts = edges.counts(values);
        let (mean, std_dev) = mean_and_std(values);
        Self {
            edges,
            counts,
            total: values.len() as u64,
            mean,
            std_dev,
        }
    }

    pub fn proportions(&self) -> Vec<f64> {
        proportions(&self.counts, self.total)
    }
}

/// Category frequencies over a fixed vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalProfile {
    pub frequencies: BTreeMap<String, f64>,
    pub total: u64,
}

impl CategoricalProfile {
    pub fn from_labels<'a>(vocabulary: &[&str], labels: impl Iterator<Item = &'a str>) -> Self {
        let mut counts: BTreeMap<String, u64> =
            vocabulary.iter().map(|label| (label.to_string(), 0)).collect();
        let mut total = 0u64;
        for label in labels {
            *counts.entry(label.to_string()).or_insert(0) += 1;
            total += 1;
        }
        let frequencies = counts
            .into_iter()
            .map(|(label, count)| {
                let freq = if total == 0 { 0.0 } else { count as f64 / total as f64 };
                (label, freq)
            })
            .collect();
        Self { frequencies, total }
    }

    /// Absolute frequency change per category, over the union of both vocabularies
    pub fn deltas(&self, batch: &CategoricalProfile) -> BTreeMap<String, f64> {
        let mut deltas = BTreeMap::new();
        for label in self.frequencies.keys().chain(batch.frequencies.keys()) {
            let base = self.frequencies.get(label).copied().unwrap_or(0.0);
            let current = batch.frequencies.get(label).copied().unwrap_or(0.0);
            deltas.insert(label.clone(), (current - base).abs());
        }
        deltas
    }
}

pub fn proportions(counts: &[u64], total: u64) -> Vec<f64> {
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|c| *c as f64 / total as f64).collect()
}

/// Largest gap between the cumulative distributions of two binned samples
pub fn ks_distance(expected: &[f64], actual: &[f64]) -> f64 {
    let mut cdf_expected = 0.0;
    let mut cdf_actual = 0.0;
    let mut max_gap: f64 = 0.0;
    for (e, a) in expected.iter().zip(actual) {
        cdf_expected += e;
        cdf_actual += a;
        max_gap = max_gap.max((cdf_expected - cdf_actual).abs());
    }
    max_gap
}

/// Population stability index of `actual` against `expected`
pub fn population_stability_index(expected: &[f64], actual: &[f64]) -> f64 {
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| {
            let e = e.max(PSI_EPSILON);
            let a = a.max(PSI_EPSILON);
            (a - e) * (a / e).ln()
        })
        .sum()
}

pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_include_underflow_and_overflow() {
        let edges = BinEdges::fixed(0.0, 10.0, 10);
        assert_eq!(edges.slot(-0.1), 0);
        assert_eq!(edges.slot(0.0), 1);
        assert_eq!(edges.slot(9.99), 10);
        assert_eq!(edges.slot(10.0), 10);
        assert_eq!(edges.slot(10.5), 11);
        assert_eq!(edges.counts(&[1.0, 1.5, 12.0]), vec![0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_degenerate_range_is_widened() {
        let edges = BinEdges::spanning(&[3.0, 3.0, 3.0], 4);
        assert_eq!(edges.lower, 2.5);
        assert_eq!(edges.upper, 3.5);
    }

    #[test]
    fn test_ks_identical_and_disjoint() {
        let a = [0.5, 0.5, 0.0, 0.0];
        let b = [0.0, 0.0, 0.5, 0.5];
        assert_eq!(ks_distance(&a, &a), 0.0);
        assert!((ks_distance(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_psi_is_zero_for_identical_and_positive_otherwise() {
        let a = [0.25, 0.25, 0.25, 0.25];
        let b = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(population_stability_index(&a, &a), 0.0);
        assert!(population_stability_index(&a, &b) > 0.0);
    }

    #[test]
    fn test_categorical_deltas_cover_unseen_labels() {
        let base = CategoricalProfile::from_labels(&["F", "M", "unknown"], ["F", "F", "M", "M"].into_iter());
        let batch = CategoricalProfile::from_labels(&["F", "M", "unknown"], ["F", "F", "F", "M"].into_iter());
        let deltas = base.deltas(&batch);
        assert!((deltas["F"] - 0.25).abs() < 1e-12);
        assert!((deltas["M"] - 0.25).abs() < 1e-12);
        assert_eq!(deltas["unknown"], 0.0);
    }

    #[test]
    fn test_mean_and_std() {
        let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);
    }
}
