//! Registration of all phase metrics with conflict detection

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::ReconcileMetrics>(&mut all_metrics);
    register_phase_metrics::<super::ValidateMetrics>(&mut all_metrics);
    register_phase_metrics::<super::DriftMetrics>(&mut all_metrics);
    register_phase_metrics::<super::FeatureStoreMetrics>(&mut all_metrics);
    register_phase_metrics::<super::RegistryMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, (&'static str, MetricDoc)>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if let Some((owner, _)) = all_metrics.get(doc.name) {
            warn!(
                "Metric name conflict: '{}' defined by both '{}' and '{}'",
                doc.name, owner, phase_name
            );
        } else {
            all_metrics.insert(doc.name, (phase_name, doc));
        }
    }
}

/// Every documented metric, phase by phase
pub fn all_documentation() -> Vec<(&'static str, MetricDoc)> {
    fn collect<T: PhaseMetrics>(out: &mut Vec<(&'static str, MetricDoc)>) {
        out.extend(T::metrics_documentation().into_iter().map(|d| (T::phase_name(), d)));
    }

    let mut docs = Vec::new();
    collect::<super::ReconcileMetrics>(&mut docs);
    collect::<super::ValidateMetrics>(&mut docs);
    collect::<super::DriftMetrics>(&mut docs);
    collect::<super::FeatureStoreMetrics>(&mut docs);
    collect::<super::RegistryMetrics>(&mut docs);
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let docs = all_documentation();
        let mut seen = HashSet::new();
        for (phase, doc) in &docs {
            assert!(seen.insert(doc.name), "duplicate metric {}", doc.name);
            assert!(
                doc.name.starts_with(&format!("slp_{}_", phase)),
                "{} not prefixed by phase {}",
                doc.name,
                phase
            );
        }
    }
}
