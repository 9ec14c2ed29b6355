//! Drift phase metrics: baseline lifecycle and batch comparisons

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct DriftMetrics;

impl DriftMetrics {
    pub fn record_comparison(drifted: bool, drifted_fields: usize) {
        ::metrics::counter!(phase_metric!(counter, "drift", "batches_compared")).increment(1);
        if drifted {
            ::metrics::counter!(phase_metric!(counter, "drift", "batches_drifted")).increment(1);
        }
        ::metrics::counter!(phase_metric!(counter, "drift", "fields_drifted"))
            .increment(drifted_fields as u64);
    }

    pub fn record_skipped_without_baseline() {
        ::metrics::counter!(phase_metric!(counter, "drift", "comparisons_skipped")).increment(1);
    }

    pub fn record_baseline_promoted(version: u32) {
        ::metrics::counter!(phase_metric!(counter, "drift", "baseline_promotions")).increment(1);
        ::metrics::gauge!(phase_metric!(gauge, "drift", "active_baseline_version")).set(version as f64);
    }

    pub fn record_baseline_rolled_back(version: u32) {
        ::metrics::counter!(phase_metric!(counter, "drift", "baseline_rollbacks")).increment(1);
        ::metrics::gauge!(phase_metric!(gauge, "drift", "active_baseline_version")).set(version as f64);
    }

    pub fn record_batch_blocked() {
        ::metrics::counter!(phase_metric!(counter, "drift", "batches_blocked")).increment(1);
    }
}

impl PhaseMetrics for DriftMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Gauge => ::metrics::describe_gauge!(doc.name, doc.help),
                _ => ::metrics::describe_counter!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "drift"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "drift", "batches_compared"),
                metric_type: MetricType::Counter,
                help: "Validated batches compared against the active baseline",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "batches_drifted"),
                metric_type: MetricType::Counter,
                help: "Compared batches with at least one drifted field",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "fields_drifted"),
                metric_type: MetricType::Counter,
                help: "Drifted fields summed over all comparisons",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "comparisons_skipped"),
                metric_type: MetricType::Counter,
                help: "Batches ingested while no baseline was active",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "baseline_promotions"),
                metric_type: MetricType::Counter,
                help: "Baseline versions promoted",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "baseline_rollbacks"),
                metric_type: MetricType::Counter,
                help: "Baseline rollbacks to a previous version",
            },
            MetricDoc {
                name: phase_metric!(counter, "drift", "batches_blocked"),
                metric_type: MetricType::Counter,
                help: "Batches rejected because drift blocking is enabled",
            },
            MetricDoc {
                name: phase_metric!(gauge, "drift", "active_baseline_version"),
                metric_type: MetricType::Gauge,
                help: "Version number of the active baseline",
            },
        ]
    }
}
