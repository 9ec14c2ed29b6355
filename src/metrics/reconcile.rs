//! Reconcile phase metrics: schema mapping and composite index reconstruction

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ReconcileMetrics;

impl ReconcileMetrics {
    pub fn record_batch(rows: usize, dropped_columns: usize) {
        ::metrics::counter!(phase_metric!(counter, "reconcile", "batches")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "reconcile", "rows")).increment(rows as u64);
        ::metrics::counter!(phase_metric!(counter, "reconcile", "dropped_columns"))
            .increment(dropped_columns as u64);
    }

    pub fn record_schema_error() {
        ::metrics::counter!(phase_metric!(counter, "reconcile", "schema_errors")).increment(1);
    }

    pub fn record_reconstruction(reconstructed: usize, incomplete: usize) {
        ::metrics::counter!(phase_metric!(counter, "reconcile", "reconstructed_values"))
            .increment(reconstructed as u64);
        ::metrics::counter!(phase_metric!(counter, "reconcile", "reconstruction_incomplete"))
            .increment(incomplete as u64);
    }
}

impl PhaseMetrics for ReconcileMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            ::metrics::describe_counter!(doc.name, doc.help);
        }
    }

    fn phase_name() -> &'static str {
        "reconcile"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "batches"),
                metric_type: MetricType::Counter,
                help: "Raw batches mapped onto the canonical shape",
            },
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "rows"),
                metric_type: MetricType::Counter,
                help: "Rows reconciled",
            },
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "dropped_columns"),
                metric_type: MetricType::Counter,
                help: "Source columns dropped as unmapped or belonging to another export year",
            },
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "schema_errors"),
                metric_type: MetricType::Counter,
                help: "Batches rejected for lacking the entity key column",
            },
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "reconstructed_values"),
                metric_type: MetricType::Counter,
                help: "Composite index values rebuilt from components",
            },
            MetricDoc {
                name: phase_metric!(counter, "reconcile", "reconstruction_incomplete"),
                metric_type: MetricType::Counter,
                help: "Rows whose composite index stayed null for missing components",
            },
        ]
    }
}
