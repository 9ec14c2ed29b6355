//! Validate phase metrics: data contract outcomes

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ValidateMetrics;

impl ValidateMetrics {
    pub fn record_batch(valid: usize, quarantined: usize) {
        ::metrics::counter!(phase_metric!(counter, "validate", "rows_valid")).increment(valid as u64);
        ::metrics::counter!(phase_metric!(counter, "validate", "rows_quarantined"))
            .increment(quarantined as u64);
        let total = valid + quarantined;
        if total > 0 {
            ::metrics::histogram!(phase_metric!(histogram, "validate", "quarantine_ratio"))
                .record(quarantined as f64 / total as f64);
        }
    }

    pub fn record_quarantine_reason(reason: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "validate", "quarantine_reasons"), "reason" => reason)
            .increment(1);
    }

    pub fn record_clipped(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "validate", "values_clipped")).increment(count as u64);
    }

    pub fn record_batch_rejected() {
        ::metrics::counter!(phase_metric!(counter, "validate", "batches_rejected")).increment(1);
    }
}

impl PhaseMetrics for ValidateMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Histogram => ::metrics::describe_histogram!(doc.name, doc.help),
                _ => ::metrics::describe_counter!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "validate"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "validate", "rows_valid"),
                metric_type: MetricType::Counter,
                help: "Rows that passed the data contract",
            },
            MetricDoc {
                name: phase_metric!(counter, "validate", "rows_quarantined"),
                metric_type: MetricType::Counter,
                help: "Rows routed to quarantine",
            },
            MetricDoc {
                name: phase_metric!(counter, "validate", "quarantine_reasons"),
                metric_type: MetricType::Counter,
                help: "Quarantined rows by reason code",
            },
            MetricDoc {
                name: phase_metric!(counter, "validate", "values_clipped"),
                metric_type: MetricType::Counter,
                help: "Index values clamped into the allowed range",
            },
            MetricDoc {
                name: phase_metric!(counter, "validate", "batches_rejected"),
                metric_type: MetricType::Counter,
                help: "Batches failed for exceeding the quarantine threshold",
            },
            MetricDoc {
                name: phase_metric!(histogram, "validate", "quarantine_ratio"),
                metric_type: MetricType::Histogram,
                help: "Share of quarantined rows per batch",
            },
        ]
    }
}
