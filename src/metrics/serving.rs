//! Model registry and serving metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn record_registration() {
        ::metrics::counter!(phase_metric!(counter, "registry", "versions_registered")).increment(1);
    }

    pub fn record_resolve(found: bool) {
        if found {
            ::metrics::counter!(phase_metric!(counter, "registry", "resolves")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "registry", "alias_misses")).increment(1);
        }
    }

    pub fn record_promotion() {
        ::metrics::counter!(phase_metric!(counter, "registry", "promotions")).increment(1);
    }

    pub fn record_reload(success: bool, version: Option<u32>) {
        if success {
            ::metrics::counter!(phase_metric!(counter, "registry", "reloads")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "registry", "reload_failures")).increment(1);
        }
        if let Some(version) = version {
            ::metrics::gauge!(phase_metric!(gauge, "registry", "serving_version")).set(version as f64);
        }
    }
}

impl PhaseMetrics for RegistryMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Gauge => ::metrics::describe_gauge!(doc.name, doc.help),
                _ => ::metrics::describe_counter!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "registry"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "registry", "versions_registered"),
                metric_type: MetricType::Counter,
                help: "Model versions registered",
            },
            MetricDoc {
                name: phase_metric!(counter, "registry", "resolves"),
                metric_type: MetricType::Counter,
                help: "Successful alias resolutions",
            },
            MetricDoc {
                name: phase_metric!(counter, "registry", "alias_misses"),
                metric_type: MetricType::Counter,
                help: "Resolutions of an unassigned alias",
            },
            MetricDoc {
                name: phase_metric!(counter, "registry", "promotions"),
                metric_type: MetricType::Counter,
                help: "Alias (re)assignments",
            },
            MetricDoc {
                name: phase_metric!(counter, "registry", "reloads"),
                metric_type: MetricType::Counter,
                help: "Serving reference swaps",
            },
            MetricDoc {
                name: phase_metric!(counter, "registry", "reload_failures"),
                metric_type: MetricType::Counter,
                help: "Reloads that kept the previous model",
            },
            MetricDoc {
                name: phase_metric!(gauge, "registry", "serving_version"),
                metric_type: MetricType::Gauge,
                help: "Version currently served",
            },
        ]
    }
}
