//! Feature store phase metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FeatureStoreMetrics;

impl FeatureStoreMetrics {
    pub fn record_sync(inserted: usize, replaced: usize, unchanged: usize, stale: usize) {
        ::metrics::counter!(phase_metric!(counter, "feature_store", "inserted")).increment(inserted as u64);
        ::metrics::counter!(phase_metric!(counter, "feature_store", "replaced")).increment(replaced as u64);
        ::metrics::counter!(phase_metric!(counter, "feature_store", "unchanged")).increment(unchanged as u64);
        ::metrics::counter!(phase_metric!(counter, "feature_store", "stale_skipped")).increment(stale as u64);
    }

    pub fn record_lookup(hit: bool) {
        if hit {
            ::metrics::counter!(phase_metric!(counter, "feature_store", "lookup_hits")).increment(1);
        } else {
            ::metrics::counter!(phase_metric!(counter, "feature_store", "lookup_misses")).increment(1);
        }
    }

    pub fn set_entities(count: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "feature_store", "entities")).set(count as f64);
    }
}

impl PhaseMetrics for FeatureStoreMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Gauge => ::metrics::describe_gauge!(doc.name, doc.help),
                _ => ::metrics::describe_counter!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "feature_store"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "inserted"),
                metric_type: MetricType::Counter,
                help: "Entities seen for the first time",
            },
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "replaced"),
                metric_type: MetricType::Counter,
                help: "Snapshots replaced by a newer or corrected record",
            },
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "unchanged"),
                metric_type: MetricType::Counter,
                help: "Upserts that matched the stored snapshot",
            },
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "stale_skipped"),
                metric_type: MetricType::Counter,
                help: "Upserts ignored because a newer year is stored",
            },
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "lookup_hits"),
                metric_type: MetricType::Counter,
                help: "Online lookups that found a snapshot",
            },
            MetricDoc {
                name: phase_metric!(counter, "feature_store", "lookup_misses"),
                metric_type: MetricType::Counter,
                help: "Online lookups for unknown entities",
            },
            MetricDoc {
                name: phase_metric!(gauge, "feature_store", "entities"),
                metric_type: MetricType::Gauge,
                help: "Entities held by the online store",
            },
        ]
    }
}
