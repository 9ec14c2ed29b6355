//! Phase-organized metrics for the pipeline
//!
//! Each stage owns a submodule with its counters and histograms. Without an
//! installed recorder the `metrics` macros are no-ops, so library code records
//! unconditionally and only the binary calls [`init_metrics`].

pub mod drift;
pub mod feature_store;
pub mod reconcile;
pub mod registry;
pub mod serving;
pub mod validate;

pub use drift::DriftMetrics;
pub use feature_store::FeatureStoreMetrics;
pub use reconcile::ReconcileMetrics;
pub use serving::RegistryMetrics;
pub use validate::ValidateMetrics;

use std::sync::Once;
use tracing::{info, warn};

/// Address of the Prometheus HTTP listener; unset means no exporter
pub const METRICS_ADDR_ENV_VAR: &str = "SLP_METRICS_ADDR";

static INIT: Once = Once::new();

/// Install the Prometheus recorder and register every phase's metrics.
///
/// Idempotent. Does nothing unless `SLP_METRICS_ADDR` holds a socket address.
/// Must run inside a tokio runtime, which hosts the HTTP listener.
pub fn init_metrics() {
    INIT.call_once(|| {
        let Ok(addr_str) = std::env::var(METRICS_ADDR_ENV_VAR) else {
            return;
        };
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid {} '{}': {}", METRICS_ADDR_ENV_VAR, addr_str, e);
                return;
            }
        };

        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                registry::register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

/// Implemented by each phase's metrics collection
pub trait PhaseMetrics {
    /// Describe every metric of the phase to the recorder
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Metric names follow `slp_{phase}_{name}` with a `_total` suffix on counters
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("slp_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("slp_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("slp_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
