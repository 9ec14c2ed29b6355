use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::drift::DriftVerdict;
use crate::pipeline::processing::quality_gate::QuarantinedRow;

/// Destination of drift verdicts, keyed by batch ingestion time
#[async_trait]
pub trait DriftArtifactSink: Send + Sync {
    /// Persist the verdict and return the artifact location
    async fn write_verdict(&self, verdict: &DriftVerdict) -> Result<String>;
}

/// Destination of rows rejected by the data contract
#[async_trait]
pub trait QuarantineSink: Send + Sync {
    /// Replace whatever was previously written for `year`
    async fn write_quarantined(&self, year: i32, rows: &[QuarantinedRow]) -> Result<()>;
}
