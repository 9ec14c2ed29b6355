// Row-level stages: reconcile, reconstruct, validate

pub mod quality_gate;
pub mod reconcile;
pub mod reconstruct;

pub use quality_gate::{DataContractValidator, QualityGate, ValidatedBatch};
pub use reconcile::{ReconciledBatch, ReconciledRecord, SchemaReconciler};
pub use reconstruct::DerivedIndexReconstructor;
