// Medallion flow: reconcile and validate into Silver, drift-check, build Gold, sync the online store

pub mod drift;
pub mod feature_store;
pub mod gold;
pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use orchestrator::{BatchReport, DriftOutcome, Pipeline};
