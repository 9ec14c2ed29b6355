// Adapters implementing the app ports
pub mod drift_artifact_adapter;
pub mod quarantine_output_adapter;
