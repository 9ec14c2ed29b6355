use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema error in {year} batch: {message}")]
    Schema { year: i32, message: String },

    #[error(
        "Quarantine threshold exceeded for {year} batch: {quarantined}/{total} rows ({ratio:.3}) above threshold {threshold:.3}"
    )]
    QuarantineExceeded {
        year: i32,
        quarantined: usize,
        total: usize,
        ratio: f64,
        threshold: f64,
    },

    #[error("No active baseline: seed or promote a baseline before requesting drift comparison")]
    BaselineMissing,

    #[error("Baseline v{version} is already active; seeding is one-way, promote a new version instead")]
    BaselineAlreadyActive { version: u32 },

    #[error("Cannot build a baseline from an empty record set")]
    EmptyBaseline,

    #[error("No previous {what} to roll back to")]
    NothingToRollBack { what: String },

    #[error("Alias not found: '{alias}' is not assigned to any version of model '{model}'")]
    AliasNotFound { model: String, alias: String },

    #[error("Model version not found: {model} v{version}")]
    ModelVersionNotFound { model: String, version: u32 },

    #[error("Drift detected in {year} batch on fields [{fields}]; batch rejected by policy")]
    DriftBlocked { year: i32, fields: String },

    #[error("Silver partition for {year} already landed; historical years are immutable")]
    YearAlreadyLanded { year: i32 },

    #[error("Silver partition for {year} has not been landed")]
    YearNotLanded { year: i32 },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
