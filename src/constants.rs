/// Canonical field names used across Silver/Gold outputs, drift verdicts and the
/// online feature store. Keeping them here avoids magic strings in each stage.

pub const ENTITY_ID: &str = "entity_id";
pub const YEAR: &str = "year";
pub const PHASE: &str = "phase";
pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const ENROLLMENT_YEAR: &str = "enrollment_year";
pub const YEARS_IN_PROGRAM: &str = "years_in_program";
pub const INSTITUTION: &str = "institution";
pub const STONE: &str = "stone";
pub const TARGET_LAG: &str = "target_lag";

// Composite development index and its component indicators
pub const INDE: &str = "inde";
pub const IAA: &str = "iaa";
pub const IEG: &str = "ieg";
pub const IPS: &str = "ips";
pub const IDA: &str = "ida";
pub const IPV: &str = "ipv";
pub const IAN: &str = "ian";
pub const IPP: &str = "ipp";

// Source export column names (after standardization: lowercase, no accents, `_` for spaces)
pub const SRC_ENTITY_KEY: &str = "ra";
pub const SRC_PHASE: &str = "fase";
pub const SRC_GENDER: &str = "genero";
pub const SRC_ENROLLMENT_YEAR: &str = "ano_ingresso";
pub const SRC_INSTITUTION: &[&str] = &["instituicao_de_ensino", "instituicao"];
pub const SRC_TARGET_LAG: &[&str] = &["defasagem", "defas"];

// Temporal source columns: looked up as `<base>_<yyyy>`, `<base>_<yy>`, `<base>`
pub const SRC_AGE: &str = "idade";
pub const SRC_STONE: &str = "pedra";
pub const SRC_INDE: &str = "inde";

/// Default alias the serving layer resolves
pub const PRODUCTION_ALIAS: &str = "production";

/// Default registered model name
pub const DEFAULT_MODEL_NAME: &str = "student_lag_classifier";

/// Default name for baselines promoted from historical loads
pub const DEFAULT_BASELINE_NAME: &str = "historical";
