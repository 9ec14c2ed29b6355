use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants;
use crate::error::{PipelineError, Result};

/// Environment variable pointing at the TOML config file
pub const CONFIG_ENV_VAR: &str = "PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub validation: ValidationConfig,
    pub reconstruction: ReconstructionConfig,
    pub drift: DriftConfig,
    pub registry: RegistryConfig,
    pub training: TrainingConfig,
}

/// On-disk layout of the medallion layers and serving stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
        }
    }
}

impl PathsConfig {
    pub fn silver_dir(&self) -> PathBuf {
        self.data_root.join("02_silver")
    }

    pub fn gold_dir(&self) -> PathBuf {
        self.data_root.join("03_gold")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.data_root.join("quarantine")
    }

    pub fn drift_reports_dir(&self) -> PathBuf {
        self.data_root.join("drift_reports")
    }

    pub fn baseline_file(&self) -> PathBuf {
        self.data_root.join("baselines.json")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.data_root.join("model_registry.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_root.join("artifacts")
    }

    pub fn online_store_db(&self) -> PathBuf {
        self.data_root.join("feature_store_online.db")
    }
}

/// How out-of-range indicator values are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Clamp into [min, max] and note it
    Clip,
    /// Quarantine the row
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Batch fails when quarantined/total is strictly above this
    pub max_quarantine_ratio: f64,
    pub index_policy: RangePolicy,
    pub index_min: f64,
    pub index_max: f64,
    pub min_age: u8,
    pub max_age: u8,
    pub max_phase: u8,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_quarantine_ratio: 0.2,
            index_policy: RangePolicy::Clip,
            index_min: 0.0,
            index_max: 10.0,
            min_age: 4,
            max_age: 30,
            max_phase: 9,
        }
    }
}

/// Optional residual term: composite = (anchor - Σ wᵢcᵢ) / divisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub field: String,
    pub divisor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Component weights keyed by index name
    pub weights: BTreeMap<String, f64>,
    pub anchor: Option<AnchorConfig>,
    /// Decimal places kept on reconstructed values
    pub round_decimals: u32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        let weights = [
            (constants::IAN, 0.1),
            (constants::IDA, 0.2),
            (constants::IEG, 0.2),
            (constants::IAA, 0.1),
            (constants::IPS, 0.1),
            (constants::IPV, 0.2),
        ]
        .into_iter()
        .map(|(name, w)| (name.to_string(), w))
        .collect();

        Self {
            weights,
            anchor: None,
            round_decimals: 3,
        }
    }
}

/// Distance statistic used on numeric fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatistic {
    /// Max absolute gap between binned CDFs
    KolmogorovSmirnov,
    /// Population stability index over the same bins
    PopulationStability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub baseline_name: String,
    pub statistic: DriftStatistic,
    pub numeric_threshold: f64,
    /// Per-field overrides, keyed by canonical field name
    pub field_thresholds: BTreeMap<String, f64>,
    /// Max tolerated absolute frequency delta of any category
    pub categorical_threshold: f64,
    pub bins: usize,
    /// Fail ingestion when no baseline is active instead of skipping the check
    pub require_baseline: bool,
    /// Reject drifted batches instead of only reporting
    pub block_on_drift: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            baseline_name: constants::DEFAULT_BASELINE_NAME.to_string(),
            statistic: DriftStatistic::KolmogorovSmirnov,
            numeric_threshold: 0.2,
            field_thresholds: BTreeMap::new(),
            categorical_threshold: 0.15,
            bins: 10,
            require_baseline: false,
            block_on_drift: false,
        }
    }
}

impl DriftConfig {
    pub fn threshold_for(&self, field: &str) -> f64 {
        self.field_thresholds
            .get(field)
            .copied()
            .unwrap_or(self.numeric_threshold)
    }

    pub fn categorical_threshold_for(&self, field: &str) -> f64 {
        self.field_thresholds
            .get(field)
            .copied()
            .unwrap_or(self.categorical_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub model_name: String,
    pub serving_alias: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            model_name: constants::DEFAULT_MODEL_NAME.to_string(),
            serving_alias: constants::PRODUCTION_ALIAS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Resolve the config path from `PIPELINE_CONFIG`, falling back to `pipeline.toml`.
    /// A missing default file means built-in defaults; a missing explicit file is an error.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load_from(default_path)
                } else {
                    info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject values that would make a stage meaningless
    pub fn check(&self) -> Result<()> {
        let v = &self.validation;
        if !(0.0..=1.0).contains(&v.max_quarantine_ratio) {
            return Err(PipelineError::Config(format!(
                "validation.max_quarantine_ratio must be within [0, 1], got {}",
                v.max_quarantine_ratio
            )));
        }
        if v.index_min >= v.index_max {
            return Err(PipelineError::Config(
                "validation.index_min must be below validation.index_max".to_string(),
            ));
        }
        if v.min_age > v.max_age {
            return Err(PipelineError::Config(
                "validation.min_age must not exceed validation.max_age".to_string(),
            ));
        }
        if self.drift.bins == 0 {
            return Err(PipelineError::Config("drift.bins must be positive".to_string()));
        }
        if let Some(anchor) = &self.reconstruction.anchor {
            if anchor.divisor == 0.0 {
                return Err(PipelineError::Config(
                    "reconstruction.anchor.divisor must be non-zero".to_string(),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.training.test_fraction) {
            return Err(PipelineError::Config(format!(
                "training.test_fraction must be within [0, 1), got {}",
                self.training.test_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config.validation.max_quarantine_ratio, 0.2);
        assert_eq!(config.drift.statistic, DriftStatistic::KolmogorovSmirnov);
        assert_eq!(config.reconstruction.weights.len(), 6);
        assert_eq!(config.registry.serving_alias, "production");
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [validation]
            max_quarantine_ratio = 0.05
            index_policy = "reject"

            [drift]
            statistic = "population_stability"
            numeric_threshold = 0.25

            [drift.field_thresholds]
            ieg = 0.4

            [reconstruction.anchor]
            field = "inde"
            divisor = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.validation.max_quarantine_ratio, 0.05);
        assert_eq!(config.validation.index_policy, RangePolicy::Reject);
        assert_eq!(config.validation.max_age, 30);
        assert_eq!(config.drift.threshold_for("ieg"), 0.4);
        assert_eq!(config.drift.threshold_for("ian"), 0.25);
        assert_eq!(config.reconstruction.anchor.unwrap().field, "inde");
    }

    #[test]
    fn test_invalid_ratio_is_rejected() {
        let err = PipelineConfig::from_toml_str("[validation]\nmax_quarantine_ratio = 1.5\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_paths_hang_off_data_root() {
        let paths = PathsConfig {
            data_root: PathBuf::from("/tmp/slp"),
        };
        assert_eq!(paths.silver_dir(), PathBuf::from("/tmp/slp/02_silver"));
        assert_eq!(paths.online_store_db(), PathBuf::from("/tmp/slp/feature_store_online.db"));
        assert_eq!(paths.drift_reports_dir(), PathBuf::from("/tmp/slp/drift_reports"));
        assert_eq!(paths.quarantine_dir(), PathBuf::from("/tmp/slp/quarantine"));
    }
}
