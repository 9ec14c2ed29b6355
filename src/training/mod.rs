//! Training service.
//!
//! Learning algorithms are opaque behind [`Trainer`]: a feature matrix and
//! labels go in, a serializable [`ModelArtifact`] comes out. The service
//! handles preprocessing, the deterministic split, scoring, artifact storage
//! and registration of a new model version.

pub mod artifacts;
pub mod evaluate;
pub mod models;
pub mod preprocessing;

pub use artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use evaluate::ClassificationReport;
pub use models::{ClassScorer, MajorityClassTrainer, NearestCentroidTrainer};
pub use preprocessing::{FeatureMatrix, FeaturePreprocessor};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::domain::{TargetClass, TrainingRow};
use crate::error::{PipelineError, Result};
use crate::registry::{ModelRegistry, ModelVersion, NewModelVersion};

/// Serialized output of a trainer, stored content-addressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Selects the predictor implementation at load time
    pub kind: String,
    pub feature_names: Vec<String>,
    pub preprocessor: FeaturePreprocessor,
    pub payload: serde_json::Value,
}

impl ModelArtifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub trait Trainer: Send + Sync {
    fn kind(&self) -> &'static str;

    fn hyperparameters(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }

    /// Fit on `features` and return the model payload
    fn fit(&self, features: &FeatureMatrix, labels: &[TargetClass]) -> Result<serde_json::Value>;

    /// Rebuild a scorer from a payload produced by `fit`
    fn scorer(&self, payload: &serde_json::Value) -> Result<Box<dyn ClassScorer>>;

    fn predict(&self, payload: &serde_json::Value, features: &FeatureMatrix) -> Result<Vec<TargetClass>> {
        let scorer = self.scorer(payload)?;
        Ok(features.rows.iter().map(|row| scorer.classify(row)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub version: Arc<ModelVersion>,
    pub report: ClassificationReport,
    pub train_rows: usize,
    pub test_rows: usize,
}

pub struct TrainingService {
    trainer: Arc<dyn Trainer>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<ModelRegistry>,
    preprocessor: FeaturePreprocessor,
    config: TrainingConfig,
}

impl TrainingService {
    pub fn new(
        trainer: Arc<dyn Trainer>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<ModelRegistry>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            trainer,
            artifacts,
            registry,
            preprocessor: FeaturePreprocessor::default(),
            config,
        }
    }

    /// Shuffle indices with the configured seed and cut off the test share
    pub fn split(&self, n: usize) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        indices.shuffle(&mut rng);
        let test_len = ((n as f64) * self.config.test_fraction).ceil() as usize;
        let test_len = test_len.min(n.saturating_sub(1));
        let train = indices.split_off(test_len);
        (train, indices)
    }

    /// Train on the read-only training view and register the result as a new version
    pub fn train(&self, rows: &[TrainingRow]) -> Result<TrainingOutcome> {
        if rows.len() < 2 {
            return Err(PipelineError::Training(format!(
                "need at least 2 training rows, got {}",
                rows.len()
            )));
        }

        let matrix = self.preprocessor.transform_all(rows.iter().map(|r| &r.features));
        let labels: Vec<TargetClass> = rows.iter().map(|r| r.label()).collect();

        let (train_idx, test_idx) = self.split(rows.len());
        let train_x = matrix.select(&train_idx);
        let train_y: Vec<TargetClass> = train_idx.iter().map(|i| labels[*i]).collect();

        let payload = self.trainer.fit(&train_x, &train_y)?;

        let (eval_x, eval_y) = if test_idx.is_empty() {
            warn!("Empty test split, scoring on the training rows");
            (train_x, train_y)
        } else {
            (
                matrix.select(&test_idx),
                test_idx.iter().map(|i| labels[*i]).collect(),
            )
        };
        let predicted = self.trainer.predict(&payload, &eval_x)?;
        let report = ClassificationReport::compute(&eval_y, &predicted);

        let artifact = ModelArtifact {
            kind: self.trainer.kind().to_string(),
            feature_names: matrix.feature_names.clone(),
            preprocessor: self.preprocessor.clone(),
            payload,
        };
        let artifact_ref = self.artifacts.put(&artifact.to_bytes()?)?;

        let mut hyperparameters = self.trainer.hyperparameters();
        hyperparameters.insert("trainer".to_string(), self.trainer.kind().into());
        hyperparameters.insert("test_fraction".to_string(), self.config.test_fraction.into());
        hyperparameters.insert("seed".to_string(), self.config.seed.into());

        let version = self.registry.register(NewModelVersion {
            artifact_ref,
            hyperparameters,
            metrics: report.as_metrics(),
            training_rows: rows.len(),
        })?;

        info!(
            version = version.version,
            trainer = self.trainer.kind(),
            accuracy = report.accuracy,
            f1_macro = report.f1_macro,
            "Trained model"
        );

        Ok(TrainingOutcome {
            version,
            report,
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
        })
    }
}
