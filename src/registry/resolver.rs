//! Serving side of the registry: a cached, hot-swappable model for one alias.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ModelRegistry, ModelVersion};
use crate::domain::{EntityId, FeatureVector, TargetClass};
use crate::error::{PipelineError, Result};
use crate::metrics::serving::RegistryMetrics;
use crate::training::models::most_likely;
use crate::training::{
    ArtifactStore, ClassScorer, FeaturePreprocessor, MajorityClassTrainer, ModelArtifact,
    NearestCentroidTrainer, Trainer,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub entity_id: EntityId,
    pub model_version: u32,
    pub class: TargetClass,
    pub class_code: u8,
    pub label: String,
    pub probabilities: BTreeMap<String, f64>,
}

pub trait Predictor: Send + Sync {
    /// Class probabilities indexed by class code
    fn probabilities(&self, features: &FeatureVector) -> Result<[f64; 3]>;
}

/// Turns a registered version into something that can serve
pub trait ModelLoader: Send + Sync {
    fn load(&self, version: &ModelVersion) -> Result<Arc<dyn Predictor>>;
}

/// Artifact kinds this process knows how to serve, keyed by trainer kind
pub struct PredictorFactory {
    trainers: HashMap<String, Arc<dyn Trainer>>,
}

impl Default for PredictorFactory {
    fn default() -> Self {
        let mut factory = Self {
            trainers: HashMap::new(),
        };
        factory.register(Arc::new(MajorityClassTrainer));
        factory.register(Arc::new(NearestCentroidTrainer));
        factory
    }
}

impl PredictorFactory {
    pub fn register(&mut self, trainer: Arc<dyn Trainer>) {
        self.trainers.insert(trainer.kind().to_string(), trainer);
    }

    pub fn build(&self, artifact: ModelArtifact) -> Result<Arc<dyn Predictor>> {
        let trainer = self.trainers.get(&artifact.kind).ok_or_else(|| {
            PipelineError::Artifact(format!("no predictor registered for kind '{}'", artifact.kind))
        })?;
        let scorer = trainer.scorer(&artifact.payload)?;
        let width = artifact.feature_names.len();
        if artifact.preprocessor.feature_names() != artifact.feature_names {
            return Err(PipelineError::Artifact(format!(
                "artifact expects {width} features that this build does not produce"
            )));
        }
        Ok(Arc::new(ArtifactPredictor {
            preprocessor: artifact.preprocessor,
            scorer,
        }))
    }
}

struct ArtifactPredictor {
    preprocessor: FeaturePreprocessor,
    scorer: Box<dyn ClassScorer>,
}

impl Predictor for ArtifactPredictor {
    fn probabilities(&self, features: &FeatureVector) -> Result<[f64; 3]> {
        let row = self.preprocessor.transform(&features.record);
        Ok(self.scorer.probabilities(&row))
    }
}

/// Reads the artifact referenced by a version and hands it to the factory
pub struct ArtifactModelLoader {
    artifacts: Arc<dyn ArtifactStore>,
    factory: PredictorFactory,
}

impl ArtifactModelLoader {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self::with_factory(artifacts, PredictorFactory::default())
    }

    pub fn with_factory(artifacts: Arc<dyn ArtifactStore>, factory: PredictorFactory) -> Self {
        Self { artifacts, factory }
    }
}

impl ModelLoader for ArtifactModelLoader {
    fn load(&self, version: &ModelVersion) -> Result<Arc<dyn Predictor>> {
        let bytes = self.artifacts.get(&version.artifact_ref)?;
        self.factory.build(ModelArtifact::from_bytes(&bytes)?)
    }
}

pub struct LoadedModel {
    pub version: Arc<ModelVersion>,
    pub predictor: Arc<dyn Predictor>,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let probabilities = self.predictor.probabilities(features)?;
        let class = most_likely(&probabilities);
        Ok(Prediction {
            entity_id: features.entity_id(),
            model_version: self.version.version,
            class,
            class_code: class.code(),
            label: class.description().to_string(),
            probabilities: TargetClass::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), probabilities[c.code() as usize]))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingStatus {
    pub model_name: String,
    pub alias: String,
    pub version: Option<u32>,
    pub run_id: Option<Uuid>,
    pub artifact_ref: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Serves whatever version `alias` pointed at on the last successful reload.
///
/// Callers take an `Arc<LoadedModel>` and keep it for the duration of their
/// request; `reload` swaps the pointer without touching references already
/// handed out.
pub struct ModelResolver {
    registry: Arc<ModelRegistry>,
    loader: Arc<dyn ModelLoader>,
    alias: String,
    current: RwLock<Option<Arc<LoadedModel>>>,
    reload_lock: Mutex<()>,
}

impl ModelResolver {
    pub fn new(registry: Arc<ModelRegistry>, loader: Arc<dyn ModelLoader>, alias: &str) -> Self {
        Self {
            registry,
            loader,
            alias: alias.to_string(),
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.current.read().clone()
    }

    /// Re-resolve the alias and swap the served model. On failure the
    /// previously served model stays in place.
    pub fn reload(&self) -> Result<Arc<LoadedModel>> {
        let _reload = self.reload_lock.lock();
        let outcome = self.load_holder();
        match &outcome {
            Ok(loaded) => {
                let previous = self
                    .current
                    .write()
                    .replace(Arc::clone(loaded))
                    .map(|m| m.version.version);
                RegistryMetrics::record_reload(true, Some(loaded.version.version));
                info!(
                    model = %self.registry.model_name(),
                    alias = %self.alias,
                    version = loaded.version.version,
                    previous = ?previous,
                    "Reloaded serving model"
                );
            }
            Err(e) => {
                let serving = self.current().map(|m| m.version.version);
                RegistryMetrics::record_reload(false, serving);
                warn!(alias = %self.alias, serving = ?serving, error = %e, "Reload failed, keeping current model");
            }
        }
        outcome
    }

    fn load_holder(&self) -> Result<Arc<LoadedModel>> {
        let version = self.registry.resolve(&self.alias)?;
        if let Some(current) = self.current().filter(|m| m.version.version == version.version) {
            return Ok(current);
        }
        let predictor = self.loader.load(&version)?;
        Ok(Arc::new(LoadedModel {
            version,
            predictor,
            loaded_at: Utc::now(),
        }))
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let model = self.current().ok_or_else(|| PipelineError::AliasNotFound {
            model: self.registry.model_name().to_string(),
            alias: self.alias.clone(),
        })?;
        model.predict(features)
    }

    pub fn status(&self) -> ServingStatus {
        let current = self.current();
        ServingStatus {
            model_name: self.registry.model_name().to_string(),
            alias: self.alias.clone(),
            version: current.as_ref().map(|m| m.version.version),
            run_id: current.as_ref().map(|m| m.version.run_id),
            artifact_ref: current.as_ref().map(|m| m.version.artifact_ref.clone()),
            metrics: current
                .as_ref()
                .map(|m| m.version.metrics.clone())
                .unwrap_or_default(),
            loaded_at: current.as_ref().map(|m| m.loaded_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::record;
    use crate::registry::NewModelVersion;
    use crate::training::{FeatureMatrix, InMemoryArtifactStore};

    fn store_prior_model(artifacts: &InMemoryArtifactStore, labels: &[TargetClass]) -> String {
        let preprocessor = FeaturePreprocessor::default();
        let x = FeatureMatrix {
            feature_names: preprocessor.feature_names(),
            rows: vec![vec![0.0; 16]; labels.len()],
        };
        let artifact = ModelArtifact {
            kind: "majority_class".to_string(),
            feature_names: preprocessor.feature_names(),
            preprocessor,
            payload: MajorityClassTrainer.fit(&x, labels).unwrap(),
        };
        artifacts.put(&artifact.to_bytes().unwrap()).unwrap()
    }

    fn setup() -> (Arc<ModelRegistry>, ModelResolver) {
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let registry = Arc::new(ModelRegistry::in_memory("clf"));
        for labels in [[TargetClass::Alert; 2], [TargetClass::Expected; 2]] {
            let artifact_ref = store_prior_model(&artifacts, &labels);
            registry
                .register(NewModelVersion {
                    artifact_ref,
                    ..NewModelVersion::default()
                })
                .unwrap();
        }
        let resolver = ModelResolver::new(
            registry.clone(),
            Arc::new(ArtifactModelLoader::new(artifacts)),
            "production",
        );
        (registry, resolver)
    }

    #[test]
    fn test_predict_before_any_load_is_alias_not_found() {
        let (_, resolver) = setup();
        let err = resolver.predict(&FeatureVector::new(record(1, 2024, 0))).unwrap_err();
        assert!(matches!(err, PipelineError::AliasNotFound { .. }));
        assert!(resolver.reload().is_err());
        assert_eq!(resolver.status().version, None);
    }

    #[test]
    fn test_reload_swaps_and_in_flight_reference_survives() {
        let (registry, resolver) = setup();
        registry.promote(1, "production").unwrap();
        resolver.reload().unwrap();

        let in_flight = resolver.current().unwrap();
        registry.promote(2, "production").unwrap();
        // not visible until reload
        assert_eq!(resolver.status().version, Some(1));
        resolver.reload().unwrap();

        let features = FeatureVector::new(record(9, 2024, 0));
        assert_eq!(in_flight.predict(&features).unwrap().class, TargetClass::Alert);
        let served = resolver.predict(&features).unwrap();
        assert_eq!(served.class, TargetClass::Expected);
        assert_eq!(served.model_version, 2);
        assert_eq!(served.probabilities["expected"], 1.0);
    }

    #[test]
    fn test_failed_reload_keeps_serving_model() {
        let (registry, resolver) = setup();
        registry.promote(1, "production").unwrap();
        resolver.reload().unwrap();

        let broken = registry
            .register(NewModelVersion {
                artifact_ref: "cas:sha256:missing".to_string(),
                ..NewModelVersion::default()
            })
            .unwrap();
        registry.promote(broken.version, "production").unwrap();

        assert!(resolver.reload().is_err());
        assert_eq!(resolver.status().version, Some(1));
    }

    #[test]
    fn test_reload_of_same_holder_reuses_loaded_model() {
        let (registry, resolver) = setup();
        registry.promote(1, "production").unwrap();
        let first = resolver.reload().unwrap();
        let second = resolver.reload().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
