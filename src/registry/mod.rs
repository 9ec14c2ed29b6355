//! Model Registry.
//!
//! Versions and alias bindings live in an immutable [`RegistrySnapshot`]
//! behind a single pointer. Writers build a new snapshot and swap the pointer;
//! readers clone the `Arc` under a read guard held only for that clone, so a
//! resolve sees the table either before or after a promotion, never between.

pub mod resolver;

pub use resolver::{
    ArtifactModelLoader, LoadedModel, ModelLoader, ModelResolver, Prediction, Predictor, PredictorFactory,
    ServingStatus,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::metrics::serving::RegistryMetrics;

/// One trained artifact with its training context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: u32,
    pub run_id: Uuid,
    pub artifact_ref: String,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    pub metrics: BTreeMap<String, f64>,
    pub training_rows: usize,
    pub created_at: DateTime<Utc>,
}

/// Inputs of a registration; the registry assigns version, run id and timestamp
#[derive(Debug, Clone, Default)]
pub struct NewModelVersion {
    pub artifact_ref: String,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    pub metrics: BTreeMap<String, f64>,
    pub training_rows: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    versions: BTreeMap<u32, Arc<ModelVersion>>,
    aliases: BTreeMap<String, u32>,
    /// Previous holders per alias, most recent last
    alias_history: BTreeMap<String, Vec<u32>>,
}

impl RegistrySnapshot {
    pub fn version(&self, version: u32) -> Option<&Arc<ModelVersion>> {
        self.versions.get(&version)
    }

    pub fn holder(&self, alias: &str) -> Option<&Arc<ModelVersion>> {
        self.aliases.get(alias).and_then(|v| self.versions.get(v))
    }

    pub fn aliases_of(&self, version: u32) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, v)| **v == version)
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    pub fn aliases(&self) -> &BTreeMap<String, u32> {
        &self.aliases
    }

    pub fn latest_version(&self) -> Option<u32> {
        self.versions.keys().next_back().copied()
    }
}

pub struct ModelRegistry {
    model_name: String,
    current: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes writers; readers never take it
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl ModelRegistry {
    pub fn in_memory(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            writer: Mutex::new(()),
            path: None,
        }
    }

    /// Registry persisted as a JSON snapshot; a missing file starts empty
    pub fn open(path: &Path, model_name: &str) -> Result<Self> {
        let snapshot = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            RegistrySnapshot::default()
        };
        Ok(Self {
            model_name: model_name.to_string(),
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Always creates a new version; bindings are untouched
    pub fn register(&self, new: NewModelVersion) -> Result<Arc<ModelVersion>> {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let version = next.latest_version().unwrap_or(0) + 1;
        let model = Arc::new(ModelVersion {
            model_name: self.model_name.clone(),
            version,
            run_id: Uuid::new_v4(),
            artifact_ref: new.artifact_ref,
            hyperparameters: new.hyperparameters,
            metrics: new.metrics,
            training_rows: new.training_rows,
            created_at: Utc::now(),
        });
        next.versions.insert(version, Arc::clone(&model));
        self.commit(next)?;

        RegistryMetrics::record_registration();
        info!(model = %self.model_name, version, artifact = %model.artifact_ref, "Registered model version");
        Ok(model)
    }

    pub fn resolve(&self, alias: &str) -> Result<Arc<ModelVersion>> {
        let snapshot = self.snapshot();
        let found = snapshot.holder(alias).cloned();
        RegistryMetrics::record_resolve(found.is_some());
        found.ok_or_else(|| PipelineError::AliasNotFound {
            model: self.model_name.clone(),
            alias: alias.to_string(),
        })
    }

    pub fn get(&self, version: u32) -> Result<Arc<ModelVersion>> {
        self.snapshot()
            .version(version)
            .cloned()
            .ok_or_else(|| PipelineError::ModelVersionNotFound {
                model: self.model_name.clone(),
                version,
            })
    }

    pub fn versions(&self) -> Vec<Arc<ModelVersion>> {
        self.snapshot().versions.values().cloned().collect()
    }

    pub fn aliases_of(&self, version: u32) -> Vec<String> {
        self.snapshot().aliases_of(version)
    }

    /// Bind `alias` to `version`, detaching the previous holder. Returns that holder.
    pub fn promote(&self, version: u32, alias: &str) -> Result<Option<u32>> {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        if !next.versions.contains_key(&version) {
            return Err(PipelineError::ModelVersionNotFound {
                model: self.model_name.clone(),
                version,
            });
        }
        let previous = next.aliases.insert(alias.to_string(), version);
        if let Some(previous) = previous.filter(|p| *p != version) {
            next.alias_history
                .entry(alias.to_string())
                .or_default()
                .push(previous);
        }
        self.commit(next)?;

        RegistryMetrics::record_promotion();
        info!(model = %self.model_name, alias, version, previous = ?previous, "Promoted model version");
        Ok(previous)
    }

    /// Give `alias` back to the version that held it before the current one
    pub fn rollback_alias(&self, alias: &str) -> Result<u32> {
        let _writer = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let previous = next
            .alias_history
            .get_mut(alias)
            .and_then(|history| history.pop())
            .ok_or_else(|| PipelineError::NothingToRollBack {
                what: format!("holder of alias '{alias}'"),
            })?;
        next.aliases.insert(alias.to_string(), previous);
        self.commit(next)?;

        RegistryMetrics::record_promotion();
        info!(model = %self.model_name, alias, version = previous, "Rolled back alias");
        Ok(previous)
    }

    fn commit(&self, next: RegistrySnapshot) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
            fs::rename(&tmp, path)?;
        }
        *self.current.write() = Arc::new(next);
        Ok(())
    }
}
