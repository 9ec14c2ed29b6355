use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::DriftArtifactSink;
use crate::error::Result;
use crate::pipeline::drift::DriftVerdict;

/// Writes each verdict as `<dir>/<artifact_key>.json`
pub struct FileDriftArtifactAdapter {
    dir: PathBuf,
}

impl FileDriftArtifactAdapter {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DriftArtifactSink for FileDriftArtifactAdapter {
    async fn write_verdict(&self, verdict: &DriftVerdict) -> Result<String> {
        let path = self.dir.join(format!("{}.json", verdict.artifact_key()));
        fs::write(&path, verdict.to_json()?)?;
        info!(path = %path.display(), drifted = verdict.drifted, "Wrote drift artifact");
        Ok(path.display().to_string())
    }
}

/// Keeps serialized verdicts in memory, keyed like the file adapter
#[derive(Default)]
pub struct InMemoryDriftArtifactAdapter {
    artifacts: Mutex<BTreeMap<String, String>>,
}

impl InMemoryDriftArtifactAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.artifacts.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.artifacts.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl DriftArtifactSink for InMemoryDriftArtifactAdapter {
    async fn write_verdict(&self, verdict: &DriftVerdict) -> Result<String> {
        let key = verdict.artifact_key();
        self.artifacts.lock().insert(key.clone(), verdict.to_json()?);
        Ok(key)
    }
}
