use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

const CAS_PREFIX: &str = "cas:sha256:";

/// Content-addressed blob storage for model artifacts
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` and return a `cas:sha256:<hex>` reference
    fn put(&self, bytes: &[u8]) -> Result<String>;

    fn get(&self, artifact_ref: &str) -> Result<Vec<u8>>;
}

pub fn content_ref(bytes: &[u8]) -> (String, String) {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = hex::encode(hasher.finalize());
    (format!("{CAS_PREFIX}{hex}"), hex)
}

fn parse_ref(artifact_ref: &str) -> Result<&str> {
    match artifact_ref.strip_prefix(CAS_PREFIX) {
        Some(hex) if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) => Ok(hex),
        _ => Err(PipelineError::Artifact(format!(
            "malformed artifact reference '{artifact_ref}'"
        ))),
    }
}

/// Blobs under `<root>/sha256/ab/cd/<hex>`
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn blob_path(&self, hex: &str) -> PathBuf {
        self.root
            .join("sha256")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, bytes: &[u8]) -> Result<String> {
        let (artifact_ref, hex) = content_ref(bytes);
        let path = self.blob_path(&hex);
        if !path.exists() {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, bytes)?;
        }
        Ok(artifact_ref)
    }

    fn get(&self, artifact_ref: &str) -> Result<Vec<u8>> {
        let hex = parse_ref(artifact_ref)?;
        let path = self.blob_path(hex);
        fs::read(&path).map_err(|e| {
            PipelineError::Artifact(format!("cannot read {}: {e}", path.display()))
        })
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, bytes: &[u8]) -> Result<String> {
        let (artifact_ref, _) = content_ref(bytes);
        self.blobs
            .write()
            .entry(artifact_ref.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(artifact_ref)
    }

    fn get(&self, artifact_ref: &str) -> Result<Vec<u8>> {
        parse_ref(artifact_ref)?;
        self.blobs
            .read()
            .get(artifact_ref)
            .cloned()
            .ok_or_else(|| PipelineError::Artifact(format!("unknown artifact '{artifact_ref}'")))
    }
}
