//! Silver layer: validated records partitioned by year.
//!
//! A partition is written once. Landing a year that already exists fails with
//! `YearAlreadyLanded`; historical years are never rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::CanonicalRecord;
use crate::error::{PipelineError, Result};
use crate::pipeline::gold::read_jsonl;
use crate::pipeline::processing::quality_gate::ValidatedBatch;

const RECORDS_FILE: &str = "records.jsonl";
const QUARANTINE_FILE: &str = "quarantine.jsonl";
const MANIFEST_FILE: &str = "manifest.json";

/// Lineage of one landed partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub year: i32,
    pub source_name: String,
    pub ingested_at: DateTime<Utc>,
    pub valid: usize,
    pub quarantined: usize,
}

pub struct SilverStore {
    /// `None` keeps everything in memory
    root: Option<PathBuf>,
    partitions: BTreeMap<i32, Vec<CanonicalRecord>>,
    manifests: BTreeMap<i32, PartitionManifest>,
}

impl SilverStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            partitions: BTreeMap::new(),
            manifests: BTreeMap::new(),
        }
    }

    /// Open a directory of `year=YYYY` partitions, creating it if needed
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let mut store = Self {
            root: Some(root.to_path_buf()),
            partitions: BTreeMap::new(),
            manifests: BTreeMap::new(),
        };

        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(year) = name
                .to_str()
                .and_then(|n| n.strip_prefix("year="))
                .and_then(|y| y.parse::<i32>().ok())
            else {
                continue;
            };
            let dir = entry.path();
            let records_path = dir.join(RECORDS_FILE);
            if !records_path.exists() {
                debug!(year, "Skipping partition without records file");
                continue;
            }
            store.partitions.insert(year, read_jsonl(&records_path)?);
            let manifest_path = dir.join(MANIFEST_FILE);
            if manifest_path.exists() {
                let manifest = serde_json::from_str(&fs::read_to_string(manifest_path)?)?;
                store.manifests.insert(year, manifest);
            }
        }

        info!(root = %root.display(), years = ?store.years(), "Opened silver store");
        Ok(store)
    }

    pub fn contains(&self, year: i32) -> bool {
        self.partitions.contains_key(&year)
    }

    pub fn years(&self) -> Vec<i32> {
        self.partitions.keys().copied().collect()
    }

    pub fn records(&self, year: i32) -> Option<&[CanonicalRecord]> {
        self.partitions.get(&year).map(|r| r.as_slice())
    }

    pub fn manifest(&self, year: i32) -> Option<&PartitionManifest> {
        self.manifests.get(&year)
    }

    /// All landed records, ordered by year then entity
    pub fn history(&self) -> Vec<CanonicalRecord> {
        let mut all: Vec<CanonicalRecord> = self.partitions.values().flatten().cloned().collect();
        all.sort_by_key(|r| (r.year, r.entity_id));
        all
    }

    /// Records of the given years only. Every requested year must be landed.
    pub fn history_for(&self, years: &[i32]) -> Result<Vec<CanonicalRecord>> {
        if let Some(&year) = years.iter().find(|y| !self.contains(**y)) {
            return Err(PipelineError::YearNotLanded { year });
        }
        Ok(self
            .history()
            .into_iter()
            .filter(|r| years.contains(&r.year))
            .collect())
    }

    /// Persist a validated batch as the partition of its year
    pub fn land(&mut self, batch: &ValidatedBatch) -> Result<PartitionManifest> {
        if self.contains(batch.year) {
            return Err(PipelineError::YearAlreadyLanded { year: batch.year });
        }

        let manifest = PartitionManifest {
            year: batch.year,
            source_name: batch.source_name.clone(),
            ingested_at: batch.ingested_at,
            valid: batch.valid.len(),
            quarantined: batch.quarantined.len(),
        };

        if let Some(root) = &self.root {
            let dir = root.join(format!("year={}", batch.year));
            let staging = root.join(format!(".year={}.staging", batch.year));
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            fs::create_dir_all(&staging)?;
            write_lines(&staging.join(RECORDS_FILE), &batch.valid)?;
            write_lines(&staging.join(QUARANTINE_FILE), &batch.quarantined)?;
            fs::write(staging.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
            fs::rename(&staging, &dir)?;
            info!(year = batch.year, dir = %dir.display(), valid = manifest.valid, "Landed silver partition");
        }

        self.partitions.insert(batch.year, batch.valid.clone());
        self.manifests.insert(batch.year, manifest.clone());
        Ok(manifest)
    }
}

fn write_lines<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.push(b'\n');
    }
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::record;
    use tempfile::TempDir;

    fn validated(year: i32, ids: &[u64]) -> ValidatedBatch {
        ValidatedBatch {
            year,
            ingested_at: Utc::now(),
            source_name: format!("export_{year}.json"),
            valid: ids.iter().map(|id| record(*id, year, 0)).collect(),
            quarantined: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_landing_a_year_twice_fails() {
        let mut store = SilverStore::in_memory();
        store.land(&validated(2022, &[1, 2])).unwrap();
        let err = store.land(&validated(2022, &[3])).unwrap_err();
        assert!(matches!(err, PipelineError::YearAlreadyLanded { year: 2022 }));
        assert_eq!(store.records(2022).unwrap().len(), 2);
    }

    #[test]
    fn test_history_is_ordered_by_year_then_entity() {
        let mut store = SilverStore::in_memory();
        store.land(&validated(2023, &[5, 1])).unwrap();
        store.land(&validated(2022, &[2])).unwrap();
        let keys: Vec<_> = store.history().iter().map(|r| (r.year, r.entity_id)).collect();
        assert_eq!(keys, vec![(2022, 2), (2023, 1), (2023, 5)]);
        assert_eq!(store.history_for(&[2023]).unwrap().len(), 2);
    }

    #[test]
    fn test_history_for_names_a_year_that_was_never_landed() {
        let mut store = SilverStore::in_memory();
        store.land(&validated(2022, &[1])).unwrap();
        let err = store.history_for(&[2022, 2030]).unwrap_err();
        assert!(matches!(err, PipelineError::YearNotLanded { year: 2030 }));
    }

    #[test]
    fn test_partitions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = SilverStore::open(dir.path()).unwrap();
            store.land(&validated(2022, &[1, 2, 3])).unwrap();
        }
        let reopened = SilverStore::open(dir.path()).unwrap();
        assert_eq!(reopened.years(), vec![2022]);
        assert_eq!(reopened.records(2022).unwrap().len(), 3);
        assert_eq!(reopened.manifest(2022).unwrap().source_name, "export_2022.json");
        assert!(dir.path().join("year=2022").join("quarantine.jsonl").exists());
    }
}
