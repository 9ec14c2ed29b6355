//! Temporal Target Constructor.
//!
//! Joins each entity's year-N record with its year-(N+1) lag. The whole set is
//! recomputed from the accumulated history on every run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::{CanonicalRecord, EntityId, TargetClass, TrainingRow};
use crate::error::Result;

pub const TRAINING_SET_FILE: &str = "training_set.jsonl";
pub const OFFLINE_STORE_FILE: &str = "offline_store.jsonl";

/// Every historical record with the following year's lag when it exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRow {
    pub features: CanonicalRecord,
    pub next_year_lag: Option<i32>,
}

impl OfflineRow {
    pub fn label(&self) -> Option<TargetClass> {
        self.next_year_lag.map(TargetClass::from_lag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoldDataset {
    /// Rows with a known next-year outcome, sorted by (entity_id, year)
    pub training: Vec<TrainingRow>,
    /// Full history, same order
    pub offline: Vec<OfflineRow>,
}

#[derive(Debug, Clone)]
pub struct GoldPaths {
    pub training: PathBuf,
    pub offline: PathBuf,
}

impl GoldDataset {
    pub fn write_to(&self, dir: &Path) -> Result<GoldPaths> {
        fs::create_dir_all(dir)?;
        let paths = GoldPaths {
            training: dir.join(TRAINING_SET_FILE),
            offline: dir.join(OFFLINE_STORE_FILE),
        };
        write_jsonl(&paths.training, &self.training)?;
        write_jsonl(&paths.offline, &self.offline)?;
        info!(
            training = self.training.len(),
            offline = self.offline.len(),
            dir = %dir.display(),
            "Wrote gold layer"
        );
        Ok(paths)
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        Ok(Self {
            training: read_jsonl(&dir.join(TRAINING_SET_FILE))?,
            offline: read_jsonl(&dir.join(OFFLINE_STORE_FILE))?,
        })
    }

    pub fn class_counts(&self) -> BTreeMap<TargetClass, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.training {
            *counts.entry(row.label()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TemporalTargetConstructor;

impl TemporalTargetConstructor {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, history: &[CanonicalRecord]) -> GoldDataset {
        let mut by_key: BTreeMap<(EntityId, i32), &CanonicalRecord> = BTreeMap::new();
        for record in history {
            if by_key.insert((record.entity_id, record.year), record).is_some() {
                warn!(
                    entity_id = record.entity_id,
                    year = record.year,
                    "Duplicate (entity, year) in history, keeping the later record"
                );
            }
        }

        let mut dataset = GoldDataset::default();
        for ((entity_id, year), record) in &by_key {
            let next_year_lag = by_key
                .get(&(*entity_id, year + 1))
                .map(|next| next.target_lag);
            if let Some(lag) = next_year_lag {
                dataset.training.push(TrainingRow {
                    features: (*record).clone(),
                    next_year_lag: lag,
                });
            }
            dataset.offline.push(OfflineRow {
                features: (*record).clone(),
                next_year_lag,
            });
        }

        info!(
            history = history.len(),
            training = dataset.training.len(),
            "Built temporal training set"
        );
        dataset
    }
}

fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::record;
    use tempfile::TempDir;

    #[test]
    fn test_single_year_entity_produces_no_training_row() {
        let gold = TemporalTargetConstructor::new().build(&[record(1, 2022, 0)]);
        assert!(gold.training.is_empty());
        assert_eq!(gold.offline.len(), 1);
        assert_eq!(gold.offline[0].next_year_lag, None);
    }

    #[test]
    fn test_consecutive_years_produce_one_row_with_next_year_class() {
        let history = vec![record(1, 2023, -2), record(1, 2022, 0)];
        let gold = TemporalTargetConstructor::new().build(&history);

        assert_eq!(gold.training.len(), 1);
        let row = &gold.training[0];
        assert_eq!((row.entity_id(), row.year()), (1, 2022));
        assert_eq!(row.features.target_lag, 0);
        assert_eq!(row.label(), TargetClass::Critical);
    }

    #[test]
    fn test_gap_year_is_not_joined() {
        let gold = TemporalTargetConstructor::new().build(&[record(1, 2022, 0), record(1, 2024, -1)]);
        assert!(gold.training.is_empty());
    }

    #[test]
    fn test_output_sorted_by_entity_then_year() {
        let history = vec![
            record(2, 2023, 0),
            record(1, 2024, -1),
            record(2, 2022, -1),
            record(1, 2023, 0),
            record(1, 2022, -3),
        ];
        let gold = TemporalTargetConstructor::new().build(&history);
        let keys: Vec<_> = gold.training.iter().map(|r| (r.entity_id(), r.year())).collect();
        assert_eq!(keys, vec![(1, 2022), (1, 2023), (2, 2022)]);
        assert_eq!(gold.class_counts()[&TargetClass::Expected], 2);
    }

    #[test]
    fn test_rebuild_is_deterministic_and_round_trips() {
        let history = vec![record(1, 2022, 0), record(1, 2023, -1), record(3, 2023, 0)];
        let constructor = TemporalTargetConstructor::new();
        let first = constructor.build(&history);
        assert_eq!(first, constructor.build(&history));

        let dir = TempDir::new().unwrap();
        first.write_to(dir.path()).unwrap();
        let loaded = GoldDataset::read_from(dir.path()).unwrap();
        assert_eq!(loaded.training.len(), 1);
        assert_eq!(loaded.offline.len(), 3);
        assert_eq!(loaded.training[0].next_year_lag, -1);
    }
}
