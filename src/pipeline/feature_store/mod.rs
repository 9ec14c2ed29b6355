//! Feature Store Synchronizer.
//!
//! Keeps the latest record of every entity in a keyed online store. Upserts
//! are per-entity atomic and ordered by year, so replaying any subset of
//! history in any order converges to the same state.

pub mod sqlite;

pub use sqlite::SqliteFeatureStore;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{CanonicalRecord, EntityId, FeatureVector};
use crate::error::Result;
use crate::metrics::feature_store::FeatureStoreMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    /// Newer year, or same year with different values
    Replaced,
    Unchanged,
    /// A newer year is already stored; nothing written
    Stale,
}

/// Decide what an upsert does given the stored snapshot
pub fn decide(existing: Option<&FeatureVector>, incoming: &FeatureVector) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Inserted,
        Some(current) if incoming.year() < current.year() => UpsertOutcome::Stale,
        Some(current) if current == incoming => UpsertOutcome::Unchanged,
        Some(_) => UpsertOutcome::Replaced,
    }
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn upsert(&self, vector: FeatureVector) -> Result<UpsertOutcome>;

    async fn get(&self, entity_id: EntityId) -> Result<Option<FeatureVector>>;

    /// Every stored vector, ordered by entity id
    async fn snapshot(&self) -> Result<Vec<FeatureVector>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Process-local store. Each entity's vector sits behind its own `Arc`, so a
/// reader holds either the old or the new snapshot, never a mix.
#[derive(Default)]
pub struct InMemoryFeatureStore {
    vectors: RwLock<HashMap<EntityId, Arc<FeatureVector>>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn upsert(&self, vector: FeatureVector) -> Result<UpsertOutcome> {
        let mut vectors = self.vectors.write();
        let outcome = decide(vectors.get(&vector.entity_id()).map(|v| v.as_ref()), &vector);
        if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Replaced) {
            vectors.insert(vector.entity_id(), Arc::new(vector));
        }
        Ok(outcome)
    }

    async fn get(&self, entity_id: EntityId) -> Result<Option<FeatureVector>> {
        let found = self.vectors.read().get(&entity_id).cloned();
        Ok(found.map(|v| v.as_ref().clone()))
    }

    async fn snapshot(&self) -> Result<Vec<FeatureVector>> {
        let mut all: Vec<FeatureVector> = self
            .vectors
            .read()
            .values()
            .map(|v| v.as_ref().clone())
            .collect();
        all.sort_by_key(|v| v.entity_id());
        Ok(all)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.vectors.read().len())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub stale: usize,
}

impl SyncReport {
    fn count(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Replaced => self.replaced += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Stale => self.stale += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

pub struct FeatureStoreSynchronizer {
    store: Arc<dyn FeatureStore>,
}

impl FeatureStoreSynchronizer {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn FeatureStore> {
        Arc::clone(&self.store)
    }

    /// Upsert the most recent record of each entity found in `records`
    pub async fn sync(&self, records: &[CanonicalRecord]) -> Result<SyncReport> {
        let mut latest: BTreeMap<EntityId, &CanonicalRecord> = BTreeMap::new();
        for record in records {
            latest
                .entry(record.entity_id)
                .and_modify(|current| {
                    if record.year > current.year {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        let mut report = SyncReport::default();
        for record in latest.into_values() {
            let outcome = self.store.upsert(FeatureVector::new(record.clone())).await?;
            debug!(entity_id = record.entity_id, year = record.year, ?outcome, "Upserted feature vector");
            report.count(outcome);
        }

        FeatureStoreMetrics::record_sync(report.inserted, report.replaced, report.unchanged, report.stale);
        FeatureStoreMetrics::set_entities(self.store.len().await?);
        info!(
            inserted = report.inserted,
            replaced = report.replaced,
            unchanged = report.unchanged,
            stale = report.stale,
            "Synchronized feature store"
        );
        Ok(report)
    }

    pub async fn lookup(&self, entity_id: EntityId) -> Result<Option<FeatureVector>> {
        let found = self.store.get(entity_id).await?;
        FeatureStoreMetrics::record_lookup(found.is_some());
        Ok(found)
    }
}
