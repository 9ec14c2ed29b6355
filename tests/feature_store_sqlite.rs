use std::sync::Arc;
use tempfile::TempDir;

use student_lag_pipeline::domain::{CanonicalRecord, Gender, IndexSet, Institution, Stone};
use student_lag_pipeline::pipeline::feature_store::sqlite::SqliteFeatureStore;
use student_lag_pipeline::pipeline::feature_store::{FeatureStore, FeatureStoreSynchronizer};

fn record(entity_id: u64, year: i32, ida: f64) -> CanonicalRecord {
    CanonicalRecord {
        entity_id,
        year,
        phase: 2,
        age: 11,
        gender: Gender::Male,
        institution: Institution::Private,
        stone: Stone::Topazio,
        years_in_program: 3,
        indices: IndexSet {
            inde: 7.4,
            iaa: 8.5,
            ieg: 7.0,
            ips: 6.5,
            ida,
            ipv: 7.9,
            ian: 10.0,
            ipp: 7.2,
        },
        target_lag: 0,
    }
}

#[tokio::test]
async fn test_sync_is_idempotent_and_order_independent() {
    let dir = TempDir::new().unwrap();
    let older = vec![record(1, 2023, 5.0), record(2, 2023, 6.0)];
    let newer = vec![record(1, 2024, 7.5)];

    let forward = FeatureStoreSynchronizer::new(Arc::new(
        SqliteFeatureStore::open(&dir.path().join("forward.db")).unwrap(),
    ));
    forward.sync(&older).await.unwrap();
    forward.sync(&newer).await.unwrap();
    let again = forward.sync(&newer).await.unwrap();
    assert_eq!(again.written(), 0);
    assert_eq!(again.unchanged, 1);

    let backward = FeatureStoreSynchronizer::new(Arc::new(
        SqliteFeatureStore::open(&dir.path().join("backward.db")).unwrap(),
    ));
    backward.sync(&newer).await.unwrap();
    let report = backward.sync(&older).await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.inserted, 1);

    assert_eq!(
        forward.store().snapshot().await.unwrap(),
        backward.store().snapshot().await.unwrap()
    );
}

#[tokio::test]
async fn test_vectors_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("online.db");
    {
        let store = SqliteFeatureStore::open(&path).unwrap();
        let sync = FeatureStoreSynchronizer::new(Arc::new(store));
        sync.sync(&[record(9, 2024, 4.25)]).await.unwrap();
    }

    let reopened = SqliteFeatureStore::open(&path).unwrap();
    assert_eq!(reopened.len().await.unwrap(), 1);
    let vector = reopened.get(9).await.unwrap().unwrap();
    assert_eq!(vector.year(), 2024);
    assert_eq!(vector.record.indices.ida, 4.25);
    assert!(reopened.get(10).await.unwrap().is_none());
}
