use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use student_lag_pipeline::registry::{ModelRegistry, NewModelVersion};

fn version_with_f1(f1: f64) -> NewModelVersion {
    NewModelVersion {
        artifact_ref: format!("cas:sha256:{:064x}", (f1 * 1000.0) as u64),
        metrics: BTreeMap::from([("f1_macro".to_string(), f1)]),
        training_rows: 100,
        ..NewModelVersion::default()
    }
}

#[test]
fn test_resolvers_never_observe_a_torn_alias_table() {
    let registry = Arc::new(ModelRegistry::in_memory("clf"));
    for i in 1..=4 {
        registry.register(version_with_f1(i as f64 / 10.0)).unwrap();
    }
    registry.promote(1, "production").unwrap();
    registry.promote(2, "staging").unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0usize;
                loop {
                    let snapshot = registry.snapshot();
                    // an alias has exactly one holder and the holder lists the alias
                    let holder = snapshot.holder("production").expect("production always bound");
                    assert_eq!(snapshot.aliases_of(holder.version), {
                        let mut expected = vec!["production".to_string()];
                        if snapshot.aliases().get("staging") == Some(&holder.version) {
                            expected.push("staging".to_string());
                        }
                        expected
                    });
                    let resolved = registry.resolve("production").unwrap();
                    assert!((1..=4).contains(&resolved.version));
                    observed += 1;
                    if done.load(Ordering::Acquire) {
                        break;
                    }
                }
                observed
            })
        })
        .collect();

    for round in 0..200u32 {
        let version = round % 4 + 1;
        registry.promote(version, "production").unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(registry.resolve("production").unwrap().version, 4);
}

#[test]
fn test_concurrent_registrations_get_distinct_versions() {
    let registry = Arc::new(ModelRegistry::in_memory("clf"));
    let writers: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.register(version_with_f1(i as f64)).unwrap().version)
        })
        .collect();

    let mut versions: Vec<u32> = writers.into_iter().map(|w| w.join().unwrap()).collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<u32>>());
}
