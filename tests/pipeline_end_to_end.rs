use serde_json::json;
use tempfile::TempDir;

use student_lag_pipeline::config::PipelineConfig;
use student_lag_pipeline::domain::{RawBatch, RawRow};
use student_lag_pipeline::error::PipelineError;
use student_lag_pipeline::pipeline::{DriftOutcome, Pipeline};

const STUDENTS: u64 = 30;

/// ieg cycles through 2.0..=4.0 so the baseline has a mean of 3 and a
/// population standard deviation of about 0.707
fn export(year: i32, ieg_shift: f64, inde_column: &str) -> RawBatch {
    let rows: Vec<RawRow> = (1..=STUDENTS)
        .map(|i| {
            let ieg = 2.0 + (i % 5) as f64 * 0.5 + ieg_shift;
            let mut row = json!({
                "RA": format!("RA-{i}"),
                "Fase": 1 + (i % 3),
                "Idade": 10 + (i % 4),
                "Gênero": if i % 2 == 0 { "Menina" } else { "Menino" },
                "Ano ingresso": year - 2,
                "Instituição de ensino": "Escola Pública",
                "Pedra": "Ágata",
                "IAA": 8.0, "IEG": ieg, "IPS": 6.9, "IDA": 6.2,
                "IPV": 7.3, "IAN": 5.0, "IPP": 7.0,
                "Defasagem": if i % 6 == 0 { -2 } else { 0 }
            })
            .as_object()
            .cloned()
            .unwrap();
            row.insert(inde_column.to_string(), json!(6.5));
            row
        })
        .collect();
    RawBatch::new(year, rows).with_source(format!("pede_{year}"))
}

fn config_at(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.data_root = dir.path().to_path_buf();
    config
}

#[tokio::test]
async fn test_shifted_field_is_reported_against_historical_baseline() {
    let dir = TempDir::new().unwrap();
    let mut pipeline = Pipeline::open(config_at(&dir)).unwrap();

    for year in 2022..=2024 {
        let report = pipeline
            .ingest(export(year, 0.0, &format!("INDE {year}")))
            .await
            .unwrap();
        assert!(matches!(report.drift, DriftOutcome::Skipped));
        assert_eq!(report.valid, STUDENTS as usize);
    }
    let baseline = pipeline.seed_baseline(&[2022, 2023, 2024]).unwrap();
    assert_eq!(baseline.source_years, vec![2022, 2023, 2024]);
    assert_eq!(baseline.record_count, 3 * STUDENTS as usize);

    // +3.54 is five baseline standard deviations
    let report = pipeline.ingest(export(2025, 3.54, "INDE 2025")).await.unwrap();
    let DriftOutcome::Compared { drifted_fields, artifact } = report.drift else {
        panic!("baseline is active, batch must be compared");
    };
    assert_eq!(drifted_fields, vec!["ieg".to_string()]);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(written["drifted"], true);
    assert_eq!(written["batch_year"], 2025);

    // report only: the batch still landed and Gold covers all four years
    assert_eq!(pipeline.silver().years(), vec![2022, 2023, 2024, 2025]);
    assert_eq!(report.training_rows, 3 * STUDENTS as usize);
    assert!(dir.path().join("03_gold").join("training_set.jsonl").exists());

    let latest = pipeline.lookup(7).await.unwrap().unwrap();
    assert_eq!(latest.year(), 2025);
}

#[tokio::test]
async fn test_block_on_drift_keeps_batch_out_of_silver() {
    let dir = TempDir::new().unwrap();
    let mut config = config_at(&dir);
    config.drift.block_on_drift = true;
    let mut pipeline = Pipeline::open(config).unwrap();

    pipeline.ingest(export(2022, 0.0, "INDE 2022")).await.unwrap();
    pipeline.seed_baseline(&[2022]).unwrap();

    let err = pipeline
        .ingest(export(2023, 3.54, "INDE 2023"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DriftBlocked { year: 2023, .. }));
    assert_eq!(pipeline.silver().years(), vec![2022]);
}

#[tokio::test]
async fn test_short_and_full_year_columns_land_the_same_index() {
    let mut short = Pipeline::in_memory(PipelineConfig::default()).unwrap();
    let mut full = Pipeline::in_memory(PipelineConfig::default()).unwrap();

    short.ingest(export(2023, 0.0, "INDE 23")).await.unwrap();
    full.ingest(export(2023, 0.0, "INDE 2023")).await.unwrap();

    let a = short.silver().records(2023).unwrap();
    let b = full.silver().records(2023).unwrap();
    assert_eq!(a, b);
    assert!(a.iter().all(|r| r.indices.inde == 6.5));
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut pipeline = Pipeline::open(config_at(&dir)).unwrap();
        pipeline.ingest(export(2022, 0.0, "INDE 2022")).await.unwrap();
        pipeline.ingest(export(2023, 0.0, "INDE 2023")).await.unwrap();
        pipeline.seed_baseline(&[2022]).unwrap();
        pipeline.promote_baseline(&[2022, 2023]).unwrap();
    }

    let mut reopened = Pipeline::open(config_at(&dir)).unwrap();
    assert_eq!(reopened.silver().years(), vec![2022, 2023]);
    assert_eq!(reopened.baselines().active().unwrap().version, 2);
    assert_eq!(reopened.gold().training.len(), STUDENTS as usize);
    assert_eq!(reopened.lookup(3).await.unwrap().unwrap().year(), 2023);

    assert_eq!(reopened.rollback_baseline().unwrap().version, 1);
    let err = reopened
        .ingest(export(2023, 0.0, "INDE 2023"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::YearAlreadyLanded { year: 2023 }));
}

fn with_bad_ages(mut batch: RawBatch, count: usize) -> RawBatch {
    for row in batch.rows.iter_mut().take(count) {
        row.insert("Idade".to_string(), json!(99));
    }
    batch
}

fn jsonl_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_rejected_batch_leaves_every_store_untouched() {
    let dir = TempDir::new().unwrap();
    let config = config_at(&dir);
    let quarantine_file = config.paths.quarantine_dir().join("quarantine_2023.jsonl");
    let mut pipeline = Pipeline::open(config).unwrap();
    pipeline.ingest(export(2022, 0.0, "INDE 2022")).await.unwrap();

    // 10 of 30 rows is above the default 0.2 ratio
    let err = pipeline
        .ingest(with_bad_ages(export(2023, 0.0, "INDE 2023"), 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::QuarantineExceeded { year: 2023, quarantined: 10, total: 30, .. }
    ));

    assert_eq!(pipeline.silver().years(), vec![2022]);
    assert_eq!(pipeline.feature_store().len().await.unwrap(), STUDENTS as usize);
    assert_eq!(pipeline.lookup(11).await.unwrap().unwrap().year(), 2022);
    assert!(!quarantine_file.exists());
    assert!(pipeline.gold().training.is_empty());
    assert_eq!(pipeline.gold().offline.len(), STUDENTS as usize);
}

#[tokio::test]
async fn test_quarantined_rows_reach_the_sink_with_reason_codes() {
    let dir = TempDir::new().unwrap();
    let config = config_at(&dir);
    let quarantine_file = config.paths.quarantine_dir().join("quarantine_2022.jsonl");
    let mut pipeline = Pipeline::open(config).unwrap();

    let report = pipeline
        .ingest(with_bad_ages(export(2022, 0.0, "INDE 2022"), 2))
        .await
        .unwrap();
    assert_eq!(report.valid, 28);
    assert_eq!(report.quarantined, 2);
    assert_eq!(report.quarantine_reasons.get("out_of_range"), Some(&2));
    assert_eq!(report.partition.quarantined, 2);

    let rows = jsonl_lines(&quarantine_file);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row["reasons"][0]["code"], "out_of_range");
        assert_eq!(row["reasons"][0]["field"], "age");
    }
    assert_eq!(rows[0]["record"]["entity_id"], 1);
    assert!(pipeline.lookup(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_schema_error_is_fatal_for_that_batch_only() {
    let mut pipeline = Pipeline::in_memory(PipelineConfig::default()).unwrap();

    let keyless: Vec<RawRow> = (1..=3)
        .map(|i| json!({"Nome": format!("Aluno {i}"), "IDA": 5.0}).as_object().cloned().unwrap())
        .collect();
    let err = pipeline
        .ingest(RawBatch::new(2022, keyless))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Schema { year: 2022, .. }));
    assert!(pipeline.silver().years().is_empty());

    let report = pipeline.ingest(export(2022, 0.0, "INDE 2022")).await.unwrap();
    assert_eq!(report.valid, STUDENTS as usize);
    assert_eq!(pipeline.silver().years(), vec![2022]);
}

#[tokio::test]
async fn test_batch_that_failed_to_land_can_be_ingested_again() {
    let dir = TempDir::new().unwrap();
    let config = config_at(&dir);
    let blocker = config.paths.silver_dir().join("year=2023");
    let quarantine_file = config.paths.quarantine_dir().join("quarantine_2023.jsonl");
    let mut pipeline = Pipeline::open(config.clone()).unwrap();

    // A stray file where the partition directory should go makes landing fail
    std::fs::write(&blocker, b"not a partition").unwrap();
    let err = pipeline
        .ingest(with_bad_ages(export(2023, 0.0, "INDE 2023"), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)));
    assert!(pipeline.silver().years().is_empty());

    std::fs::remove_file(&blocker).unwrap();
    let report = pipeline
        .ingest(with_bad_ages(export(2023, 0.0, "INDE 2023"), 1))
        .await
        .unwrap();
    assert_eq!(report.quarantined, 1);
    assert_eq!(jsonl_lines(&quarantine_file).len(), report.quarantined);

    let reopened = Pipeline::open(config).unwrap();
    assert_eq!(reopened.silver().years(), vec![2023]);
    assert_eq!(reopened.silver().records(2023).unwrap().len(), 29);
}
