//! Yearly batch flow: reconcile, reconstruct, validate, drift-check, land in
//! Silver, sync the online store, then rebuild Gold.
//!
//! All long-lived state (baseline store, silver partitions, feature store,
//! sinks) is owned by one [`Pipeline`] value, so independent instances never
//! share anything.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::app::ports::{DriftArtifactSink, QuarantineSink};
use crate::config::PipelineConfig;
use crate::domain::{EntityId, FeatureVector, RawBatch};
use crate::error::{PipelineError, Result};
use crate::infra::drift_artifact_adapter::{FileDriftArtifactAdapter, InMemoryDriftArtifactAdapter};
use crate::infra::quarantine_output_adapter::{FileQuarantineAdapter, InMemoryQuarantineAdapter};
use crate::metrics::drift::DriftMetrics;
use crate::pipeline::drift::{Baseline, BaselineStore, DriftDetector, DriftState, DriftVerdict};
use crate::pipeline::feature_store::sqlite::SqliteFeatureStore;
use crate::pipeline::feature_store::{FeatureStore, FeatureStoreSynchronizer, InMemoryFeatureStore, SyncReport};
use crate::pipeline::gold::{GoldDataset, TemporalTargetConstructor};
use crate::pipeline::processing::reconstruct::ReconstructionSummary;
use crate::pipeline::processing::{DataContractValidator, DerivedIndexReconstructor, SchemaReconciler};
use crate::pipeline::storage::{PartitionManifest, SilverStore};

/// Drift stage result for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftOutcome {
    /// No baseline yet and none required
    Skipped,
    Compared {
        drifted_fields: Vec<String>,
        artifact: String,
    },
}

/// Summary of one ingested batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub year: i32,
    pub rows: usize,
    pub valid: usize,
    pub quarantined: usize,
    pub quarantine_reasons: BTreeMap<String, usize>,
    pub dropped_columns: Vec<String>,
    pub reconstruction: ReconstructionSummary,
    pub drift: DriftOutcome,
    pub partition: PartitionManifest,
    pub feature_sync: SyncReport,
    pub training_rows: usize,
    pub offline_rows: usize,
    pub elapsed_ms: u128,
}

pub struct Pipeline {
    config: PipelineConfig,
    reconciler: SchemaReconciler,
    reconstructor: DerivedIndexReconstructor,
    validator: DataContractValidator,
    drift: DriftDetector,
    silver: SilverStore,
    targets: TemporalTargetConstructor,
    features: FeatureStoreSynchronizer,
    drift_sink: Arc<dyn DriftArtifactSink>,
    quarantine_sink: Arc<dyn QuarantineSink>,
    gold: GoldDataset,
    /// Set when the baseline store and Gold outputs are persisted
    baseline_path: Option<PathBuf>,
    gold_dir: Option<PathBuf>,
}

impl Pipeline {
    /// Everything in memory; nothing touches the filesystem
    pub fn in_memory(config: PipelineConfig) -> Result<Self> {
        Self::new(
            config,
            BaselineStore::new(),
            SilverStore::in_memory(),
            Arc::new(InMemoryFeatureStore::new()),
            Arc::new(InMemoryDriftArtifactAdapter::new()),
            Arc::new(InMemoryQuarantineAdapter::new()),
        )
    }

    /// File-backed layout under `paths.data_root`
    pub fn open(config: PipelineConfig) -> Result<Self> {
        let paths = config.paths.clone();
        std::fs::create_dir_all(&paths.data_root)?;
        let baseline_path = paths.baseline_file();
        let mut pipeline = Self::new(
            config,
            BaselineStore::load(&baseline_path)?,
            SilverStore::open(&paths.silver_dir())?,
            Arc::new(SqliteFeatureStore::open(&paths.online_store_db())?),
            Arc::new(FileDriftArtifactAdapter::new(&paths.drift_reports_dir())?),
            Arc::new(FileQuarantineAdapter::new(&paths.quarantine_dir())?),
        )?;
        pipeline.baseline_path = Some(baseline_path);
        pipeline.gold_dir = Some(paths.gold_dir());
        pipeline.gold = pipeline.targets.build(&pipeline.silver.history());
        info!(
            data_root = %paths.data_root.display(),
            silver_years = ?pipeline.silver.years(),
            drift_state = ?pipeline.drift.state(),
            "Opened pipeline"
        );
        Ok(pipeline)
    }

    pub fn new(
        config: PipelineConfig,
        baselines: BaselineStore,
        silver: SilverStore,
        feature_store: Arc<dyn FeatureStore>,
        drift_sink: Arc<dyn DriftArtifactSink>,
        quarantine_sink: Arc<dyn QuarantineSink>,
    ) -> Result<Self> {
        config.check()?;
        Ok(Self {
            reconciler: SchemaReconciler::new(),
            reconstructor: DerivedIndexReconstructor::from_config(&config.reconstruction)?,
            validator: DataContractValidator::with_config(config.validation.clone()),
            drift: DriftDetector::new(config.drift.clone(), baselines),
            silver,
            targets: TemporalTargetConstructor::new(),
            features: FeatureStoreSynchronizer::new(feature_store),
            drift_sink,
            quarantine_sink,
            gold: GoldDataset::default(),
            baseline_path: None,
            gold_dir: None,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn silver(&self) -> &SilverStore {
        &self.silver
    }

    pub fn gold(&self) -> &GoldDataset {
        &self.gold
    }

    pub fn drift_state(&self) -> DriftState {
        self.drift.state()
    }

    pub fn baselines(&self) -> &BaselineStore {
        self.drift.store()
    }

    pub fn feature_store(&self) -> Arc<dyn FeatureStore> {
        self.features.store()
    }

    /// Run one yearly batch end to end.
    ///
    /// Batch-level failures (schema, quarantine ratio, missing required
    /// baseline, blocked drift, year already landed) abort before anything is
    /// landed. The quarantine sink replaces the year's rows on every attempt,
    /// so a batch that failed while landing can simply be ingested again.
    /// Once Silver holds the year, a failed feature sync or Gold rebuild is
    /// repaired with [`Pipeline::resync_features`] and [`Pipeline::rebuild_gold`].
    #[instrument(skip(self, batch), fields(year = batch.source_year, batch = %batch.source_name, rows = batch.len()))]
    pub async fn ingest(&mut self, batch: RawBatch) -> Result<BatchReport> {
        let started = Instant::now();
        let year = batch.source_year;
        if self.silver.contains(year) {
            return Err(PipelineError::YearAlreadyLanded { year });
        }

        let mut reconciled = self.reconciler.reconcile(&batch)?;
        let dropped_columns = reconciled.dropped_columns.clone();
        let reconstruction = self.reconstructor.apply(&mut reconciled);
        let validated = self.validator.validate(reconciled)?;

        let drift = match self.drift.state() {
            DriftState::NoBaseline if self.config.drift.require_baseline => {
                return Err(PipelineError::BaselineMissing);
            }
            DriftState::NoBaseline => {
                DriftMetrics::record_skipped_without_baseline();
                warn!("No active baseline, skipping drift comparison");
                DriftOutcome::Skipped
            }
            _ => {
                let verdict = self
                    .drift
                    .compare(year, validated.ingested_at, &validated.valid)?;
                self.handle_verdict(&verdict).await?
            }
        };

        self.quarantine_sink
            .write_quarantined(year, &validated.quarantined)
            .await?;
        let partition = self.silver.land(&validated)?;
        let feature_sync = self.features.sync(&validated.valid).await?;
        self.rebuild_gold()?;

        let report = BatchReport {
            year,
            rows: batch.len(),
            valid: validated.valid.len(),
            quarantined: validated.quarantined.len(),
            quarantine_reasons: validated
                .reason_counts()
                .into_iter()
                .map(|(code, n)| (code.to_string(), n))
                .collect(),
            dropped_columns,
            reconstruction,
            drift,
            partition,
            feature_sync,
            training_rows: self.gold.training.len(),
            offline_rows: self.gold.offline.len(),
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            valid = report.valid,
            quarantined = report.quarantined,
            training_rows = report.training_rows,
            elapsed_ms = report.elapsed_ms as u64,
            "Batch ingested"
        );
        Ok(report)
    }

    async fn handle_verdict(&self, verdict: &DriftVerdict) -> Result<DriftOutcome> {
        let artifact = self.drift_sink.write_verdict(verdict).await?;
        let drifted_fields: Vec<String> = verdict
            .drifted_fields()
            .into_iter()
            .map(str::to_string)
            .collect();
        if verdict.drifted && self.config.drift.block_on_drift {
            DriftMetrics::record_batch_blocked();
            return Err(PipelineError::DriftBlocked {
                year: verdict.batch_year,
                fields: drifted_fields.join(", "),
            });
        }
        if verdict.drifted {
            warn!(fields = ?drifted_fields, artifact = %artifact, "Drift detected");
        }
        Ok(DriftOutcome::Compared {
            drifted_fields,
            artifact,
        })
    }

    /// First baseline, built from landed Silver years
    pub fn seed_baseline(&mut self, years: &[i32]) -> Result<Baseline> {
        let records = self.silver.history_for(years)?;
        let baseline = self.drift.seed_baseline(&records, Utc::now())?.clone();
        self.persist_baselines()?;
        Ok(baseline)
    }

    /// New baseline version from landed Silver years; replaces the active one
    pub fn promote_baseline(&mut self, years: &[i32]) -> Result<Baseline> {
        let records = self.silver.history_for(years)?;
        let baseline = self.drift.promote_baseline(&records, Utc::now())?.clone();
        info!(version = baseline.version, years = ?baseline.source_years, "Promoted baseline");
        self.persist_baselines()?;
        Ok(baseline)
    }

    pub fn rollback_baseline(&mut self) -> Result<Baseline> {
        let baseline = self.drift.rollback_baseline()?.clone();
        info!(version = baseline.version, "Rolled back baseline");
        self.persist_baselines()?;
        Ok(baseline)
    }

    fn persist_baselines(&self) -> Result<()> {
        if let Some(path) = &self.baseline_path {
            self.drift.save_store(path)?;
        }
        Ok(())
    }

    /// Recompute training set and offline store from the whole Silver history
    pub fn rebuild_gold(&mut self) -> Result<&GoldDataset> {
        self.gold = self.targets.build(&self.silver.history());
        if let Some(dir) = &self.gold_dir {
            self.gold.write_to(dir)?;
        }
        Ok(&self.gold)
    }

    /// Replay the whole Silver history into the online store
    #[instrument(skip(self))]
    pub async fn resync_features(&self) -> Result<SyncReport> {
        let history = self.silver.history();
        info!(records = history.len(), years = ?self.silver.years(), "Resyncing feature store from silver");
        self.features.sync(&history).await
    }

    pub async fn lookup(&self, entity_id: EntityId) -> Result<Option<FeatureVector>> {
        self.features.lookup(entity_id).await
    }
}
