use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use student_lag_pipeline::config::PipelineConfig;
use student_lag_pipeline::domain::{RawBatch, RawRow};
use student_lag_pipeline::logging;
use student_lag_pipeline::metrics;
use student_lag_pipeline::pipeline::gold::GoldDataset;
use student_lag_pipeline::pipeline::Pipeline;
use student_lag_pipeline::registry::{ArtifactModelLoader, ModelRegistry, ModelResolver};
use student_lag_pipeline::training::{
    FsArtifactStore, MajorityClassTrainer, NearestCentroidTrainer, Trainer, TrainingService,
};

#[derive(Parser)]
#[command(name = "student_lag_pipeline")]
#[command(about = "Yearly student records to drift reports, Gold datasets and served lag-risk models")]
#[command(version)]
struct Cli {
    /// Config file; overrides PIPELINE_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TrainerKind {
    MajorityClass,
    NearestCentroid,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one yearly export (JSON array of row objects)
    Ingest {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        file: PathBuf,
        /// Lineage name; defaults to the file stem
        #[arg(long)]
        source: Option<String>,
    },
    /// Build the first drift baseline from landed years
    SeedBaseline {
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,
    },
    /// Replace the active baseline with a new version built from landed years
    PromoteBaseline {
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,
    },
    /// Reactivate the previously active baseline
    RollbackBaseline,
    /// Rebuild the training set and offline store from Silver
    Gold,
    /// Replay every Silver year into the online feature store
    ResyncFeatures,
    /// Train on the Gold training set and register a new model version
    Train {
        #[arg(long, value_enum, default_value = "nearest-centroid")]
        trainer: TrainerKind,
    },
    /// Bind an alias to a registered version
    PromoteModel {
        #[arg(long)]
        version: u32,
        /// Defaults to the configured serving alias
        #[arg(long)]
        alias: Option<String>,
    },
    /// Show which version an alias resolves to
    Resolve {
        #[arg(long)]
        alias: Option<String>,
    },
    /// Fetch an entity's online features, optionally scoring them with the served model
    Lookup {
        #[arg(long)]
        entity: u64,
        #[arg(long)]
        predict: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load_from(path),
        None => PipelineConfig::load(),
    };
    config.context("Failed to load pipeline config")
}

fn read_batch(year: i32, file: &Path, source: Option<String>) -> Result<RawBatch> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;
    let rows: Vec<RawRow> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of row objects", file.display()))?;
    let source = source.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("batch_{year}"))
    });
    Ok(RawBatch::new(year, rows).with_source(source))
}

fn open_registry(config: &PipelineConfig) -> Result<Arc<ModelRegistry>> {
    let registry = ModelRegistry::open(&config.paths.registry_file(), &config.registry.model_name)
        .context("Failed to open model registry")?;
    Ok(Arc::new(registry))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    info!(data_root = %config.paths.data_root.display(), "Loaded config");

    match cli.command {
        Commands::Ingest { year, file, source } => {
            let batch = read_batch(year, &file, source)?;
            let mut pipeline = Pipeline::open(config)?;
            let report = pipeline
                .ingest(batch)
                .await
                .with_context(|| format!("Ingestion of {year} failed"))?;
            print_json(&report)?;
        }
        Commands::SeedBaseline { years } => {
            let mut pipeline = Pipeline::open(config)?;
            let baseline = pipeline.seed_baseline(&years)?;
            println!(
                "Seeded baseline '{}' v{} from {} records ({})",
                baseline.name, baseline.version, baseline.record_count, baseline.fingerprint
            );
        }
        Commands::PromoteBaseline { years } => {
            let mut pipeline = Pipeline::open(config)?;
            let baseline = pipeline.promote_baseline(&years)?;
            println!(
                "Promoted baseline '{}' v{} from years {:?}",
                baseline.name, baseline.version, baseline.source_years
            );
        }
        Commands::RollbackBaseline => {
            let mut pipeline = Pipeline::open(config)?;
            let baseline = pipeline.rollback_baseline()?;
            println!("Baseline v{} is active again", baseline.version);
        }
        Commands::Gold => {
            let mut pipeline = Pipeline::open(config)?;
            let gold = pipeline.rebuild_gold()?;
            println!(
                "Gold rebuilt: {} training rows, {} offline rows",
                gold.training.len(),
                gold.offline.len()
            );
            for (class, count) in gold.class_counts() {
                println!("   {class}: {count}");
            }
        }
        Commands::ResyncFeatures => {
            let pipeline = Pipeline::open(config)?;
            let report = pipeline
                .resync_features()
                .await
                .context("Feature store resync failed")?;
            print_json(&report)?;
        }
        Commands::Train { trainer } => {
            let gold = GoldDataset::read_from(&config.paths.gold_dir())
                .context("No Gold training set; run `gold` first")?;
            let trainer: Arc<dyn Trainer> = match trainer {
                TrainerKind::MajorityClass => Arc::new(MajorityClassTrainer),
                TrainerKind::NearestCentroid => Arc::new(NearestCentroidTrainer),
            };
            let service = TrainingService::new(
                trainer,
                Arc::new(FsArtifactStore::new(&config.paths.artifacts_dir())),
                open_registry(&config)?,
                config.training.clone(),
            );
            let outcome = service.train(&gold.training)?;
            println!(
                "Registered {} v{} (run {}), accuracy {:.3}, f1_macro {:.3}",
                outcome.version.model_name,
                outcome.version.version,
                outcome.version.run_id,
                outcome.report.accuracy,
                outcome.report.f1_macro
            );
        }
        Commands::PromoteModel { version, alias } => {
            let alias = alias.unwrap_or_else(|| config.registry.serving_alias.clone());
            let registry = open_registry(&config)?;
            match registry.promote(version, &alias)? {
                Some(previous) => println!("'{alias}' moved from v{previous} to v{version}"),
                None => println!("'{alias}' now points at v{version}"),
            }
        }
        Commands::Resolve { alias } => {
            let alias = alias.unwrap_or_else(|| config.registry.serving_alias.clone());
            let version = open_registry(&config)?.resolve(&alias)?;
            print_json(&*version)?;
        }
        Commands::Lookup { entity, predict } => {
            let pipeline = Pipeline::open(config.clone())?;
            let Some(features) = pipeline.lookup(entity).await? else {
                anyhow::bail!("Entity {entity} is not in the online feature store");
            };
            print_json(&features)?;
            if predict {
                let resolver = ModelResolver::new(
                    open_registry(&config)?,
                    Arc::new(ArtifactModelLoader::new(Arc::new(FsArtifactStore::new(
                        &config.paths.artifacts_dir(),
                    )))),
                    &config.registry.serving_alias,
                );
                resolver.reload()?;
                print_json(&resolver.predict(&features)?)?;
                print_json(&resolver.status())?;
            }
        }
    }

    Ok(())
}
