//! nids-tuner CLI
//!
//! ```bash
//! nids-tuner optimize --data traffic.json --config tuner.toml --output result.json
//! nids-tuner detect --train baseline.json --score live.json --adapt --save models/
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nids_tuner::classifier::knn_factory;
use nids_tuner::density::ModelStore;
use nids_tuner::optimization::evaluator::{CLASSIFIER_OBJECTIVES, DENSITY_OBJECTIVES};
use nids_tuner::optimization::{
    ClassifierObjectiveEvaluator, DensityObjectiveEvaluator, HybridEvaluator,
};
use nids_tuner::{Dataset, DensityAnomalyModel, MultiObjectiveSearchEngine, TunerConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "nids-tuner")]
#[command(version, about = "Crow Search tuning and Gaussian-mixture anomaly detection for network traffic", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true, env = "NIDS_TUNER_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search classifier and density hyperparameters
    Optimize {
        /// Feature matrix JSON ({feature_names, rows, labels?})
        #[arg(short, long)]
        data: PathBuf,

        /// Write the full result here instead of printing the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Fit a density model and score traffic
    Detect {
        /// Baseline feature matrix JSON
        #[arg(long)]
        train: PathBuf,

        /// Feature matrix JSON to score
        #[arg(long)]
        score: PathBuf,

        /// Force an adaptation pass after scoring
        #[arg(long)]
        adapt: bool,

        /// Save the model into this directory
        #[arg(long)]
        save: Option<PathBuf>,

        /// Model name used when saving
        #[arg(long, default_value = "sgm")]
        name: String,

        /// Model version used when saving
        #[arg(long, default_value = "1")]
        model_version: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TunerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _guards = nids_tuner::logging::init_logging(&config.logging)?;

    match cli.command {
        Command::Optimize { data, output, seed } => {
            optimize(config, &data, output.as_deref(), seed).await
        }
        Command::Detect {
            train,
            score,
            adapt,
            save,
            name,
            model_version,
        } => detect(config, &train, &score, adapt, save, &name, model_version),
    }
}

async fn optimize(
    mut config: TunerConfig,
    data_path: &Path,
    output: Option<&Path>,
    seed: Option<u64>,
) -> Result<()> {
    if seed.is_some() {
        config.search.seed = seed;
    }

    let data = Arc::new(
        Dataset::from_json_file(data_path)
            .with_context(|| format!("failed to read {}", data_path.display()))?,
    );
    info!(
        samples = data.n_samples(),
        features = data.feature_names().len(),
        labelled = data.labels().is_some(),
        "Dataset loaded"
    );

    let engine = MultiObjectiveSearchEngine::new(config.search.clone())?;
    let objectives = engine.objectives();
    let wants = |names: &[&str]| objectives.names().any(|name| names.contains(&name));

    let mut evaluator = HybridEvaluator::new(engine.space(), objectives.clone());
    if wants(&CLASSIFIER_OBJECTIVES) {
        evaluator = evaluator.with_classifier(ClassifierObjectiveEvaluator::new(
            knn_factory(),
            Arc::clone(&data),
            config.search.cv_folds,
            config.search.min_samples,
        ));
    }
    if wants(&DENSITY_OBJECTIVES) {
        let mut density = DensityObjectiveEvaluator::new(
            config.density.clone(),
            Arc::clone(&data),
            config.search.density_subsample,
            config.search.min_samples,
        );

        let mut reference = DensityAnomalyModel::new(config.density.clone())?;
        match reference.fit(data.features(), data.feature_names()) {
            Ok(_) => density = density.with_reference(&reference),
            Err(e) => warn!(error = %e, "Reference density model could not be fitted"),
        }
        evaluator = evaluator.with_density(density);
    }

    let result = engine.optimize(Arc::new(evaluator)).await?;
    let report = result.report();

    match output {
        Some(path) => {
            std::fs::write(path, serde_json::to_string_pretty(&result)?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Optimization result written");
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn detect(
    config: TunerConfig,
    train_path: &Path,
    score_path: &Path,
    adapt: bool,
    save: Option<PathBuf>,
    name: &str,
    version: u32,
) -> Result<()> {
    let train = Dataset::from_json_file(train_path)
        .with_context(|| format!("failed to read {}", train_path.display()))?;
    let live = Dataset::from_json_file(score_path)
        .with_context(|| format!("failed to read {}", score_path.display()))?;

    let mut model = DensityAnomalyModel::new(config.density)?;
    model.fit(train.features(), train.feature_names())?;
    let report = model.predict_anomaly(live.features())?;

    let adaptation = if adapt { Some(model.adapt(true)?) } else { None };

    if let Some(dir) = save {
        let path = ModelStore::new(dir).save(name, version, &model)?;
        info!(path = %path.display(), "Model saved");
    }

    let summary = json!({
        "threshold": report.threshold,
        "anomaly_count": report.anomaly_count,
        "anomaly_percentage": report.anomaly_percentage,
        "severity": report.severity,
        "pattern_summary": report.pattern_summary,
        "adaptation": adaptation,
        "model": model.model_info(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
