use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use taxifare_trainer::{
    clean_df, get_data, DistanceType, EvaluationReport, RunStatus, SavedModel, Trainer,
    TrainerConfig, TrackingSession, TrainingTelemetry,
};
use tracing::warn;
use uuid::Uuid;

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_MANIFEST: &str = "logs/runs/index.jsonl";

#[derive(Parser, Debug)]
#[command(name = "trn", version, about = "Taxi fare model trainer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Loads, cleans, trains, evaluates and saves a model.
    Run(RunArgs),
    /// Lists most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows the manifest entry of a run.
    Show {
        run_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// JSON or TOML job file; the stock random-forest job when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
    /// Minimum level echoed to the console.
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: None,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct RunManifestEntry {
    run_id: String,
    submitted_at: DateTime<Utc>,
    config: Option<PathBuf>,
    estimator: String,
    experiment_name: String,
    log_path: PathBuf,
    status: String,
    #[serde(default)]
    tracking_run_id: Option<String>,
    #[serde(default)]
    metrics: Option<EvaluationReport>,
    #[serde(default)]
    artifact: Option<PathBuf>,
    #[serde(default)]
    remote_uri: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RunManifestEntry {
    fn new(config_path: Option<PathBuf>, config: &TrainerConfig, log_path: PathBuf) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            config: config_path,
            estimator: config.estimator.clone(),
            experiment_name: config.experiment_name.clone(),
            log_path,
            status: "running".into(),
            tracking_run_id: None,
            metrics: None,
            artifact: None,
            remote_uri: None,
            error: None,
        }
    }
}

struct JobOutcome {
    tracking_run_id: Option<String>,
    report: EvaluationReport,
    saved: SavedModel,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taxifare_trainer=info,trn=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        None => handle_run(RunArgs::default()),
        Some(Commands::Run(args)) => handle_run(args),
        Some(Commands::List { limit, manifest }) => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                let rmse_val = entry
                    .metrics
                    .and_then(|report| report.rmse_val)
                    .map_or_else(|| "-".to_string(), |rmse| rmse.to_string());
                println!(
                    "{} | {} | {} | {} | rmse_val {}",
                    entry.run_id, entry.estimator, entry.status, entry.submitted_at, rmse_val
                );
            }
            Ok(())
        }
        Some(Commands::Show { run_id, manifest }) => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.run_id == run_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("run {run_id} not found");
            }
            Ok(())
        }
    }
}

/// Job run when no configuration file is given.
fn default_job() -> TrainerConfig {
    TrainerConfig {
        nrows: Some(10_000),
        upload: true,
        local: false,
        gridsearch: true,
        optimize: true,
        estimator: "RandomForest".into(),
        mlflow: true,
        experiment_name: "taxifare_random_forest".into(),
        pipeline_memory: false,
        distance_type: DistanceType::Manhattan,
        feateng: vec![
            "distance_to_center".into(),
            "direction".into(),
            "distance".into(),
            "time_features".into(),
        ],
        ..TrainerConfig::default()
    }
}

fn load_config(path: Option<&Path>) -> Result<TrainerConfig> {
    match path {
        Some(path) => TrainerConfig::from_path(path)
            .with_context(|| format!("loading job config {}", path.display())),
        None => Ok(default_job()),
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    if let Some(path) = &args.config {
        anyhow::ensure!(path.exists(), "config file {} not found", path.display());
    }
    let config = load_config(args.config.as_deref())?;
    let log_path = compute_log_path(&args.log_dir)?;
    let entry = RunManifestEntry::new(args.config.clone(), &config, log_path.clone());
    append_manifest(&args.manifest, &entry)?;
    log_job_event(
        &log_path,
        LogLevel::Info,
        "run started",
        json!({ "run_id": entry.run_id, "estimator": entry.estimator }),
    )?;

    let telemetry = TrainingTelemetry::builder("trn")
        .log_path(&log_path)
        .console(args.log_level)
        .build()?;

    match run_job(&config, &telemetry) {
        Ok(outcome) => {
            update_entry(&args.manifest, &entry.run_id, |stored| {
                stored.status = "completed".into();
                stored.tracking_run_id.clone_from(&outcome.tracking_run_id);
                stored.metrics = Some(outcome.report);
                stored.artifact = Some(outcome.saved.local_path.clone());
                stored.remote_uri.clone_from(&outcome.saved.remote_uri);
            })?;
            log_job_event(
                &log_path,
                LogLevel::Info,
                "run completed",
                json!({
                    "run_id": entry.run_id,
                    "rmse_train": outcome.report.rmse_train,
                    "rmse_val": outcome.report.rmse_val,
                    "artifact": outcome.saved.local_path,
                }),
            )?;
            let summary = json!({
                "run_id": entry.run_id,
                "tracking_run_id": outcome.tracking_run_id,
                "metrics": outcome.report,
                "artifact": outcome.saved.local_path,
                "remote_uri": outcome.saved.remote_uri,
                "log_path": log_path,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => {
            update_entry(&args.manifest, &entry.run_id, |stored| {
                stored.status = "failed".into();
                stored.error = Some(format!("{err:#}"));
            })?;
            log_job_event(
                &log_path,
                LogLevel::Error,
                "run failed",
                json!({ "run_id": entry.run_id, "error": format!("{err:#}") }),
            )?;
            Err(err)
        }
    }
}

fn run_job(config: &TrainerConfig, telemetry: &TrainingTelemetry) -> Result<JobOutcome> {
    telemetry.stage("Loading Data")?;
    let dataset = clean_df(get_data(config).context("loading training data")?);
    telemetry.log(
        LogLevel::Info,
        "dataset ready",
        json!({ "rows": dataset.len(), "size_mb": dataset.size_mb() }),
    )?;

    let tracking = TrackingSession::start(config).context("starting experiment tracking")?;
    let tracking_run_id = tracking.run().map(|run| run.run_id.clone());
    let mut trainer = Trainer::new(dataset, config.clone(), tracking)
        .context("building trainer")?
        .with_telemetry(telemetry.clone());

    let result = train_evaluate_save(&mut trainer, config, telemetry);
    let status = if result.is_ok() {
        RunStatus::Finished
    } else {
        RunStatus::Failed
    };
    if let Err(err) = trainer.tracking().finish(status) {
        warn!(error = %err, "tracking run not closed");
    }
    let (report, saved) = result?;
    Ok(JobOutcome {
        tracking_run_id,
        report,
        saved,
    })
}

fn train_evaluate_save(
    trainer: &mut Trainer,
    config: &TrainerConfig,
    telemetry: &TrainingTelemetry,
) -> Result<(EvaluationReport, SavedModel)> {
    telemetry.stage("Training model")?;
    trainer.train().context("training model")?;
    trainer
        .log_estimator_params()
        .context("logging estimator params")?;

    telemetry.stage("Evaluating model")?;
    let report = trainer.evaluate().context("evaluating model")?;

    telemetry.stage("Saving model")?;
    let saved = trainer
        .save_model(config.upload)
        .context("saving model")?;
    Ok((report, saved))
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RunManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "train-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn update_entry(path: &Path, run_id: &str, apply: impl FnOnce(&mut RunManifestEntry)) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let Some(entry) = entries.iter_mut().find(|entry| entry.run_id == run_id) else {
        return Ok(());
    };
    apply(entry);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn log_job_event(path: &Path, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let logger = JsonLogger::new(path)?;
    let record = LogRecord::new("trn", level, message).with_metadata(metadata);
    logger.log(&record)
}
