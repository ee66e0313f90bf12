//! Training orchestration: split, pipeline assembly, optional search, fit,
//! evaluation and persistence.

use std::time::Instant;

use ndarray::{Array1, ArrayView1};
use rand::{seq::index::sample, thread_rng};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tracing::{debug, info};

use crate::{
    config::TrainerConfig,
    data::{split::train_test_split, Dataset, Trip},
    error::{Result, TrainerError},
    estimators::SearchSpace,
    machine::MachineSpecs,
    metrics,
    persistence::{self, SavedModel},
    pipeline::{Pipeline, PipelineMemory},
    search::{RandomizedSearch, SearchOutcome},
    telemetry::TrainingTelemetry,
    tracking::TrackingSession,
};

/// Share of rows held out for validation.
pub const VALIDATION_SIZE: f64 = 0.15;

const PREVIEW_ROWS: usize = 5;

/// RMSE figures produced by [`Trainer::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// RMSE on the training split.
    pub rmse_train: f64,
    /// RMSE on the validation split, when one was held out.
    pub rmse_val: Option<f64>,
}

/// Summary of the hyperparameter search run during [`Trainer::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    /// Winning assignment.
    pub best_params: crate::search::ParamSet,
    /// Winning mean cross-validated R².
    pub best_score: f64,
    /// Candidates evaluated.
    pub candidates: usize,
}

impl From<&SearchOutcome> for SearchSummary {
    fn from(outcome: &SearchOutcome) -> Self {
        Self {
            best_params: outcome.best_params.clone(),
            best_score: outcome.best_score,
            candidates: outcome.candidates.len(),
        }
    }
}

struct Validation {
    trips: Vec<Trip>,
    target: Array1<f64>,
}

/// Drives one training job from a cleaned dataset to a saved model.
pub struct Trainer {
    config: TrainerConfig,
    tracking: TrackingSession,
    telemetry: TrainingTelemetry,
    pool: ThreadPool,
    x_train: Vec<Trip>,
    y_train: Array1<f64>,
    validation: Option<Validation>,
    pipeline: Option<Pipeline>,
    search_space: Option<SearchSpace>,
    search: Option<RandomizedSearch>,
    search_summary: Option<SearchSummary>,
    memory: Option<PipelineMemory>,
}

impl Trainer {
    /// Separates the fare label from `dataset` and builds the trainer.
    pub fn new(dataset: Dataset, config: TrainerConfig, tracking: TrackingSession) -> Result<Self> {
        let (trips, target) = dataset.into_features_and_target()?;
        Self::from_parts(trips, target, config, tracking)
    }

    /// Builds the trainer from features and target, holding out a validation
    /// split when `split` is set, then logs the configuration and host specs.
    pub fn from_parts(
        trips: Vec<Trip>,
        target: Array1<f64>,
        config: TrainerConfig,
        tracking: TrackingSession,
    ) -> Result<Self> {
        if trips.len() != target.len() {
            return Err(TrainerError::shape(
                format!("{} targets", trips.len()),
                format!("{} targets", target.len()),
            ));
        }
        if trips.is_empty() {
            return Err(TrainerError::EmptyInput("training rows"));
        }
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .thread_name(|idx| format!("taxifare-worker-{idx}"))
            .build()?;

        let (x_train, y_train, validation) = if config.split {
            let indices = train_test_split(trips.len(), VALIDATION_SIZE, config.random_state);
            let (train_trips, train_target) = take_rows(&trips, target.view(), &indices.train);
            let (val_trips, val_target) = take_rows(&trips, target.view(), &indices.validation);
            (
                train_trips,
                train_target,
                Some(Validation {
                    trips: val_trips,
                    target: val_target,
                }),
            )
        } else {
            (trips, target, None)
        };

        info!(
            train_rows = x_train.len(),
            validation_rows = validation.as_ref().map_or(0, |val| val.trips.len()),
            threads = pool.current_num_threads(),
            "trainer constructed"
        );

        let trainer = Self {
            config,
            tracking,
            telemetry: TrainingTelemetry::silent("trainer"),
            pool,
            x_train,
            y_train,
            validation,
            pipeline: None,
            search_space: None,
            search: None,
            search_summary: None,
            memory: None,
        };
        trainer.log_config_params()?;
        trainer.log_machine_specs()?;
        Ok(trainer)
    }

    /// Routes stage banners and results to `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TrainingTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn log_config_params(&self) -> Result<()> {
        for (key, value) in self.config.params() {
            self.tracking.log_param(&key, value)?;
        }
        Ok(())
    }

    fn log_machine_specs(&self) -> Result<()> {
        let specs = MachineSpecs::detect();
        self.tracking.log_param("ram", specs.ram_gb)?;
        self.tracking.log_param("cpus", specs.cpus)?;
        debug!(cpus = specs.cpus, ram_gb = specs.ram_gb, "machine specs logged");
        Ok(())
    }

    /// Builds the feature composer and estimator, replacing any held pipeline.
    pub fn set_pipeline(&mut self) -> Result<()> {
        let (mut pipeline, space) = Pipeline::from_config(&self.config)?;
        if self.config.pipeline_memory {
            if self.memory.is_none() {
                let memory = PipelineMemory::create()?;
                info!(dir = %memory.dir().display(), "pipeline memory created");
                self.memory = Some(memory);
            }
            if let Some(memory) = &self.memory {
                pipeline = pipeline.with_memory(memory.clone());
            }
        }
        let kind = pipeline.estimator.kind();
        self.tracking.log_param("estimator", &self.config.estimator)?;
        self.telemetry.log(
            LogLevel::Info,
            kind.model_name(),
            json!({ "estimator": kind.name(), "feateng": &self.config.feateng }),
        )?;
        self.pipeline = Some(pipeline);
        self.search_space = space;
        self.search = None;
        self.search_summary = None;
        Ok(())
    }

    /// Wraps the held pipeline in a randomized search over the estimator's
    /// default space: 10 candidates, 2 folds, seed 42, R² scoring.
    pub fn add_grid_search(&mut self) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(TrainerError::EmptyPipeline)?;
        let space = self
            .search_space
            .clone()
            .ok_or_else(|| TrainerError::NoSearchSpace(pipeline.estimator.kind().name()))?;
        self.search = Some(RandomizedSearch::new(space)?);
        Ok(())
    }

    /// Assembles the pipeline, wraps it in a search when `gridsearch` is set,
    /// fits it on the training split and logs `train_time`.
    pub fn train(&mut self) -> Result<()> {
        let started = Instant::now();
        self.set_pipeline()?;
        if self.config.gridsearch {
            self.add_grid_search()?;
        }

        let pool = &self.pool;
        let trips = &self.x_train;
        let target = self.y_train.view();
        match (&self.search, self.pipeline.as_mut()) {
            (_, None) => return Err(TrainerError::EmptyPipeline),
            (Some(search), Some(pipeline)) => {
                let outcome = pool.install(|| search.fit(pipeline, trips, target))?;
                let summary = SearchSummary::from(&outcome);
                *pipeline = outcome.best_pipeline;
                self.search_summary = Some(summary);
            }
            (None, Some(pipeline)) => pool.install(|| pipeline.fit(trips, target))?,
        }

        if let Some(summary) = &self.search_summary {
            for (name, value) in &summary.best_params {
                self.tracking.log_param(&format!("best_{name}"), param_text(value))?;
            }
            self.tracking.log_metric("best_cv_score", summary.best_score)?;
            self.telemetry.log(
                LogLevel::Info,
                "randomized search finished",
                json!({
                    "best_params": &summary.best_params,
                    "best_cv_score": summary.best_score,
                    "candidates": summary.candidates,
                }),
            )?;
        }

        let elapsed = started.elapsed();
        self.tracking.log_metric("train_time", elapsed.as_secs() as f64)?;
        self.telemetry.log(
            LogLevel::Info,
            "training finished",
            json!({ "train_time_s": elapsed.as_secs_f64(), "rows": self.x_train.len() }),
        )?;
        Ok(())
    }

    /// Computes train (and validation) RMSE and logs both.
    pub fn evaluate(&self) -> Result<EvaluationReport> {
        let rmse_train = self.compute_rmse(&self.x_train, self.y_train.view())?;
        self.tracking.log_metric("rmse_train", rmse_train)?;

        let rmse_val = match &self.validation {
            Some(validation) => {
                self.preview_predictions(validation)?;
                let rmse_val = self.compute_rmse(&validation.trips, validation.target.view())?;
                self.tracking.log_metric("rmse_val", rmse_val)?;
                Some(rmse_val)
            }
            None => None,
        };

        let report = EvaluationReport {
            rmse_train,
            rmse_val,
        };
        self.telemetry.log(
            LogLevel::Info,
            &match rmse_val {
                Some(val) => format!("rmse train: {rmse_train} || rmse val: {val}"),
                None => format!("rmse train: {rmse_train}"),
            },
            json!(report),
        )?;
        Ok(report)
    }

    fn preview_predictions(&self, validation: &Validation) -> Result<()> {
        let Some(pipeline) = self.fitted_pipeline() else {
            return Err(TrainerError::EmptyPipeline);
        };
        let count = validation.trips.len().min(PREVIEW_ROWS);
        let rows = sample(&mut thread_rng(), validation.trips.len(), count).into_vec();
        let picked: Vec<Trip> = rows.iter().map(|&row| validation.trips[row].clone()).collect();
        let predicted = pipeline.predict(&picked)?;
        let preview: Vec<_> = rows
            .iter()
            .zip(predicted.iter())
            .map(|(&row, pred)| json!({ "fare_amount": validation.target[row], "pred": pred }))
            .collect();
        self.telemetry
            .log(LogLevel::Debug, "validation sample", json!(preview))?;
        Ok(())
    }

    /// RMSE of the fitted pipeline on `trips`, rounded to 3 decimals.
    pub fn compute_rmse(&self, trips: &[Trip], target: ArrayView1<'_, f64>) -> Result<f64> {
        let pipeline = self.fitted_pipeline().ok_or(TrainerError::EmptyPipeline)?;
        let predicted = pipeline.predict(trips)?;
        metrics::compute_rmse(predicted.view(), target)
    }

    /// Writes the fitted pipeline locally and uploads it when `upload` is set.
    pub fn save_model(&self, upload: bool) -> Result<SavedModel> {
        let pipeline = self.fitted_pipeline().ok_or(TrainerError::EmptyPipeline)?;
        let saved = persistence::save_model(pipeline, &self.config.env, upload)?;
        self.telemetry.log(
            LogLevel::Info,
            &format!("{} saved locally", persistence::MODEL_FILE),
            json!({
                "local_path": saved.local_path.display().to_string(),
                "remote_uri": &saved.remote_uri,
            }),
        )?;
        Ok(saved)
    }

    /// Logs `estimator_name` and every hyperparameter of the held estimator.
    pub fn log_estimator_params(&self) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(TrainerError::EmptyPipeline)?;
        self.tracking
            .log_param("estimator_name", pipeline.estimator.kind().model_name())?;
        for (name, value) in pipeline.estimator.params() {
            self.tracking.log_param(&name, param_text(&value))?;
        }
        Ok(())
    }

    fn fitted_pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref().filter(|pipeline| pipeline.is_fitted())
    }

    /// Options the trainer was built with.
    #[must_use]
    pub const fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Tracking session receiving params and metrics.
    #[must_use]
    pub const fn tracking(&self) -> &TrackingSession {
        &self.tracking
    }

    /// Held pipeline, fitted or not.
    #[must_use]
    pub const fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// Result of the last search, if one ran.
    #[must_use]
    pub const fn search_summary(&self) -> Option<&SearchSummary> {
        self.search_summary.as_ref()
    }

    /// Rows fitted on.
    #[must_use]
    pub fn train_rows(&self) -> usize {
        self.x_train.len()
    }

    /// Rows held out for validation.
    #[must_use]
    pub fn validation_rows(&self) -> usize {
        self.validation.as_ref().map_or(0, |val| val.trips.len())
    }
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn take_rows(trips: &[Trip], target: ArrayView1<'_, f64>, rows: &[usize]) -> (Vec<Trip>, Array1<f64>) {
    let picked = rows.iter().map(|&row| trips[row].clone()).collect();
    let values = rows.iter().map(|&row| target[row]).collect();
    (picked, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DistanceType,
        data::fixtures::{synthetic_dataset, synthetic_trips},
        tracking::{FileTracker, RunStatus},
    };
    use tempfile::tempdir;

    fn linear_config() -> TrainerConfig {
        TrainerConfig {
            estimator: "Linear".into(),
            feateng: vec!["distance".into()],
            split: true,
            random_state: Some(7),
            n_jobs: 2,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn split_holds_out_ceil_fifteen_percent() {
        let (trips, y) = synthetic_trips(101, 3);
        let rows = trips.len();
        let trainer =
            Trainer::from_parts(trips, y, linear_config(), TrackingSession::Disabled).unwrap();
        let expected = (0.15 * rows as f64).ceil() as usize;
        assert_eq!(trainer.validation_rows(), expected);
        assert_eq!(trainer.train_rows() + trainer.validation_rows(), rows);
    }

    #[test]
    fn no_split_keeps_every_row() {
        let (trips, y) = synthetic_trips(40, 3);
        let rows = trips.len();
        let config = TrainerConfig {
            split: false,
            ..linear_config()
        };
        let trainer = Trainer::from_parts(trips, y, config, TrackingSession::Disabled).unwrap();
        assert_eq!(trainer.train_rows(), rows);
        assert_eq!(trainer.validation_rows(), 0);
    }

    #[test]
    fn evaluating_before_training_is_rejected() {
        let (trips, y) = synthetic_trips(50, 4);
        let mut trainer =
            Trainer::from_parts(trips, y, linear_config(), TrackingSession::Disabled).unwrap();
        assert!(matches!(trainer.evaluate(), Err(TrainerError::EmptyPipeline)));
        trainer.set_pipeline().unwrap();
        assert!(matches!(trainer.evaluate(), Err(TrainerError::EmptyPipeline)));
        assert!(matches!(trainer.save_model(false), Err(TrainerError::EmptyPipeline)));
    }

    #[test]
    fn linear_distance_model_trains_end_to_end() {
        let dataset = synthetic_dataset(1000, 11);
        let dataset = crate::data::clean::clean_df(dataset);
        let mut trainer = Trainer::new(dataset, linear_config(), TrackingSession::Disabled).unwrap();
        trainer.train().unwrap();
        let report = trainer.evaluate().unwrap();
        assert!(report.rmse_train.is_finite() && report.rmse_train >= 0.0);
        let rmse_val = report.rmse_val.unwrap();
        assert!(rmse_val.is_finite() && rmse_val >= 0.0);
    }

    #[test]
    fn grid_search_needs_a_search_space() {
        let (trips, y) = synthetic_trips(60, 5);
        let config = TrainerConfig {
            estimator: "Ridge".into(),
            gridsearch: true,
            ..linear_config()
        };
        let mut trainer = Trainer::from_parts(trips, y, config, TrackingSession::Disabled).unwrap();
        assert!(matches!(
            trainer.train(),
            Err(TrainerError::NoSearchSpace("Ridge"))
        ));
    }

    #[test]
    fn forest_search_logs_best_params_and_metrics() {
        let dir = tempdir().unwrap();
        let backend = FileTracker::new(dir.path()).unwrap();
        let tracking = TrackingSession::open(Box::new(backend), "taxifare_test").unwrap();
        let run_id = tracking.run().unwrap().run_id.clone();

        let (trips, y) = synthetic_trips(120, 8);
        let config = TrainerConfig {
            estimator: "RandomForest".into(),
            gridsearch: true,
            mlflow: true,
            distance_type: DistanceType::Manhattan,
            feateng: vec!["distance".into(), "direction".into()],
            ..linear_config()
        };
        let mut trainer = Trainer::from_parts(trips, y, config, tracking).unwrap();
        trainer.train().unwrap();
        let report = trainer.evaluate().unwrap();
        trainer.log_estimator_params().unwrap();
        trainer.tracking().finish(RunStatus::Finished).unwrap();

        let summary = trainer.search_summary().unwrap();
        assert_eq!(summary.candidates, 8);

        let record = FileTracker::new(dir.path()).unwrap().load_run(&run_id).unwrap();
        assert_eq!(record.params["estimator"], "RandomForest");
        assert_eq!(record.params["estimator_name"], "RandomForestRegressor");
        assert!(record.params.contains_key("best_n_estimators"));
        assert!(record.params.contains_key("cpus"));
        assert!(record.params.contains_key("ram"));
        assert_eq!(record.params["distance_type"], "manhattan");
        assert!(record.metrics.contains_key("train_time"));
        assert!(record.metrics.contains_key("best_cv_score"));
        assert_eq!(record.metrics["rmse_train"], report.rmse_train);
        assert_eq!(record.status, RunStatus::Finished);
    }

    #[test]
    fn pipeline_memory_outlives_the_trainer() {
        let (trips, y) = synthetic_trips(60, 9);
        let config = TrainerConfig {
            pipeline_memory: true,
            ..linear_config()
        };
        let mut trainer = Trainer::from_parts(trips, y, config, TrackingSession::Disabled).unwrap();
        trainer.train().unwrap();
        let dir = trainer
            .pipeline()
            .and_then(Pipeline::memory)
            .map(|memory| memory.dir().to_path_buf())
            .unwrap();
        assert!(dir.exists());
        drop(trainer);
        assert!(dir.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn saved_model_lands_in_output_dir() {
        let dir = tempdir().unwrap();
        let (trips, y) = synthetic_trips(80, 10);
        let mut config = linear_config();
        config.env.output_dir = dir.path().display().to_string();
        let mut trainer = Trainer::from_parts(trips, y, config, TrackingSession::Disabled).unwrap();
        trainer.train().unwrap();
        let saved = trainer.save_model(false).unwrap();
        assert_eq!(saved.local_path, dir.path().join(persistence::MODEL_FILE));
        assert!(saved.remote_uri.is_none());
    }
}
