#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Taxi fare regression trainer: trip data access, feature pipeline, estimators,
//! randomized search, experiment tracking and model persistence.

/// Job options and deployment constants.
#[path = "../config.rs"]
pub mod config;

/// Error type shared by every component.
#[path = "../error.rs"]
pub mod error;

/// Telemetry helpers for structured job logs.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Regression metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Host resource probing.
#[path = "../machine.rs"]
pub mod machine;

/// Trip records and data access.
#[path = "../data/main.rs"]
pub mod data;

/// Feature engineering blocks and their composition.
#[path = "../features/main.rs"]
pub mod features;

/// Regressors.
#[path = "../estimators/main.rs"]
pub mod estimators;

/// Feature step plus regressor, fitted as a unit.
#[path = "../pipeline.rs"]
pub mod pipeline;

/// Randomized hyperparameter search.
#[path = "../search.rs"]
pub mod search;

/// Experiment tracking backends.
#[path = "../tracking/main.rs"]
pub mod tracking;

/// Object stores receiving model artifacts.
#[path = "../storage/main.rs"]
pub mod storage;

/// Model artifact writing, upload and reload.
#[path = "../persistence.rs"]
pub mod persistence;

/// Training orchestration.
#[path = "../trainer.rs"]
pub mod trainer;

pub use config::{DistanceType, EnvironmentConfig, TrainerConfig};
pub use data::{clean_df, get_data, Dataset, Trip, TripRecord};
pub use error::{Result, TrainerError};
pub use estimators::{get_estimator, Estimator, EstimatorKind, SearchSpace};
pub use features::{FeatureBlock, FeatureComposer};
pub use metrics::compute_rmse;
pub use persistence::{load_model, save_model, ModelArtifact, SavedModel, MODEL_FILE};
pub use pipeline::{Pipeline, PipelineMemory};
pub use search::{RandomizedSearch, SearchOutcome};
pub use telemetry::{TrainingTelemetry, TrainingTelemetryBuilder};
pub use tracking::{RunStatus, TrackingSession};
pub use trainer::{EvaluationReport, SearchSummary, Trainer};
