use thiserror::Error;

/// Result alias used across the trainer crate.
pub type Result<T, E = TrainerError> = std::result::Result<T, E>;

/// Errors raised while loading data, fitting, tracking or persisting models.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// Evaluation requested before a pipeline was fitted.
    #[error("Cannot evaluate an empty pipeline")]
    EmptyPipeline,
    /// Estimator name not among the supported variants.
    #[error("unknown estimator {0:?} (expected one of Lasso, Ridge, Linear, GBM, RandomForest)")]
    UnknownEstimator(String),
    /// Estimator parameter rejected by the model.
    #[error("invalid parameter {name:?} for {estimator}: {reason}")]
    InvalidParameter {
        /// Estimator receiving the parameter.
        estimator: &'static str,
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Search requested for an estimator without a search space.
    #[error("estimator {0} has no hyperparameter search space")]
    NoSearchSpace(&'static str),
    /// Distance metric name not recognised.
    #[error("unknown distance type {0:?} (expected haversine, euclidian or manhattan)")]
    UnknownDistance(String),
    /// Every configured feature block was filtered out.
    #[error("no feature blocks selected from {0:?}")]
    NoFeatureBlocks(Vec<String>),
    /// A block referenced a column the trip rows do not carry.
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    /// Coordinate outside the geohash range.
    #[error("geohash error: {0}")]
    Geohash(#[from] geohash::GeohashError),
    /// Matrix/vector dimensions disagree.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        actual: String,
    },
    /// Operation received no rows.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),
    /// Model used before `fit`.
    #[error("{0} is not fitted")]
    NotFitted(&'static str),
    /// Linear system could not be solved.
    #[error("numerical error: {0}")]
    Numerical(String),
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// Data source missing or malformed.
    #[error("data error: {0}")]
    Data(String),
    /// Tracking backend failure.
    #[error("tracking error: {0}")]
    Tracking(String),
    /// Object store failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Telemetry sink failure.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] anyhow::Error),
    /// Worker pool could not be created.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Model artifact encoding failure.
    #[error("artifact encoding error: {0}")]
    Artifact(#[from] bincode::Error),
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// CSV reader failure.
    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl TrainerError {
    pub(crate) fn invalid_param(
        estimator: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            estimator,
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Shape {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
