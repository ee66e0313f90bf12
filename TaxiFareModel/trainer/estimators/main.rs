//! Regressors selectable by name, with their parameter plumbing.

/// Ordinary least squares, ridge and lasso.
pub mod linear;
/// CART regression tree shared by the ensembles.
pub mod tree;
/// Random forest regressor.
pub mod forest;
/// Gradient boosting regressor.
pub mod boosting;

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, TrainerError};

pub use boosting::GradientBoosting;
pub use forest::{MaxFeatures, RandomForest};
pub use linear::{Lasso, LinearRegression, Ridge};
pub use tree::RegressionTree;

/// Candidate values per hyperparameter.
pub type SearchSpace = IndexMap<String, Vec<Value>>;

/// Supported estimator names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    /// L1-penalised linear model.
    Lasso,
    /// L2-penalised linear model.
    Ridge,
    /// Ordinary least squares.
    Linear,
    /// Gradient boosting.
    Gbm,
    /// Random forest.
    RandomForest,
}

impl EstimatorKind {
    /// Configuration name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lasso => "Lasso",
            Self::Ridge => "Ridge",
            Self::Linear => "Linear",
            Self::Gbm => "GBM",
            Self::RandomForest => "RandomForest",
        }
    }

    /// Model type name, as reported in logs.
    #[must_use]
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Lasso => "Lasso",
            Self::Ridge => "Ridge",
            Self::Linear => "LinearRegression",
            Self::Gbm => "GradientBoostingRegressor",
            Self::RandomForest => "RandomForestRegressor",
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = TrainerError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "Lasso" => Ok(Self::Lasso),
            "Ridge" => Ok(Self::Ridge),
            "Linear" | "LinearRegression" => Ok(Self::Linear),
            "GBM" | "GradientBoosting" | "GradientBoostingRegressor" => Ok(Self::Gbm),
            "RandomForest" | "RandomForestRegressor" => Ok(Self::RandomForest),
            other => Err(TrainerError::UnknownEstimator(other.to_string())),
        }
    }
}

/// Unfitted or fitted regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Estimator {
    /// Lasso.
    Lasso(Lasso),
    /// Ridge.
    Ridge(Ridge),
    /// Ordinary least squares.
    Linear(LinearRegression),
    /// Gradient boosting.
    Gbm(GradientBoosting),
    /// Random forest.
    RandomForest(RandomForest),
}

impl Estimator {
    /// Fresh estimator with library defaults.
    #[must_use]
    pub fn new(kind: EstimatorKind) -> Self {
        match kind {
            EstimatorKind::Lasso => Self::Lasso(Lasso::default()),
            EstimatorKind::Ridge => Self::Ridge(Ridge::default()),
            EstimatorKind::Linear => Self::Linear(LinearRegression::default()),
            EstimatorKind::Gbm => Self::Gbm(GradientBoosting::default()),
            EstimatorKind::RandomForest => Self::RandomForest(RandomForest::default()),
        }
    }

    /// Kind of this estimator.
    #[must_use]
    pub const fn kind(&self) -> EstimatorKind {
        match self {
            Self::Lasso(_) => EstimatorKind::Lasso,
            Self::Ridge(_) => EstimatorKind::Ridge,
            Self::Linear(_) => EstimatorKind::Linear,
            Self::Gbm(_) => EstimatorKind::Gbm,
            Self::RandomForest(_) => EstimatorKind::RandomForest,
        }
    }

    /// Sets one hyperparameter.
    pub fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match self {
            Self::Lasso(model) => model.set_param(name, value),
            Self::Ridge(model) => model.set_param(name, value),
            Self::Linear(model) => model.set_param(name, value),
            Self::Gbm(model) => model.set_param(name, value),
            Self::RandomForest(model) => model.set_param(name, value),
        }
    }

    /// Sets every listed hyperparameter, stopping at the first rejection.
    pub fn set_params(&mut self, params: &IndexMap<String, Value>) -> Result<()> {
        params
            .iter()
            .try_for_each(|(name, value)| self.set_param(name, value))
    }

    /// Current hyperparameters.
    #[must_use]
    pub fn params(&self) -> IndexMap<String, Value> {
        let pairs = match self {
            Self::Lasso(model) => model.params(),
            Self::Ridge(model) => model.params(),
            Self::Linear(model) => model.params(),
            Self::Gbm(model) => model.params(),
            Self::RandomForest(model) => model.params(),
        };
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Fits on a feature matrix.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        match self {
            Self::Lasso(model) => model.fit(x, y),
            Self::Ridge(model) => model.fit(x, y),
            Self::Linear(model) => model.fit(x, y),
            Self::Gbm(model) => model.fit(x, y),
            Self::RandomForest(model) => model.fit(x, y),
        }
    }

    /// Whether the regressor has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        match self {
            Self::Lasso(model) => model.is_fitted(),
            Self::Ridge(model) => model.is_fitted(),
            Self::Linear(model) => model.is_fitted(),
            Self::Gbm(model) => model.is_fitted(),
            Self::RandomForest(model) => model.is_fitted(),
        }
    }

    /// Predicts targets for a feature matrix.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        match self {
            Self::Lasso(model) => model.predict(x),
            Self::Ridge(model) => model.predict(x),
            Self::Linear(model) => model.predict(x),
            Self::Gbm(model) => model.predict(x),
            Self::RandomForest(model) => model.predict(x),
        }
    }

    /// Default search space of the estimator, if it has one.
    #[must_use]
    pub fn default_search_space(&self) -> Option<SearchSpace> {
        match self {
            Self::RandomForest(_) => {
                let mut space = SearchSpace::new();
                space.insert("max_features".into(), vec![json!("auto"), json!("sqrt")]);
                space.insert(
                    "n_estimators".into(),
                    (60..220).step_by(40).map(|count| json!(count)).collect(),
                );
                Some(space)
            }
            _ => None,
        }
    }
}

/// Builds an estimator by name, applies `params` and returns its search space.
pub fn get_estimator(
    name: &str,
    params: &IndexMap<String, Value>,
) -> Result<(Estimator, Option<SearchSpace>)> {
    let kind: EstimatorKind = name.parse()?;
    let mut estimator = Estimator::new(kind);
    estimator.set_params(params)?;
    let space = estimator.default_search_space();
    Ok((estimator, space))
}

pub(crate) fn check_xy(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(TrainerError::EmptyInput("training rows"));
    }
    if x.nrows() != y.len() {
        return Err(TrainerError::shape(
            format!("{} targets", x.nrows()),
            format!("{} targets", y.len()),
        ));
    }
    if let Some(idx) = y.iter().position(|value| !value.is_finite()) {
        return Err(TrainerError::Data(format!("target {idx} is not finite")));
    }
    Ok(())
}

pub(crate) fn param_f64(estimator: &'static str, name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .filter(|number| number.is_finite())
        .ok_or_else(|| TrainerError::invalid_param(estimator, name, format!("expected a number, got {value}")))
}

pub(crate) fn param_u64(estimator: &'static str, name: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        TrainerError::invalid_param(
            estimator,
            name,
            format!("expected a non-negative integer, got {value}"),
        )
    })
}

pub(crate) fn param_usize(estimator: &'static str, name: &str, value: &Value) -> Result<usize> {
    let raw = param_u64(estimator, name, value)?;
    usize::try_from(raw)
        .map_err(|_| TrainerError::invalid_param(estimator, name, format!("{raw} is out of range")))
}

pub(crate) fn param_bool(estimator: &'static str, name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        TrainerError::invalid_param(estimator, name, format!("expected a boolean, got {value}"))
    })
}
