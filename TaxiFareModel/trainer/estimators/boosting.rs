use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, seq::index::sample, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_xy, param_f64, param_u64, param_usize, tree::RegressionTree};
use crate::error::{Result, TrainerError};

/// Least-squares gradient boosting over shallow regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    /// Boosting stages.
    pub n_estimators: usize,
    /// Shrinkage applied to every stage.
    pub learning_rate: f64,
    /// Depth of each stage tree.
    pub max_depth: usize,
    /// Row fraction drawn (without replacement) per stage.
    pub subsample: f64,
    /// Smallest node that may still be split.
    pub min_samples_split: usize,
    /// Smallest allowed leaf.
    pub min_samples_leaf: usize,
    /// Seed for row subsampling.
    pub random_state: Option<u64>,
    init: Option<f64>,
    stages: Vec<RegressionTree>,
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            subsample: 1.0,
            min_samples_split: 2,
            min_samples_leaf: 1,
            random_state: None,
            init: None,
            stages: Vec::new(),
        }
    }
}

impl GradientBoosting {
    /// Whether `fit` has completed.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.init.is_some()
    }

    pub(crate) fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        const NAME: &str = "GBM";
        match name {
            "n_estimators" => {
                let count = param_usize(NAME, name, value)?;
                if count == 0 {
                    return Err(TrainerError::invalid_param(NAME, name, "must be positive"));
                }
                self.n_estimators = count;
            }
            "learning_rate" => {
                let rate = param_f64(NAME, name, value)?;
                if rate <= 0.0 {
                    return Err(TrainerError::invalid_param(NAME, name, "must be positive"));
                }
                self.learning_rate = rate;
            }
            "max_depth" => self.max_depth = param_usize(NAME, name, value)?.max(1),
            "subsample" => {
                let fraction = param_f64(NAME, name, value)?;
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return Err(TrainerError::invalid_param(NAME, name, "must be in (0, 1]"));
                }
                self.subsample = fraction;
            }
            "min_samples_split" => self.min_samples_split = param_usize(NAME, name, value)?.max(2),
            "min_samples_leaf" => self.min_samples_leaf = param_usize(NAME, name, value)?.max(1),
            "random_state" => {
                self.random_state = if value.is_null() {
                    None
                } else {
                    Some(param_u64(NAME, name, value)?)
                };
            }
            _ => return Err(TrainerError::invalid_param(NAME, name, "unknown parameter")),
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("n_estimators", json!(self.n_estimators)),
            ("learning_rate", json!(self.learning_rate)),
            ("max_depth", json!(self.max_depth)),
            ("subsample", json!(self.subsample)),
            ("min_samples_split", json!(self.min_samples_split)),
            ("min_samples_leaf", json!(self.min_samples_leaf)),
            ("random_state", json!(self.random_state)),
        ]
    }

    /// Fits the stages sequentially on the running residuals.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        check_xy(x, y)?;
        let n_samples = x.nrows();
        let init = y.mean().ok_or(TrainerError::EmptyInput("gradient boosting"))?;
        let mut current = Array1::from_elem(n_samples, init);
        let seed = self
            .random_state
            .unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = SmallRng::seed_from_u64(seed);
        let draw = ((self.subsample * n_samples as f64).round() as usize).clamp(1, n_samples);

        let mut stages = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let residual = &y - &current;
            let rows: Vec<usize> = if draw < n_samples {
                sample(&mut rng, n_samples, draw).into_vec()
            } else {
                (0..n_samples).collect()
            };
            let mut tree = RegressionTree {
                max_depth: Some(self.max_depth),
                min_samples_split: self.min_samples_split,
                min_samples_leaf: self.min_samples_leaf,
                ..RegressionTree::default()
            };
            tree.fit_rows(x, residual.view(), &rows, &mut rng)?;
            current.scaled_add(self.learning_rate, &tree.predict(x)?);
            stages.push(tree);
        }
        self.init = Some(init);
        self.stages = stages;
        Ok(())
    }

    /// Predicts targets.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let init = self.init.ok_or(TrainerError::NotFitted("GradientBoostingRegressor"))?;
        let mut prediction = Array1::from_elem(x.nrows(), init);
        for stage in &self.stages {
            prediction.scaled_add(self.learning_rate, &stage.predict(x)?);
        }
        Ok(prediction)
    }
}
