use std::fmt;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_xy, param_bool, param_u64, param_usize, tree::RegressionTree};
use crate::error::{Result, TrainerError};

/// Features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Every feature (the regression default).
    Auto,
    /// `ceil(sqrt(n_features))`.
    Sqrt,
    /// `ceil(log2(n_features))`.
    Log2,
    /// Fixed count, capped at `n_features`.
    Fixed(usize),
    /// Fraction of `n_features`, rounded up.
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolves the strategy against a feature count.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        match self {
            Self::Auto => n_features,
            Self::Sqrt => n.sqrt().ceil() as usize,
            Self::Log2 => n.log2().ceil() as usize,
            Self::Fixed(count) => count.min(n_features),
            Self::Fraction(fraction) => (n * fraction).ceil() as usize,
        }
        .clamp(1, n_features.max(1))
    }

    fn parse(value: &Value) -> Result<Self> {
        let invalid = || {
            TrainerError::invalid_param(
                "RandomForest",
                "max_features",
                format!("expected \"auto\", \"sqrt\", \"log2\", an integer or a fraction, got {value}"),
            )
        };
        match value {
            Value::String(name) => match name.as_str() {
                "auto" => Ok(Self::Auto),
                "sqrt" => Ok(Self::Sqrt),
                "log2" => Ok(Self::Log2),
                _ => Err(invalid()),
            },
            Value::Null => Ok(Self::Auto),
            Value::Number(number) => {
                if let Some(count) = number.as_u64() {
                    usize::try_from(count)
                        .ok()
                        .filter(|count| *count > 0)
                        .map(Self::Fixed)
                        .ok_or_else(invalid)
                } else {
                    number
                        .as_f64()
                        .filter(|fraction| *fraction > 0.0 && *fraction <= 1.0)
                        .map(Self::Fraction)
                        .ok_or_else(invalid)
                }
            }
            _ => Err(invalid()),
        }
    }

    fn to_value(self) -> Value {
        match self {
            Self::Auto => json!("auto"),
            Self::Sqrt => json!("sqrt"),
            Self::Log2 => json!("log2"),
            Self::Fixed(count) => json!(count),
            Self::Fraction(fraction) => json!(fraction),
        }
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            Value::String(name) => f.write_str(&name),
            other => write!(f, "{other}"),
        }
    }
}

/// Bagged ensemble of regression trees fitted in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    /// Number of trees.
    pub n_estimators: usize,
    /// Features examined per split.
    pub max_features: MaxFeatures,
    /// Depth limit per tree.
    pub max_depth: Option<usize>,
    /// Smallest node that may still be split.
    pub min_samples_split: usize,
    /// Smallest allowed leaf.
    pub min_samples_leaf: usize,
    /// Draw each tree's rows with replacement.
    pub bootstrap: bool,
    /// Base seed; tree `i` uses `seed + i`.
    pub random_state: Option<u64>,
    trees: Vec<RegressionTree>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_features: MaxFeatures::Auto,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            random_state: None,
            trees: Vec::new(),
        }
    }
}

impl RandomForest {
    /// Whether `fit` has completed.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub(crate) fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        const NAME: &str = "RandomForest";
        match name {
            "n_estimators" => {
                let count = param_usize(NAME, name, value)?;
                if count == 0 {
                    return Err(TrainerError::invalid_param(NAME, name, "must be positive"));
                }
                self.n_estimators = count;
            }
            "max_features" => self.max_features = MaxFeatures::parse(value)?,
            "max_depth" => {
                self.max_depth = if value.is_null() {
                    None
                } else {
                    Some(param_usize(NAME, name, value)?)
                };
            }
            "min_samples_split" => self.min_samples_split = param_usize(NAME, name, value)?.max(2),
            "min_samples_leaf" => self.min_samples_leaf = param_usize(NAME, name, value)?.max(1),
            "bootstrap" => self.bootstrap = param_bool(NAME, name, value)?,
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
            ("max_features", self.max_features.to_value()),
            ("max_depth", json!(self.max_depth)),
            ("min_samples_split", json!(self.min_samples_split)),
            ("min_samples_leaf", json!(self.min_samples_leaf)),
            ("bootstrap", json!(self.bootstrap)),
            ("random_state", json!(self.random_state)),
        ]
    }

    /// Fits every tree on its own bootstrap sample, in the current rayon pool.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        check_xy(x, y)?;
        let n_samples = x.nrows();
        let max_features = self.max_features.resolve(x.ncols());
        let base_seed = self
            .random_state
            .unwrap_or_else(|| rand::thread_rng().gen());

        let trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = SmallRng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let rows: Vec<usize> = if self.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                let mut tree = RegressionTree {
                    max_depth: self.max_depth,
                    min_samples_split: self.min_samples_split,
                    min_samples_leaf: self.min_samples_leaf,
                    max_features: Some(max_features),
                    ..RegressionTree::default()
                };
                tree.fit_rows(x, y, &rows, &mut rng)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;
        self.trees = trees;
        Ok(())
    }

    /// Averages the tree predictions.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(TrainerError::NotFitted("RandomForestRegressor"));
        }
        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;
        let mut total = Array1::<f64>::zeros(x.nrows());
        for prediction in &per_tree {
            total += prediction;
        }
        Ok(total / per_tree.len() as f64)
    }

    /// Number of fitted trees.
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 3), |(row, col)| ((row * (col + 3)) % 17) as f64);
        let y = x.column(0).mapv(|v| 2.0 * v) + x.column(1);
        (x, y)
    }

    #[test]
    fn seeded_forest_is_reproducible() {
        let (x, y) = data();
        let mut first = RandomForest::default();
        first.set_param("n_estimators", &json!(12)).unwrap();
        first.set_param("random_state", &json!(7)).unwrap();
        let mut second = first.clone();
        first.fit(x.view(), y.view()).unwrap();
        second.fit(x.view(), y.view()).unwrap();
        assert_eq!(first.tree_count(), 12);
        assert_eq!(
            first.predict(x.view()).unwrap(),
            second.predict(x.view()).unwrap()
        );
    }

    #[test]
    fn forest_fits_training_data_closely() {
        let (x, y) = data();
        let mut forest = RandomForest::default();
        forest.set_param("n_estimators", &json!(20)).unwrap();
        forest.set_param("max_features", &json!("sqrt")).unwrap();
        forest.set_param("random_state", &json!(1)).unwrap();
        forest.fit(x.view(), y.view()).unwrap();
        let pred = forest.predict(x.view()).unwrap();
        let mse = (&pred - &y).mapv(|d| d * d).mean().unwrap();
        let var = y.var(0.0);
        assert!(mse < 0.2 * var, "mse {mse} var {var}");
    }

    #[test]
    fn max_features_strategies_resolve() {
        assert_eq!(MaxFeatures::Auto.resolve(16), 16);
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Sqrt.resolve(17), 5);
        assert_eq!(MaxFeatures::Fixed(40).resolve(16), 16);
        assert_eq!(MaxFeatures::parse(&json!("sqrt")).unwrap(), MaxFeatures::Sqrt);
        assert!(MaxFeatures::parse(&json!("half")).is_err());
        assert_eq!(MaxFeatures::Sqrt.to_string(), "sqrt");
    }
}
