use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{param_bool, param_f64, param_usize, check_xy};
use crate::error::{Result, TrainerError};

/// Learned coefficients shared by the linear models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// Per-feature weights.
    pub coef: Array1<f64>,
    /// Bias term.
    pub intercept: f64,
}

impl LinearFit {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.coef.len() {
            return Err(TrainerError::shape(
                format!("{} features", self.coef.len()),
                format!("{} features", x.ncols()),
            ));
        }
        Ok(x.dot(&self.coef) + self.intercept)
    }
}

struct Centered {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

fn center(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, fit_intercept: bool) -> Centered {
    if !fit_intercept {
        return Centered {
            x: x.to_owned(),
            y: y.to_owned(),
            x_mean: Array1::zeros(x.ncols()),
            y_mean: 0.0,
        };
    }
    let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
    let y_mean = y.mean().unwrap_or(0.0);
    Centered {
        x: &x - &x_mean,
        y: &y - y_mean,
        x_mean,
        y_mean,
    }
}

impl Centered {
    fn finish(self, coef: Array1<f64>) -> LinearFit {
        let intercept = self.y_mean - self.x_mean.dot(&coef);
        LinearFit { coef, intercept }
    }
}

/// Solves `(XᵀX + alpha·I) w = Xᵀy` by Cholesky factorisation.
fn solve_penalized(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let mut gram = x.t().dot(x);
    let rhs = x.t().dot(y);
    let n = gram.nrows();
    for i in 0..n {
        gram[[i, i]] += alpha;
    }

    let mut lower = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = gram[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(TrainerError::Numerical(format!(
                        "normal equations are not positive definite at column {i}"
                    )));
                }
                lower[[i, i]] = sum.sqrt();
            } else {
                lower[[i, j]] = sum / lower[[j, j]];
            }
        }
    }

    let mut forward = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= lower[[i, k]] * forward[k];
        }
        forward[i] = sum / lower[[i, i]];
    }
    let mut solution = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = forward[i];
        for k in i + 1..n {
            sum -= lower[[k, i]] * solution[k];
        }
        solution[i] = sum / lower[[i, i]];
    }
    Ok(solution)
}

/// Ordinary least squares.
///
/// Collinear designs (one-hot groups next to an intercept) are resolved with a
/// vanishing ridge term, which converges to the minimum-norm solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    /// Learn a bias term.
    pub fit_intercept: bool,
    fitted: Option<LinearFit>,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            fitted: None,
        }
    }
}

impl LinearRegression {
    /// Whether `fit` has completed.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub(crate) fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "fit_intercept" => self.fit_intercept = param_bool("Linear", name, value)?,
            _ => return Err(TrainerError::invalid_param("Linear", name, "unknown parameter")),
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, Value)> {
        vec![("fit_intercept", json!(self.fit_intercept))]
    }

    /// Fits the coefficients.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        check_xy(x, y)?;
        let centered = center(x, y, self.fit_intercept);
        let scale = centered
            .x
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .max(1.0)
            / x.ncols().max(1) as f64;
        let coef = solve_penalized(&centered.x, &centered.y, scale * 1e-10)?;
        self.fitted = Some(centered.finish(coef));
        Ok(())
    }

    /// Predicts targets.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.fitted
            .as_ref()
            .ok_or(TrainerError::NotFitted("LinearRegression"))?
            .predict(x)
    }

    /// Learned coefficients.
    #[must_use]
    pub const fn coefficients(&self) -> Option<&LinearFit> {
        self.fitted.as_ref()
    }
}

/// L2-penalised least squares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ridge {
    /// Penalty strength.
    pub alpha: f64,
    /// Learn an unpenalised bias term.
    pub fit_intercept: bool,
    fitted: Option<LinearFit>,
}

impl Default for Ridge {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
            fitted: None,
        }
    }
}

impl Ridge {
    /// Whether `fit` has completed.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub(crate) fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "alpha" => {
                let alpha = param_f64("Ridge", name, value)?;
                if alpha < 0.0 {
                    return Err(TrainerError::invalid_param("Ridge", name, "must be >= 0"));
                }
                self.alpha = alpha;
            }
            "fit_intercept" => self.fit_intercept = param_bool("Ridge", name, value)?,
            _ => return Err(TrainerError::invalid_param("Ridge", name, "unknown parameter")),
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("alpha", json!(self.alpha)),
            ("fit_intercept", json!(self.fit_intercept)),
        ]
    }

    /// Fits the coefficients.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        check_xy(x, y)?;
        let centered = center(x, y, self.fit_intercept);
        let alpha = if self.alpha > 0.0 { self.alpha } else { 1e-10 };
        let coef = solve_penalized(&centered.x, &centered.y, alpha)?;
        self.fitted = Some(centered.finish(coef));
        Ok(())
    }

    /// Predicts targets.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.fitted
            .as_ref()
            .ok_or(TrainerError::NotFitted("Ridge"))?
            .predict(x)
    }
}

/// L1-penalised least squares fitted by cyclic coordinate descent.
///
/// Minimises `1/(2n)·‖y − Xw − b‖² + alpha·‖w‖₁`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lasso {
    /// Penalty strength.
    pub alpha: f64,
    /// Learn an unpenalised bias term.
    pub fit_intercept: bool,
    /// Coordinate-descent sweeps.
    pub max_iter: usize,
    /// Stop once the largest weight update falls below this.
    pub tol: f64,
    fitted: Option<LinearFit>,
}

impl Default for Lasso {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
            max_iter: 1000,
            tol: 1e-4,
            fitted: None,
        }
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

impl Lasso {
    /// Whether `fit` has completed.
    #[must_use]
    pub const fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub(crate) fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "alpha" => {
                let alpha = param_f64("Lasso", name, value)?;
                if alpha < 0.0 {
                    return Err(TrainerError::invalid_param("Lasso", name, "must be >= 0"));
                }
                self.alpha = alpha;
            }
            "fit_intercept" => self.fit_intercept = param_bool("Lasso", name, value)?,
            "max_iter" => self.max_iter = param_usize("Lasso", name, value)?,
            "tol" => self.tol = param_f64("Lasso", name, value)?,
            _ => return Err(TrainerError::invalid_param("Lasso", name, "unknown parameter")),
        }
        Ok(())
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("alpha", json!(self.alpha)),
            ("fit_intercept", json!(self.fit_intercept)),
            ("max_iter", json!(self.max_iter)),
            ("tol", json!(self.tol)),
        ]
    }

    /// Fits the coefficients.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        check_xy(x, y)?;
        let centered = center(x, y, self.fit_intercept);
        let (n, p) = centered.x.dim();
        let n_f = n as f64;
        let column_norms: Vec<f64> = centered
            .x
            .columns()
            .into_iter()
            .map(|column| column.dot(&column) / n_f)
            .collect();

        let mut coef = Array1::<f64>::zeros(p);
        let mut residual = centered.y.clone();
        for _ in 0..self.max_iter {
            let mut max_update = 0.0f64;
            let mut max_coef = 0.0f64;
            for j in 0..p {
                if column_norms[j] == 0.0 {
                    continue;
                }
                let column = centered.x.column(j);
                let old = coef[j];
                let rho = column.dot(&residual) / n_f + column_norms[j] * old;
                let new = soft_threshold(rho, self.alpha) / column_norms[j];
                if new != old {
                    residual.scaled_add(old - new, &column);
                    coef[j] = new;
                }
                max_update = max_update.max((new - old).abs());
                max_coef = max_coef.max(new.abs());
            }
            if max_update <= self.tol * max_coef.max(1e-12) || max_update == 0.0 {
                break;
            }
        }
        self.fitted = Some(centered.finish(coef));
        Ok(())
    }

    /// Predicts targets.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        self.fitted
            .as_ref()
            .ok_or(TrainerError::NotFitted("Lasso"))?
            .predict(x)
    }

    /// Learned coefficients.
    #[must_use]
    pub const fn coefficients(&self) -> Option<&LinearFit> {
        self.fitted.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn line() -> (Array2<f64>, Array1<f64>) {
        let x = array![[1.0, 0.5], [2.0, -1.0], [3.0, 2.0], [4.0, 0.0], [5.0, 1.5]];
        let y = x.column(0).mapv(|v| 3.0 * v) + x.column(1).mapv(|v| -2.0 * v) + 1.0;
        (x, y)
    }

    #[test]
    fn ols_recovers_exact_coefficients() {
        let (x, y) = line();
        let mut model = LinearRegression::default();
        model.fit(x.view(), y.view()).unwrap();
        let fit = model.coefficients().unwrap();
        assert_abs_diff_eq!(fit.coef[0], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.coef[1], -2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.intercept, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn ols_handles_collinear_one_hot_columns() {
        let x = array![[1.0, 0.0, 2.0], [0.0, 1.0, 1.0], [1.0, 0.0, 4.0], [0.0, 1.0, 3.0]];
        let y = array![5.0, 3.0, 9.0, 7.0];
        let mut model = LinearRegression::default();
        model.fit(x.view(), y.view()).unwrap();
        let pred = model.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-4);
        }
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let (x, y) = line();
        let mut weak = Ridge::default();
        weak.set_param("alpha", &json!(0.001)).unwrap();
        weak.fit(x.view(), y.view()).unwrap();
        let mut strong = Ridge::default();
        strong.set_param("alpha", &json!(100.0)).unwrap();
        strong.fit(x.view(), y.view()).unwrap();
        let norm = |model: &Ridge| {
            model
                .fitted
                .as_ref()
                .map(|fit| fit.coef.dot(&fit.coef))
                .unwrap()
        };
        assert!(norm(&strong) < norm(&weak));
        assert!(strong.set_param("alpha", &json!(-1.0)).is_err());
    }

    #[test]
    fn lasso_zeroes_weak_features_under_heavy_penalty() {
        let (x, y) = line();
        let mut model = Lasso::default();
        model.set_param("alpha", &json!(1000.0)).unwrap();
        model.fit(x.view(), y.view()).unwrap();
        let fit = model.coefficients().unwrap();
        assert!(fit.coef.iter().all(|w| *w == 0.0));
        assert_abs_diff_eq!(fit.intercept, y.mean().unwrap(), epsilon = 1e-12);

        let mut light = Lasso::default();
        light.set_param("alpha", &json!(0.0001)).unwrap();
        light.fit(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(light.coefficients().unwrap().coef[0], 3.0, epsilon = 1e-2);
        assert!(light.set_param("l1_ratio", &json!(0.5)).is_err());
    }
}
