use ndarray::ArrayView1;

use crate::error::{Result, TrainerError};

fn check_lengths(predictions: ArrayView1<'_, f64>, actual: ArrayView1<'_, f64>) -> Result<()> {
    if predictions.is_empty() {
        return Err(TrainerError::EmptyInput("predictions"));
    }
    if predictions.len() != actual.len() {
        return Err(TrainerError::shape(
            format!("{} targets", predictions.len()),
            format!("{} targets", actual.len()),
        ));
    }
    Ok(())
}

/// Computes mean squared error between predictions and labels.
pub fn mean_squared_error(
    predictions: ArrayView1<'_, f64>,
    actual: ArrayView1<'_, f64>,
) -> Result<f64> {
    check_lengths(predictions, actual)?;
    let total: f64 = predictions
        .iter()
        .zip(actual.iter())
        .map(|(pred, label)| (pred - label).powi(2))
        .sum();
    Ok(total / predictions.len() as f64)
}

/// Root-mean-squared error rounded to three decimals.
pub fn compute_rmse(predictions: ArrayView1<'_, f64>, actual: ArrayView1<'_, f64>) -> Result<f64> {
    let rmse = mean_squared_error(predictions, actual)?.sqrt();
    Ok(round_to(rmse, 3))
}

/// Coefficient of determination, the default regressor score.
///
/// A constant target yields `1.0` for a perfect fit and `0.0` otherwise.
pub fn r2_score(predictions: ArrayView1<'_, f64>, actual: ArrayView1<'_, f64>) -> Result<f64> {
    check_lengths(predictions, actual)?;
    let mean = actual.sum() / actual.len() as f64;
    let residual: f64 = predictions
        .iter()
        .zip(actual.iter())
        .map(|(pred, label)| (label - pred).powi(2))
        .sum();
    let total: f64 = actual.iter().map(|label| (label - mean).powi(2)).sum();
    if total == 0.0 {
        return Ok(if residual == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - residual / total)
}

/// Rounds half away from zero to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn rmse_of_identical_vectors_is_zero() {
        let y = array![3.5, 7.0, 12.25];
        assert_eq!(compute_rmse(y.view(), y.view()).unwrap(), 0.0);
    }

    #[test]
    fn rmse_matches_formula_and_rounds() {
        let pred = array![1.0, 2.0, 4.0];
        let actual = array![1.5, 2.0, 3.0];
        let expected = ((0.25 + 0.0 + 1.0) / 3.0f64).sqrt();
        let rmse = compute_rmse(pred.view(), actual.view()).unwrap();
        assert_eq!(rmse, round_to(expected, 3));
        assert_eq!(rmse, 0.645);
        assert!(rmse >= 0.0);
    }

    #[test]
    fn rmse_rejects_mismatched_lengths() {
        let pred = array![1.0, 2.0];
        let actual = array![1.0];
        assert!(matches!(
            compute_rmse(pred.view(), actual.view()),
            Err(TrainerError::Shape { .. })
        ));
        let empty = ndarray::Array1::<f64>::zeros(0);
        assert!(matches!(
            compute_rmse(empty.view(), empty.view()),
            Err(TrainerError::EmptyInput(_))
        ));
    }

    #[test]
    fn r2_scores_perfect_and_mean_predictions() {
        let actual = array![1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(r2_score(actual.view(), actual.view()).unwrap(), 1.0);
        let mean = array![2.5, 2.5, 2.5, 2.5];
        assert_abs_diff_eq!(r2_score(mean.view(), actual.view()).unwrap(), 0.0);
    }
}
