use std::collections::BTreeSet;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

/// Zero-mean, unit-variance column scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Learns per-column mean and population standard deviation.
    ///
    /// Constant columns keep a scale of `1.0`.
    pub fn fit(values: ArrayView2<'_, f64>) -> Result<Self> {
        if values.nrows() == 0 {
            return Err(TrainerError::EmptyInput("standard scaler"));
        }
        let mean = values
            .mean_axis(Axis(0))
            .ok_or(TrainerError::EmptyInput("standard scaler"))?;
        let scale = values
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Applies the learned scaling.
    pub fn transform(&self, values: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if values.ncols() != self.mean.len() {
            return Err(TrainerError::shape(
                format!("{} columns", self.mean.len()),
                format!("{} columns", values.ncols()),
            ));
        }
        Ok((&values - &self.mean) / &self.scale)
    }

    /// Learned column means.
    #[must_use]
    pub const fn mean(&self) -> &Array1<f64> {
        &self.mean
    }
}

/// One-hot encoding of integer categories; unseen values encode as all zeros.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Vec<Vec<i64>>,
}

impl OneHotEncoder {
    /// Collects the sorted distinct values of every column.
    pub fn fit(values: ArrayView2<'_, i64>) -> Result<Self> {
        if values.nrows() == 0 {
            return Err(TrainerError::EmptyInput("one-hot encoder"));
        }
        let categories = values
            .columns()
            .into_iter()
            .map(|column| {
                column
                    .iter()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect();
        Ok(Self { categories })
    }

    /// Total output width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Categories seen per input column.
    #[must_use]
    pub fn categories(&self) -> &[Vec<i64>] {
        &self.categories
    }

    /// Encodes rows into indicator columns.
    pub fn transform(&self, values: ArrayView2<'_, i64>) -> Result<Array2<f64>> {
        if values.ncols() != self.categories.len() {
            return Err(TrainerError::shape(
                format!("{} columns", self.categories.len()),
                format!("{} columns", values.ncols()),
            ));
        }
        let mut out = Array2::zeros((values.nrows(), self.width()));
        for (row_idx, row) in values.rows().into_iter().enumerate() {
            let mut offset = 0;
            for (value, seen) in row.iter().zip(&self.categories) {
                if let Ok(position) = seen.binary_search(value) {
                    out[[row_idx, offset + position]] = 1.0;
                }
                offset += seen.len();
            }
        }
        Ok(out)
    }
}

/// Feature hashing of string categories into a fixed number of count columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingEncoder {
    n_components: usize,
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self { n_components: 8 }
    }
}

impl HashingEncoder {
    /// Creates an encoder with `n_components` output columns.
    pub fn new(n_components: usize) -> Result<Self> {
        if n_components == 0 {
            return Err(TrainerError::Config(
                "hashing encoder needs at least one component".into(),
            ));
        }
        Ok(Self { n_components })
    }

    /// Output width.
    #[must_use]
    pub const fn n_components(&self) -> usize {
        self.n_components
    }

    /// Bucket index of a single value.
    #[must_use]
    pub fn bucket(&self, value: &str) -> usize {
        (fnv1a(value.as_bytes()) % self.n_components as u64) as usize
    }

    /// Counts every value of every row into its bucket.
    #[must_use]
    pub fn transform<S: AsRef<str>>(&self, rows: &[Vec<S>]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), self.n_components));
        for (row_idx, row) in rows.iter().enumerate() {
            for value in row {
                out[[row_idx, self.bucket(value.as_ref())]] += 1.0;
            }
        }
        out
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}
