use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

/// Row indices of a train/validation partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    /// Rows used for fitting.
    pub train: Vec<usize>,
    /// Held-out rows.
    pub validation: Vec<usize>,
}

/// Shuffles `0..rows` and holds out `ceil(test_size * rows)` of them.
///
/// `seed = None` draws from OS entropy.
#[must_use]
pub fn train_test_split(rows: usize, test_size: f64, seed: Option<u64>) -> SplitIndices {
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = seed.map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);
    indices.shuffle(&mut rng);

    let fraction = test_size.clamp(0.0, 1.0);
    let held_out = ((fraction * rows as f64).ceil() as usize).min(rows);
    let train = indices.split_off(held_out);
    SplitIndices {
        train,
        validation: indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn validation_size_is_ceiled_and_partition_covers_rows() {
        for rows in [1, 7, 100, 1000, 1001] {
            let split = train_test_split(rows, 0.15, Some(3));
            let expected = (0.15 * rows as f64).ceil() as usize;
            assert_eq!(split.validation.len(), expected);
            assert_eq!(split.train.len() + split.validation.len(), rows);

            let train: HashSet<_> = split.train.iter().copied().collect();
            let validation: HashSet<_> = split.validation.iter().copied().collect();
            assert!(train.is_disjoint(&validation));
            assert_eq!(train.union(&validation).count(), rows);
        }
    }

    #[test]
    fn seeded_split_is_reproducible() {
        assert_eq!(
            train_test_split(50, 0.15, Some(42)),
            train_test_split(50, 0.15, Some(42))
        );
    }
}
