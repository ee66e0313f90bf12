use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1};
use rand::{rngs::SmallRng, seq::index::sample, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    data::Trip,
    error::{Result, TrainerError},
    estimators::SearchSpace,
    metrics::r2_score,
    pipeline::Pipeline,
};

/// One hyperparameter assignment.
pub type ParamSet = IndexMap<String, Value>;

/// Contiguous, unshuffled k-fold partition of `0..n_samples`.
///
/// The first `n_samples % n_splits` folds hold one extra row.
pub fn k_fold(n_samples: usize, n_splits: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if n_splits < 2 || n_splits > n_samples {
        return Err(TrainerError::Config(format!(
            "cannot split {n_samples} rows into {n_splits} folds"
        )));
    }
    let base = n_samples / n_splits;
    let extra = n_samples % n_splits;
    let mut start = 0;
    let mut folds = Vec::with_capacity(n_splits);
    for fold in 0..n_splits {
        let size = base + usize::from(fold < extra);
        let test: Vec<usize> = (start..start + size).collect();
        let train: Vec<usize> = (0..start).chain(start + size..n_samples).collect();
        folds.push((train, test));
        start += size;
    }
    Ok(folds)
}

/// Scored candidate of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Parameters applied to the estimator.
    pub params: ParamSet,
    /// R² per fold.
    pub fold_scores: Vec<f64>,
    /// Mean of `fold_scores`.
    pub mean_score: f64,
}

/// Outcome of [`RandomizedSearch::fit`].
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Winner refitted on every training row.
    pub best_pipeline: Pipeline,
    /// Winning parameters.
    pub best_params: ParamSet,
    /// Winning mean cross-validated R².
    pub best_score: f64,
    /// Every evaluated candidate in sampling order.
    pub candidates: Vec<CandidateScore>,
}

/// Randomized hyperparameter search with k-fold cross-validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomizedSearch {
    space: SearchSpace,
    /// Candidates drawn.
    pub n_iter: usize,
    /// Folds per candidate.
    pub cv: usize,
    /// Sampling seed.
    pub random_state: u64,
}

impl RandomizedSearch {
    /// Search over `space` with 10 candidates, 2 folds and seed 42.
    pub fn new(space: SearchSpace) -> Result<Self> {
        if space.is_empty() || space.values().any(Vec::is_empty) {
            return Err(TrainerError::Config(
                "search space needs at least one value per parameter".into(),
            ));
        }
        Ok(Self {
            space,
            n_iter: 10,
            cv: 2,
            random_state: 42,
        })
    }

    /// Parameter space being searched.
    #[must_use]
    pub const fn space(&self) -> &SearchSpace {
        &self.space
    }

    fn grid_size(&self) -> usize {
        self.space
            .values()
            .map(Vec::len)
            .fold(1usize, usize::saturating_mul)
    }

    fn grid_point(&self, mut index: usize) -> ParamSet {
        let mut point = ParamSet::new();
        for (name, values) in self.space.iter().rev() {
            point.insert(name.clone(), values[index % values.len()].clone());
            index /= values.len();
        }
        point.reverse();
        point
    }

    /// Candidate assignments: the whole grid when it has at most `n_iter`
    /// points, otherwise `n_iter` distinct points drawn with the seed.
    #[must_use]
    pub fn candidates(&self) -> Vec<ParamSet> {
        let size = self.grid_size();
        if size <= self.n_iter {
            return (0..size).map(|index| self.grid_point(index)).collect();
        }
        let mut rng = SmallRng::seed_from_u64(self.random_state);
        sample(&mut rng, size, self.n_iter)
            .into_iter()
            .map(|index| self.grid_point(index))
            .collect()
    }

    fn score(
        base: &Pipeline,
        params: &ParamSet,
        trips: &[Trip],
        y: ArrayView1<'_, f64>,
        folds: &[(Vec<usize>, Vec<usize>)],
    ) -> Result<CandidateScore> {
        let fold_scores = folds
            .iter()
            .map(|(train, test)| {
                let mut pipeline = base.clone();
                pipeline.estimator.set_params(params)?;
                let (train_trips, train_y) = subset(trips, y, train);
                let (test_trips, test_y) = subset(trips, y, test);
                pipeline.fit(&train_trips, train_y.view())?;
                let predictions = pipeline.predict(&test_trips)?;
                r2_score(predictions.view(), test_y.view())
            })
            .collect::<Result<Vec<_>>>()?;
        let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
        debug!(?params, mean_score, "search candidate scored");
        Ok(CandidateScore {
            params: params.clone(),
            fold_scores,
            mean_score,
        })
    }

    /// Scores every candidate in parallel, then refits the best on all rows.
    ///
    /// Runs inside the caller's rayon pool. Ties keep the earliest candidate.
    pub fn fit(&self, base: &Pipeline, trips: &[Trip], y: ArrayView1<'_, f64>) -> Result<SearchOutcome> {
        let folds = k_fold(trips.len(), self.cv)?;
        let candidates = self.candidates();
        info!(
            candidates = candidates.len(),
            folds = self.cv,
            fits = candidates.len() * self.cv,
            "randomized search started"
        );
        let scores = candidates
            .par_iter()
            .map(|params| Self::score(base, params, trips, y, &folds))
            .collect::<Result<Vec<_>>>()?;

        let best = scores
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (idx, candidate)| match best {
                Some((_, score)) if score >= candidate.mean_score => best,
                _ if candidate.mean_score.is_nan() => best,
                _ => Some((idx, candidate.mean_score)),
            })
            .map(|(idx, _)| idx)
            .ok_or_else(|| TrainerError::Numerical("no candidate produced a finite score".into()))?;

        let best_params = scores[best].params.clone();
        let mut best_pipeline = base.clone();
        best_pipeline.estimator.set_params(&best_params)?;
        best_pipeline.fit(trips, y)?;
        info!(best_score = scores[best].mean_score, ?best_params, "randomized search finished");

        Ok(SearchOutcome {
            best_pipeline,
            best_params,
            best_score: scores[best].mean_score,
            candidates: scores,
        })
    }
}

fn subset(trips: &[Trip], y: ArrayView1<'_, f64>, rows: &[usize]) -> (Vec<Trip>, Array1<f64>) {
    let picked = rows.iter().map(|&row| trips[row].clone()).collect();
    let target = rows.iter().map(|&row| y[row]).collect();
    (picked, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DistanceType,
        data::fixtures::synthetic_trips,
        estimators::{get_estimator, EstimatorKind},
        features::FeatureComposer,
        pipeline::PipelineMemory,
    };
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn k_fold_partitions_rows() {
        let folds = k_fold(7, 2).unwrap();
        assert_eq!(folds[0].1, vec![0, 1, 2, 3]);
        assert_eq!(folds[1].1, vec![4, 5, 6]);
        assert_eq!(folds[1].0, vec![0, 1, 2, 3]);
        assert!(k_fold(1, 2).is_err());
    }

    #[test]
    fn small_grid_is_enumerated_completely() {
        let (_, space) = get_estimator("RandomForest", &IndexMap::new()).unwrap();
        let search = RandomizedSearch::new(space.unwrap()).unwrap();
        let candidates = search.candidates();
        assert_eq!(candidates.len(), 8);
        assert_eq!(candidates[0]["max_features"], json!("auto"));
        assert_eq!(candidates[0]["n_estimators"], json!(60));
        assert_eq!(candidates[7]["max_features"], json!("sqrt"));
        assert_eq!(candidates[7]["n_estimators"], json!(180));
    }

    #[test]
    fn large_grid_is_sampled_reproducibly() {
        let mut space = SearchSpace::new();
        space.insert("alpha".into(), (1..=20).map(|v| json!(f64::from(v) / 10.0)).collect());
        let search = RandomizedSearch::new(space).unwrap();
        let first = search.candidates();
        assert_eq!(first.len(), 10);
        assert_eq!(first, search.candidates());
        assert!(RandomizedSearch::new(SearchSpace::new()).is_err());
    }

    #[test]
    fn search_refits_best_candidate() {
        let (trips, y) = synthetic_trips(160, 8);
        let dir = tempdir().unwrap();
        let memory = PipelineMemory::at(dir.path()).unwrap();
        let base = Pipeline::new(
            FeatureComposer::new(&["distance"], DistanceType::Euclidian).unwrap(),
            crate::estimators::Estimator::new(EstimatorKind::RandomForest),
        )
        .with_memory(memory.clone());
        let mut space = SearchSpace::new();
        space.insert("n_estimators".into(), vec![json!(5), json!(10)]);
        space.insert("random_state".into(), vec![json!(3)]);
        let outcome = RandomizedSearch::new(space)
            .unwrap()
            .fit(&base, &trips, y.view())
            .unwrap();

        assert_eq!(outcome.candidates.len(), 2);
        let best = outcome
            .candidates
            .iter()
            .map(|candidate| candidate.mean_score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(outcome.best_score, best);
        assert_eq!(
            outcome.best_pipeline.estimator.params()["n_estimators"],
            outcome.best_params["n_estimators"]
        );
        assert!(outcome.best_pipeline.is_fitted());
        // two folds plus the full refit
        assert_eq!(memory.len(), 3);
    }
}
