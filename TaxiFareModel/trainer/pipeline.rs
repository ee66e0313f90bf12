use std::{
    fs,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::TrainerConfig,
    data::Trip,
    error::{Result, TrainerError},
    estimators::{get_estimator, Estimator, SearchSpace},
    features::FeatureComposer,
};

/// Scratch directory caching fitted feature steps between fits.
///
/// Entries are keyed by a digest of the composer configuration and the
/// training rows, so repeated fits on the same fold skip feature fitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMemory {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CachedFeatures {
    composer: FeatureComposer,
    matrix: Array2<f64>,
}

impl PipelineMemory {
    /// Creates a fresh directory under the system temp dir.
    pub fn create() -> Result<Self> {
        Self::at(std::env::temp_dir().join(format!("taxifare-pipeline-{}", Uuid::new_v4())))
    }

    /// Uses (and creates) `dir` as the cache location.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry(&self, key: u64) -> PathBuf {
        self.dir.join(format!("features-{key:016x}.bin"))
    }

    fn load(&self, key: u64) -> Option<CachedFeatures> {
        let bytes = fs::read(self.entry(key)).ok()?;
        bincode::deserialize(&bytes).ok()
    }

    fn store(&self, key: u64, cached: &CachedFeatures) -> Result<()> {
        let path = self.entry(key);
        let staging = self.dir.join(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&staging, bincode::serialize(cached)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    /// Fits `composer` on `trips`, reusing a cached result when present.
    fn fit_transform(&self, composer: &mut FeatureComposer, trips: &[Trip]) -> Result<Array2<f64>> {
        let key = digest(&(composer.blocks(), composer.distance_type(), trips))?;
        if let Some(cached) = self.load(key) {
            debug!(key = format!("{key:016x}"), "feature cache hit");
            *composer = cached.composer;
            return Ok(cached.matrix);
        }
        let matrix = composer.fit_transform(trips)?;
        self.store(
            key,
            &CachedFeatures {
                composer: composer.clone(),
                matrix: matrix.clone(),
            },
        )?;
        Ok(matrix)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "bin"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn digest<T: Serialize>(value: &T) -> Result<u64> {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    let bytes = bincode::serialize(value)?;
    Ok(bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME)))
}

/// Feature composer followed by a regressor, fitted and applied as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Feature step.
    pub features: FeatureComposer,
    /// Regression step.
    pub estimator: Estimator,
    #[serde(skip)]
    memory: Option<PipelineMemory>,
}

impl Pipeline {
    /// Joins a feature step and a regressor.
    #[must_use]
    pub const fn new(features: FeatureComposer, estimator: Estimator) -> Self {
        Self {
            features,
            estimator,
            memory: None,
        }
    }

    /// Assembles the configured pipeline and the estimator's search space.
    pub fn from_config(config: &TrainerConfig) -> Result<(Self, Option<SearchSpace>)> {
        let features = FeatureComposer::new(&config.feateng, config.distance_type)?;
        let (estimator, space) = get_estimator(&config.estimator, &config.estimator_params)?;
        Ok((Self::new(features, estimator), space))
    }

    /// Caches feature steps in `memory` on subsequent fits.
    #[must_use]
    pub fn with_memory(mut self, memory: PipelineMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attached cache, if any.
    #[must_use]
    pub const fn memory(&self) -> Option<&PipelineMemory> {
        self.memory.as_ref()
    }

    /// Fits the feature step, then the regressor on its output.
    ///
    /// A failed regressor fit leaves the whole pipeline unfitted.
    pub fn fit(&mut self, trips: &[Trip], y: ArrayView1<'_, f64>) -> Result<()> {
        if trips.len() != y.len() {
            return Err(TrainerError::shape(
                format!("{} targets", trips.len()),
                format!("{} targets", y.len()),
            ));
        }
        let matrix = match &self.memory {
            Some(memory) => memory.fit_transform(&mut self.features, trips)?,
            None => self.features.fit_transform(trips)?,
        };
        if let Err(err) = self.estimator.fit(matrix.view(), y) {
            self.features.reset();
            return Err(err);
        }
        Ok(())
    }

    /// Predicts fares for trips.
    pub fn predict(&self, trips: &[Trip]) -> Result<Array1<f64>> {
        let matrix = self.features.transform(trips)?;
        self.estimator.predict(matrix.view())
    }

    /// Whether both the feature step and the regressor have been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.features.is_fitted() && self.estimator.is_fitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DistanceType, data::fixtures::synthetic_trips, estimators::EstimatorKind};
    use tempfile::tempdir;

    fn linear_pipeline() -> Pipeline {
        Pipeline::new(
            FeatureComposer::new(&["distance", "time_features"], DistanceType::Euclidian).unwrap(),
            Estimator::new(EstimatorKind::Linear),
        )
    }

    #[test]
    fn pipeline_fits_and_predicts() {
        let (trips, y) = synthetic_trips(200, 2);
        let mut pipeline = linear_pipeline();
        assert!(!pipeline.is_fitted());
        pipeline.fit(&trips, y.view()).unwrap();
        let pred = pipeline.predict(&trips[..10]).unwrap();
        assert_eq!(pred.len(), 10);
        assert!(pred.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn failed_regressor_fit_leaves_pipeline_unfitted() {
        let (trips, y) = synthetic_trips(50, 8);
        let mut broken = y.clone();
        broken[7] = f64::NAN;

        let mut pipeline = linear_pipeline();
        assert!(matches!(
            pipeline.fit(&trips, broken.view()),
            Err(TrainerError::Data(_))
        ));
        assert!(!pipeline.features.is_fitted());
        assert!(!pipeline.is_fitted());

        pipeline.fit(&trips, y.view()).unwrap();
        assert!(pipeline.is_fitted());
        assert!(pipeline.fit(&trips, broken.view()).is_err());
        assert!(!pipeline.is_fitted());
    }

    #[test]
    fn memory_reuses_fitted_features() {
        let dir = tempdir().unwrap();
        let memory = PipelineMemory::at(dir.path().join("cache")).unwrap();
        let (trips, y) = synthetic_trips(100, 3);

        let mut first = linear_pipeline().with_memory(memory.clone());
        first.fit(&trips, y.view()).unwrap();
        assert_eq!(memory.len(), 1);

        let mut second = linear_pipeline().with_memory(memory.clone());
        second.fit(&trips, y.view()).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(second.features, first.features);

        second.fit(&trips[..50], y.slice(ndarray::s![..50])).unwrap();
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn from_config_rejects_unknown_estimator() {
        let config = TrainerConfig {
            estimator: "Perceptron".into(),
            ..TrainerConfig::default()
        };
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(TrainerError::UnknownEstimator(_))
        ));
    }
}
