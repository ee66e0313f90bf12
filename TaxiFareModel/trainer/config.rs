use std::{fmt, fs, path::Path, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrainerError};

/// Distance metric used by the `distance` feature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DistanceType {
    /// Great-circle distance.
    Haversine,
    /// Straight-line distance on a local km projection.
    #[default]
    Euclidian,
    /// L1 distance on a local km projection.
    Manhattan,
}

impl DistanceType {
    /// Canonical configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Haversine => "haversine",
            Self::Euclidian => "euclidian",
            Self::Manhattan => "manhattan",
        }
    }
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceType {
    type Err = TrainerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "haversine" => Ok(Self::Haversine),
            "euclidian" | "euclidean" => Ok(Self::Euclidian),
            "manhattan" => Ok(Self::Manhattan),
            _ => Err(TrainerError::UnknownDistance(value.to_string())),
        }
    }
}

impl TryFrom<String> for DistanceType {
    type Error = TrainerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DistanceType> for String {
    fn from(value: DistanceType) -> Self {
        value.as_str().to_string()
    }
}

/// Deployment constants: bucket, model identity, tracking endpoint, paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Object-store bucket holding training data and model artifacts.
    pub bucket_name: String,
    /// Training CSV key inside the bucket.
    pub train_data_path: String,
    /// Model name used in the artifact key.
    pub model_name: String,
    /// Model version used in the artifact key.
    pub model_version: String,
    /// Experiment tracking endpoint (`http(s)://` MLflow or `file://` directory).
    pub tracking_uri: String,
    /// Training CSV read when `local` is set.
    pub local_data_path: String,
    /// Directory receiving downloaded remote data.
    pub data_cache_dir: String,
    /// Directory receiving the local model artifact.
    pub output_dir: String,
    /// Object-store root override; `file://` roots store artifacts on disk.
    pub storage_root: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            bucket_name: "wagon-ml-taxifare".into(),
            train_data_path: "data/train_1k.csv".into(),
            model_name: "TaxiFareModel".into(),
            model_version: "v1".into(),
            tracking_uri: "https://mlflow.lewagon.co/".into(),
            local_data_path: "raw_data/train.csv".into(),
            data_cache_dir: "raw_data".into(),
            output_dir: ".".into(),
            storage_root: None,
        }
    }
}

impl EnvironmentConfig {
    /// Public URL of the remote training CSV.
    #[must_use]
    pub fn remote_data_url(&self) -> String {
        let root = self
            .storage_root
            .as_deref()
            .filter(|root| root.starts_with("http"))
            .unwrap_or("https://storage.googleapis.com");
        format!(
            "{}/{}/{}",
            root.trim_end_matches('/'),
            self.bucket_name,
            self.train_data_path
        )
    }

    /// Object key of the uploaded model artifact.
    #[must_use]
    pub fn storage_location(&self, file_name: &str) -> String {
        format!(
            "models/{}/{}/{file_name}",
            self.model_name, self.model_version
        )
    }
}

/// Training options captured once when the trainer is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Maximum rows read from the source.
    pub nrows: Option<usize>,
    /// Read the local CSV instead of the bucket copy.
    pub local: bool,
    /// Upload the artifact after saving it locally.
    pub upload: bool,
    /// Wrap the pipeline in a randomized hyperparameter search.
    pub gridsearch: bool,
    /// Downcast numeric columns while loading.
    pub optimize: bool,
    /// Estimator name.
    pub estimator: String,
    /// Extra estimator parameters applied verbatim.
    pub estimator_params: IndexMap<String, Value>,
    /// Log params and metrics to the experiment tracker.
    pub mlflow: bool,
    /// Experiment name used by the tracker.
    pub experiment_name: String,
    /// Cache fitted feature steps in a scratch directory.
    pub pipeline_memory: bool,
    /// Distance metric of the `distance` block.
    pub distance_type: DistanceType,
    /// Enabled feature blocks.
    pub feateng: Vec<String>,
    /// Hold out a validation split.
    pub split: bool,
    /// Worker count for forest fitting and search trials (`-1` = all cores).
    pub n_jobs: i32,
    /// Seed for the train/validation split; entropy when unset.
    pub random_state: Option<u64>,
    /// Deployment constants.
    pub env: EnvironmentConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            nrows: Some(10_000),
            local: false,
            upload: true,
            gridsearch: false,
            optimize: false,
            estimator: "Linear".into(),
            estimator_params: IndexMap::new(),
            mlflow: false,
            experiment_name: "TaxifareModel".into(),
            pipeline_memory: false,
            distance_type: DistanceType::default(),
            feateng: vec!["distance".into(), "time_features".into()],
            split: true,
            n_jobs: 4,
            random_state: None,
            env: EnvironmentConfig::default(),
        }
    }
}

impl TrainerConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| TrainerError::Config(format!("{}: {err}", path.display())))?,
            _ => serde_json::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.nrows == Some(0) {
            return Err(TrainerError::Config("nrows must be positive".into()));
        }
        if self.n_jobs == 0 || self.n_jobs < -1 {
            return Err(TrainerError::Config(format!(
                "n_jobs must be -1 or positive, got {}",
                self.n_jobs
            )));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(TrainerError::Config("experiment_name is empty".into()));
        }
        Ok(())
    }

    /// Worker count for the internal thread pool; `0` lets the pool pick.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        usize::try_from(self.n_jobs).unwrap_or(0)
    }

    /// Flattens the option mapping into tracking params.
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        let nrows = self
            .nrows
            .map_or_else(|| "None".to_string(), |rows| rows.to_string());
        vec![
            ("nrows".into(), nrows),
            ("local".into(), self.local.to_string()),
            ("upload".into(), self.upload.to_string()),
            ("gridsearch".into(), self.gridsearch.to_string()),
            ("optimize".into(), self.optimize.to_string()),
            ("estimator".into(), self.estimator.clone()),
            (
                "estimator_params".into(),
                Value::Object(self.estimator_params.clone().into_iter().collect()).to_string(),
            ),
            ("mlflow".into(), self.mlflow.to_string()),
            ("experiment_name".into(), self.experiment_name.clone()),
            ("pipeline_memory".into(), self.pipeline_memory.to_string()),
            ("distance_type".into(), self.distance_type.to_string()),
            ("feateng".into(), format!("{:?}", self.feateng)),
            ("split".into(), self.split.to_string()),
            ("n_jobs".into(), self.n_jobs.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_training_script() {
        let config = TrainerConfig::default();
        assert_eq!(config.estimator, "Linear");
        assert_eq!(config.feateng, vec!["distance", "time_features"]);
        assert_eq!(config.distance_type, DistanceType::Euclidian);
        assert!(config.split);
        assert_eq!(config.params().len(), 14);
    }

    #[test]
    fn loads_partial_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(
            &path,
            r#"
estimator = "RandomForest"
gridsearch = true
distance_type = "manhattan"
feateng = ["distance", "direction"]

[estimator_params]
n_estimators = 20

[env]
model_version = "v2"
"#,
        )
        .unwrap();
        let config = TrainerConfig::from_path(&path).unwrap();
        assert_eq!(config.distance_type, DistanceType::Manhattan);
        assert_eq!(config.estimator_params["n_estimators"], 20);
        assert_eq!(config.env.model_version, "v2");
        assert_eq!(config.env.model_name, "TaxiFareModel");
        assert_eq!(
            config.env.storage_location("model_taxi.bin"),
            "models/TaxiFareModel/v2/model_taxi.bin"
        );
    }

    #[test]
    fn rejects_unknown_distance_in_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, r#"{ "distance_type": "chebyshev" }"#).unwrap();
        assert!(TrainerConfig::from_path(&path).is_err());
    }

    #[test]
    fn validate_rejects_zero_jobs() {
        let config = TrainerConfig {
            n_jobs: 0,
            ..TrainerConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainerError::Config(_))));
        assert_eq!(
            TrainerConfig {
                n_jobs: -1,
                ..TrainerConfig::default()
            }
            .worker_threads(),
            0
        );
    }

    #[test]
    fn remote_url_uses_bucket_path() {
        let env = EnvironmentConfig::default();
        assert_eq!(
            env.remote_data_url(),
            "https://storage.googleapis.com/wagon-ml-taxifare/data/train_1k.csv"
        );
    }
}
