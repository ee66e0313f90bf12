use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    config::EnvironmentConfig,
    error::{Result, TrainerError},
    pipeline::Pipeline,
    storage::{self, ObjectStore},
};

/// Local artifact file name.
pub const MODEL_FILE: &str = "model_taxi.bin";

const FORMAT_VERSION: u32 = 1;

/// Serialized fitted pipeline plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Artifact layout version.
    pub format_version: u32,
    /// Model name from the environment.
    pub model_name: String,
    /// Model version from the environment.
    pub model_version: String,
    /// Write time.
    pub created_at: DateTime<Utc>,
    /// Fitted pipeline.
    pub pipeline: Pipeline,
}

/// Where a saved model ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedModel {
    /// Local artifact path.
    pub local_path: PathBuf,
    /// Object URI when uploaded.
    pub remote_uri: Option<String>,
}

/// Writes the artifact into `dir` and returns its path.
pub fn write_model(pipeline: &Pipeline, env: &EnvironmentConfig, dir: &Path) -> Result<PathBuf> {
    if !pipeline.is_fitted() {
        return Err(TrainerError::EmptyPipeline);
    }
    fs::create_dir_all(dir)?;
    let artifact = ModelArtifact {
        format_version: FORMAT_VERSION,
        model_name: env.model_name.clone(),
        model_version: env.model_version.clone(),
        created_at: Utc::now(),
        pipeline: pipeline.clone(),
    };
    let path = dir.join(MODEL_FILE);
    fs::write(&path, bincode::serialize(&artifact)?)?;
    info!(path = %path.display(), "model saved locally");
    Ok(path)
}

/// Reads an artifact back.
pub fn load_model(path: impl AsRef<Path>) -> Result<ModelArtifact> {
    let bytes = fs::read(path.as_ref())?;
    let artifact: ModelArtifact = bincode::deserialize(&bytes)?;
    if artifact.format_version != FORMAT_VERSION {
        return Err(TrainerError::Data(format!(
            "unsupported artifact version {}",
            artifact.format_version
        )));
    }
    Ok(artifact)
}

/// Saves locally, then uploads to `models/<name>/<version>/model_taxi.bin`
/// through `store` when `upload` is set.
pub fn save_model_with(
    pipeline: &Pipeline,
    env: &EnvironmentConfig,
    upload: bool,
    store: Option<&dyn ObjectStore>,
) -> Result<SavedModel> {
    let local_path = write_model(pipeline, env, Path::new(&env.output_dir))?;
    let remote_uri = match (upload, store) {
        (false, _) => None,
        (true, Some(store)) => Some(store.upload_file(&local_path, &env.storage_location(MODEL_FILE))?),
        (true, None) => {
            let store = storage::from_env(env)?;
            Some(store.upload_file(&local_path, &env.storage_location(MODEL_FILE))?)
        }
    };
    if let Some(uri) = &remote_uri {
        info!(%uri, "model uploaded");
    }
    Ok(SavedModel {
        local_path,
        remote_uri,
    })
}

/// [`save_model_with`] using the store configured in `env`.
pub fn save_model(pipeline: &Pipeline, env: &EnvironmentConfig, upload: bool) -> Result<SavedModel> {
    save_model_with(pipeline, env, upload, None)
}
