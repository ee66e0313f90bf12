//! Experiment tracking: client, experiment and run set up in three explicit steps.

/// MLflow REST client.
pub mod mlflow;
/// Directory-backed tracker.
pub mod file_store;

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{config::TrainerConfig, error::Result};

pub use file_store::FileTracker;
pub use mlflow::MlflowClient;

/// Terminal state recorded when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// Still logging.
    Running,
    /// Completed normally.
    Finished,
    /// Aborted by an error.
    Failed,
}

impl RunStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Operations a tracking server must provide.
pub trait TrackingBackend: Send + Sync {
    /// Backend label for logs.
    fn describe(&self) -> String;
    /// Creates an experiment and returns its id; fails when it already exists.
    fn create_experiment(&self, name: &str) -> Result<String>;
    /// Looks an existing experiment up by name.
    fn get_experiment_by_name(&self, name: &str) -> Result<String>;
    /// Opens a run inside an experiment and returns its id.
    fn create_run(&self, experiment_id: &str) -> Result<String>;
    /// Records a parameter on a run.
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()>;
    /// Records a metric on a run.
    fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()>;
    /// Marks a run terminated.
    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()>;
}

/// Picks a backend from the URI scheme: `http(s)://` talks to MLflow,
/// `file://` or a bare path writes JSON files.
pub fn connect(tracking_uri: &str) -> Result<Box<dyn TrackingBackend>> {
    if tracking_uri.starts_with("http://") || tracking_uri.starts_with("https://") {
        return Ok(Box::new(MlflowClient::new(tracking_uri)?));
    }
    let root = tracking_uri.strip_prefix("file://").unwrap_or(tracking_uri);
    Ok(Box::new(FileTracker::new(PathBuf::from(root))?))
}

/// Identifiers of the active run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    /// Experiment id.
    pub experiment_id: String,
    /// Run id.
    pub run_id: String,
}

/// Tracking state of a trainer; every log call is a no-op when disabled.
pub enum TrackingSession {
    /// Tracking turned off.
    Disabled,
    /// Logging into an open run.
    Active {
        /// Connected backend.
        backend: Box<dyn TrackingBackend>,
        /// Open run.
        run: RunHandle,
    },
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("TrackingSession::Disabled"),
            Self::Active { backend, run } => f
                .debug_struct("TrackingSession::Active")
                .field("backend", &backend.describe())
                .field("run", run)
                .finish(),
        }
    }
}

impl TrackingSession {
    /// Connects, resolves the experiment and opens a run when `mlflow` is set.
    pub fn start(config: &TrainerConfig) -> Result<Self> {
        if !config.mlflow {
            return Ok(Self::Disabled);
        }
        let backend = connect(&config.env.tracking_uri)?;
        Self::open(backend, &config.experiment_name)
    }

    /// Resolves the experiment on `backend` and opens a run.
    pub fn open(backend: Box<dyn TrackingBackend>, experiment_name: &str) -> Result<Self> {
        let experiment_id = match backend.create_experiment(experiment_name) {
            Ok(id) => id,
            Err(err) => {
                warn!(experiment = experiment_name, error = %err, "create failed, looking experiment up");
                backend.get_experiment_by_name(experiment_name)?
            }
        };
        let run_id = backend.create_run(&experiment_id)?;
        info!(
            backend = %backend.describe(),
            experiment = experiment_name,
            %experiment_id,
            %run_id,
            "tracking run opened"
        );
        Ok(Self::Active {
            backend,
            run: RunHandle {
                experiment_id,
                run_id,
            },
        })
    }

    /// Whether calls reach a backend.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Open run, if tracking.
    #[must_use]
    pub const fn run(&self) -> Option<&RunHandle> {
        match self {
            Self::Disabled => None,
            Self::Active { run, .. } => Some(run),
        }
    }

    /// Records a parameter.
    pub fn log_param(&self, key: &str, value: impl fmt::Display) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Active { backend, run } => {
                backend.log_param(&run.run_id, key, &value.to_string())
            }
        }
    }

    /// Records a metric.
    pub fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Active { backend, run } => backend.log_metric(&run.run_id, key, value),
        }
    }

    /// Closes the run with `status`.
    pub fn finish(&self, status: RunStatus) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Active { backend, run } => backend.finish_run(&run.run_id, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disabled_session_ignores_calls() {
        let session = TrackingSession::start(&TrainerConfig::default()).unwrap();
        assert!(!session.is_enabled());
        session.log_param("estimator", "Linear").unwrap();
        session.log_metric("rmse_val", 4.2).unwrap();
        session.finish(RunStatus::Finished).unwrap();
        assert!(session.run().is_none());
    }

    #[test]
    fn existing_experiment_is_reused() {
        let dir = tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());
        let config = TrainerConfig {
            mlflow: true,
            experiment_name: "taxifare_test".into(),
            env: crate::config::EnvironmentConfig {
                tracking_uri: uri,
                ..crate::config::EnvironmentConfig::default()
            },
            ..TrainerConfig::default()
        };
        let first = TrackingSession::start(&config).unwrap();
        let second = TrackingSession::start(&config).unwrap();
        let (a, b) = (first.run().unwrap(), second.run().unwrap());
        assert_eq!(a.experiment_id, b.experiment_id);
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn scheme_selects_backend() {
        let dir = tempdir().unwrap();
        let backend = connect(&dir.path().display().to_string()).unwrap();
        assert!(backend.describe().starts_with("file"));
        let remote = connect("https://mlflow.example.com/").unwrap();
        assert!(remote.describe().starts_with("mlflow"));
    }
}
