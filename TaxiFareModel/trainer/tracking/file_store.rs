use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RunStatus, TrackingBackend};
use crate::error::{Result, TrainerError};

/// Run as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id.
    pub run_id: String,
    /// Owning experiment.
    pub experiment_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Creation time.
    pub start_time: DateTime<Utc>,
    /// Termination time.
    pub end_time: Option<DateTime<Utc>>,
    /// Logged parameters.
    pub params: IndexMap<String, String>,
    /// Latest value of every logged metric.
    pub metrics: IndexMap<String, f64>,
}

/// Tracker writing experiments and runs as JSON under a directory.
///
/// Layout: `experiments.json` maps names to ids; each run lives at
/// `<experiment_id>/<run_id>.json`.
pub struct FileTracker {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileTracker {
    /// Opens (and creates) the tracking directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Tracking directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("experiments.json")
    }

    fn read_index(&self) -> Result<IndexMap<String, String>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(IndexMap::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf> {
        for entry in fs::read_dir(&self.root)? {
            let candidate = entry?.path().join(format!("{run_id}.json"));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(TrainerError::Tracking(format!("run {run_id} not found")))
    }

    /// Reads a stored run.
    pub fn load_run(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_path(run_id)?;
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn update_run(&self, run_id: &str, apply: impl FnOnce(&mut RunRecord)) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.run_path(run_id)?;
        let mut record: RunRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        apply(&mut record);
        fs::write(path, serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }
}

impl TrackingBackend for FileTracker {
    fn describe(&self) -> String {
        format!("file {}", self.root.display())
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        let _guard = self.lock.lock();
        let mut index = self.read_index()?;
        if index.contains_key(name) {
            return Err(TrainerError::Tracking(format!(
                "experiment {name:?} already exists"
            )));
        }
        let id = index.len().to_string();
        fs::create_dir_all(self.root.join(&id))?;
        index.insert(name.to_string(), id.clone());
        fs::write(self.index_path(), serde_json::to_vec_pretty(&index)?)?;
        Ok(id)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<String> {
        let _guard = self.lock.lock();
        self.read_index()?
            .get(name)
            .cloned()
            .ok_or_else(|| TrainerError::Tracking(format!("experiment {name:?} not found")))
    }

    fn create_run(&self, experiment_id: &str) -> Result<String> {
        let _guard = self.lock.lock();
        let dir = self.root.join(experiment_id);
        if !dir.is_dir() {
            return Err(TrainerError::Tracking(format!(
                "experiment {experiment_id} not found"
            )));
        }
        let run_id = Uuid::new_v4().simple().to_string();
        let record = RunRecord {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: IndexMap::new(),
            metrics: IndexMap::new(),
        };
        fs::write(
            dir.join(format!("{run_id}.json")),
            serde_json::to_vec_pretty(&record)?,
        )?;
        Ok(run_id)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update_run(run_id, |record| {
            record.params.insert(key.to_string(), value.to_string());
        })
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        self.update_run(run_id, |record| {
            record.metrics.insert(key.to_string(), value);
        })
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.update_run(run_id, |record| {
            record.status = status;
            record.end_time = Some(Utc::now());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_params_metrics_and_status() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path()).unwrap();
        let experiment = tracker.create_experiment("taxifare").unwrap();
        assert!(tracker.create_experiment("taxifare").is_err());
        assert_eq!(tracker.get_experiment_by_name("taxifare").unwrap(), experiment);

        let run = tracker.create_run(&experiment).unwrap();
        tracker.log_param(&run, "estimator", "RandomForest").unwrap();
        tracker.log_metric(&run, "rmse_val", 4.8).unwrap();
        tracker.log_metric(&run, "rmse_val", 4.5).unwrap();
        tracker.finish_run(&run, RunStatus::Finished).unwrap();

        let record = tracker.load_run(&run).unwrap();
        assert_eq!(record.params["estimator"], "RandomForest");
        assert_eq!(record.metrics["rmse_val"], 4.5);
        assert_eq!(record.status, RunStatus::Finished);
        assert!(record.end_time.is_some());
    }

    #[test]
    fn unknown_run_and_experiment_fail() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path()).unwrap();
        assert!(tracker.get_experiment_by_name("missing").is_err());
        assert!(tracker.create_run("7").is_err());
        assert!(tracker.log_metric("nope", "rmse", 1.0).is_err());
    }
}
