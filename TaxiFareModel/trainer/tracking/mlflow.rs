use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{RunStatus, TrackingBackend};
use crate::error::{Result, TrainerError};

/// MLflow tracking server spoken to over its REST API.
pub struct MlflowClient {
    base: String,
    client: Client,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
}

#[derive(Deserialize)]
struct RunData {
    info: RunInfo,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunData,
}

impl MlflowClient {
    /// Client for the server at `tracking_uri`; `MLFLOW_TRACKING_TOKEN` is sent
    /// as a bearer token when set.
    pub fn new(tracking_uri: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("taxifare-trainer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: tracking_uri.trim_end_matches('/').to_string(),
            client,
            token: std::env::var("MLFLOW_TRACKING_TOKEN").ok(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base)
    }

    fn check(response: Response, action: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().unwrap_or_default();
        Err(TrainerError::Tracking(format!("{action}: HTTP {status}: {body}")))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Response> {
        let mut request = self.client.post(self.endpoint(path)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Self::check(request.send()?, path)
    }
}

impl TrackingBackend for MlflowClient {
    fn describe(&self) -> String {
        format!("mlflow {}", self.base)
    }

    fn create_experiment(&self, name: &str) -> Result<String> {
        let response = self.post("experiments/create", &json!({ "name": name }))?;
        Ok(response.json::<CreateExperimentResponse>()?.experiment_id)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<String> {
        let mut request = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", name)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = Self::check(request.send()?, "experiments/get-by-name")?;
        Ok(response.json::<GetExperimentResponse>()?.experiment.experiment_id)
    }

    fn create_run(&self, experiment_id: &str) -> Result<String> {
        let response = self.post(
            "runs/create",
            &json!({
                "experiment_id": experiment_id,
                "start_time": Utc::now().timestamp_millis(),
            }),
        )?;
        Ok(response.json::<CreateRunResponse>()?.run.info.run_id)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.post(
            "runs/log-parameter",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        self.post(
            "runs/log-metric",
            &json!({
                "run_id": run_id,
                "key": key,
                "value": value,
                "timestamp": Utc::now().timestamp_millis(),
                "step": 0,
            }),
        )?;
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.post(
            "runs/update",
            &json!({
                "run_id": run_id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_api_prefix() {
        let client = MlflowClient::new("https://mlflow.lewagon.co/").unwrap();
        assert_eq!(
            client.endpoint("runs/log-metric"),
            "https://mlflow.lewagon.co/api/2.0/mlflow/runs/log-metric"
        );
        assert_eq!(client.describe(), "mlflow https://mlflow.lewagon.co");
    }

    #[test]
    fn unreachable_server_is_a_tracking_failure() {
        let client = MlflowClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.create_experiment("taxifare").is_err());
    }
}
