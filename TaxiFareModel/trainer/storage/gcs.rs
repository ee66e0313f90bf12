use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use super::ObjectStore;
use crate::error::{Result, TrainerError};

const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";
const TOKEN_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Google Cloud Storage bucket written through the JSON API media upload.
pub struct GcsObjectStore {
    bucket: String,
    token: String,
    client: Client,
    upload_base: String,
}

#[derive(Deserialize)]
struct UploadedObject {
    name: String,
}

impl GcsObjectStore {
    /// Store for `bucket` authenticated with `token`.
    pub fn new(bucket: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("taxifare-trainer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            bucket: bucket.into(),
            token: token.into(),
            client,
            upload_base: UPLOAD_BASE.to_string(),
        })
    }

    /// Reads the bearer token from `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn from_env(bucket: &str) -> Result<Self> {
        let token = std::env::var(TOKEN_VAR).map_err(|_| {
            TrainerError::Storage(format!("{TOKEN_VAR} is not set; cannot upload to gs://{bucket}"))
        })?;
        Self::new(bucket, token)
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/o", self.upload_base, self.bucket)
    }
}

impl ObjectStore for GcsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(&self.token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(TrainerError::Storage(format!(
                "upload of {key} to gs://{} failed: HTTP {status}: {body}",
                self.bucket
            )));
        }
        let object: UploadedObject = response.json()?;
        Ok(format!("gs://{}/{}", self.bucket, object.name))
    }
}
