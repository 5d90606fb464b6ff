use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};

use crate::error::StemsplitError;
use crate::server::{ErrorBody, SubmitResponse};
use crate::state_machine::{JobId, JobView};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

/// Talks to a running stemsplit server.
pub struct StemsplitClient {
    client: Client,
    base_url: String,
}

impl StemsplitClient {
    pub fn new(base_url: &str) -> Result<Self, StemsplitError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Uploads `file` and returns the id of the job created for it.
    pub async fn submit(&self, file: &Path) -> Result<JobId, StemsplitError> {
        let handle = tokio::fs::File::open(file).await?;
        let len = handle.metadata().await?.len();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        // Streamed from disk; uploads can be hundreds of MiB.
        let part = Part::stream_with_length(Body::from(handle), len).file_name(file_name);
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/separate", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("server returned {status}"),
            };
            return Err(StemsplitError::Upload(message));
        }

        Ok(response.json::<SubmitResponse>().await?.job_id)
    }

    pub async fn progress(&self, id: &JobId) -> Result<JobView, StemsplitError> {
        let response = self
            .client
            .get(format!("{}/progress/{id}", self.base_url))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StemsplitError::JobNotFound(id.clone()));
        }
        let view = response.error_for_status()?.json::<JobView>().await?;
        Ok(view)
    }

    /// Absolute URL for a result file path returned by the server.
    pub fn artifact_url(&self, url: &str) -> String {
        format!("{}{url}", self.base_url)
    }
}
