//! HTTP client for a running cleanser server.
//!
//! Wraps the REST endpoints and adds [`ApiClient::wait_for_task`], a polling
//! loop with a hard bound on attempts. Transport failures and 5xx answers
//! back off exponentially; `queued`/`processing` answers wait the base poll
//! interval. Running out of attempts is a local failure only: the job keeps
//! running on the server.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cleanser::client::{ApiClient, RetryPolicy};
//! use cleanser::models::PreprocessOptions;
//!
//! let client = ApiClient::new("http://localhost:5000");
//! let upload = client.upload("sales.csv", bytes).await?;
//! let task = client.submit(&upload.file_id, &PreprocessOptions::default()).await?;
//! let result = client.wait_for_task(&task.task_id, &RetryPolicy::default()).await?;
//! let cleaned = client.download(&result.output_file_id).await?;
//! ```

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::jobs::{JobResult, JobState};
use crate::models::PreprocessOptions;
use crate::service::{Submission, TaskStatus, UploadOutcome};

/// Bounds of the polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total status requests before giving up.
    pub max_attempts: u32,
    /// Wait between polls of an unfinished job, and the first backoff step.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 600,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Client for the cleanser REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload a file and return its id, preview and quality report.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> ClientResult<UploadOutcome> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.url("/api/csv/upload"))
            .multipart(form)
            .send()
            .await?;
        parse_json(response).await
    }

    /// Quality report of a stored file.
    pub async fn analyze(&self, file_id: &str) -> ClientResult<Value> {
        let response = self
            .http
            .get(self.url(&format!("/api/csv/analyze/{file_id}")))
            .send()
            .await?;
        parse_json(response).await
    }

    /// Start a preprocessing job.
    pub async fn submit(&self, file_id: &str, options: &PreprocessOptions) -> ClientResult<Submission> {
        let body = serde_json::json!({ "file_id": file_id, "options": options });
        let response = self
            .http
            .post(self.url("/api/csv/preprocess"))
            .json(&body)
            .send()
            .await?;
        parse_json(response).await
    }

    /// One status poll.
    pub async fn status(&self, task_id: &str) -> ClientResult<TaskStatus> {
        let response = self
            .http
            .get(self.url(&format!("/api/csv/task-status/{task_id}")))
            .send()
            .await?;
        parse_json(response).await
    }

    /// Download a stored file.
    pub async fn download(&self, file_id: &str) -> ClientResult<Vec<u8>> {
        let response = self
            .http
            .get(self.url(&format!("/api/csv/download/{file_id}")))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Poll until the job is terminal or `policy.max_attempts` polls are spent.
    pub async fn wait_for_task(&self, task_id: &str, policy: &RetryPolicy) -> ClientResult<JobResult> {
        let mut failures = 0;

        for attempt in 1..=policy.max_attempts {
            let delay = match self.status(task_id).await {
                Ok(status) => {
                    failures = 0;
                    match settle(status)? {
                        Some(result) => return Ok(result),
                        None => policy.initial_delay,
                    }
                }
                Err(e) if is_transient(&e) => {
                    failures += 1;
                    let delay = policy.backoff(failures);
                    warn!(%task_id, attempt, error = %e, ?delay, "status poll failed, backing off");
                    delay
                }
                Err(e) => return Err(e),
            };
            if attempt < policy.max_attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(ClientError::TimedOut { attempts: policy.max_attempts })
    }
}

/// Terminal outcome of a status answer, or `None` while the job runs.
fn settle(status: TaskStatus) -> ClientResult<Option<JobResult>> {
    match status.status {
        JobState::Completed => status.result.map(Some).ok_or_else(|| ClientError::Server {
            status: 200,
            message: "completed task has no result".to_string(),
        }),
        JobState::Failed => Err(ClientError::TaskFailed(
            status.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        JobState::Queued | JobState::Processing => {
            debug!(state = %status.status, progress = ?status.progress, "task still running");
            Ok(None)
        }
    }
}

fn is_transient(err: &ClientError) -> bool {
    match err {
        ClientError::Http(e) => !e.is_decode(),
        ClientError::Server { status, .. } => *status >= 500,
        _ => false,
    }
}

async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Server { status: status.as_u16(), message })
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let response = check_status(response).await?;
    Ok(response.json().await?)
}
