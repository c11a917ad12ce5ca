//! REST API client for the sodalite task endpoints.
//!
//! [`SodaliteApi`] wraps the HTTP API (task creation, phase polling,
//! full status, health probe, metadata lookup) using [`reqwest`]. The
//! subset the sync core depends on is the [`TaskService`] trait so the
//! registry and liveness monitor can run against a scripted service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sodalite_core::job::{
    DownloadMode, FinalStatus, JobRequest, MediaFormat, Outcome, Phase, PhaseObservation,
};
use sodalite_core::types::TaskId;

/// Health status string reported by a healthy service.
const HEALTHY_STATUS: &str = "ok";

/// Remote operations the sync core consumes.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Create a task and return its server-assigned id.
    async fn create_task(&self, request: &JobRequest) -> Result<TaskId, SodaliteApiError>;

    /// Cheap incremental poll of a task's phase and outcome.
    async fn task_phase(&self, task_id: &str) -> Result<PhaseObservation, SodaliteApiError>;

    /// Full status, fetched once a task reaches a terminal outcome.
    async fn task_status(&self, task_id: &str) -> Result<FinalStatus, SodaliteApiError>;

    /// Liveness probe. `Ok` only when the service reports itself healthy.
    async fn health(&self) -> Result<(), SodaliteApiError>;
}

/// HTTP client for a single sodalite service.
pub struct SodaliteApi {
    client: reqwest::Client,
    api_url: String,
}

// ---- wire types ----

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    url: &'a str,
    format: MediaFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_quality: Option<&'a str>,
    download_mode: DownloadMode,
}

/// Response of `POST /process`.
#[derive(Debug, Deserialize)]
pub struct CreatedTask {
    pub task_id: String,
    pub status: Outcome,
}

/// Response of `GET /task/{id}/phase`.
#[derive(Debug, Deserialize)]
pub struct PhaseResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    /// Wire phase name; `"unknown"` when the server has none yet.
    pub phase: String,
    pub status: Outcome,
}

impl From<PhaseResponse> for PhaseObservation {
    fn from(response: PhaseResponse) -> Self {
        PhaseObservation {
            phase: response.phase.parse::<Phase>().ok(),
            outcome: response.status,
        }
    }
}

/// Response of `GET /task/{id}`.
#[derive(Debug, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: Outcome,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub file_size_mb: Option<f64>,
    #[serde(default)]
    pub video_quality: Option<String>,
    #[serde(default)]
    pub audio_quality: Option<String>,
}

impl From<TaskStatusResponse> for FinalStatus {
    fn from(response: TaskStatusResponse) -> Self {
        FinalStatus {
            outcome: response.status,
            artifact_ref: response.download_url,
            error: response.error,
            file_size_mb: response.file_size_mb,
        }
    }
}

/// Response of `GET /health`. Any statistics in the body are ignored.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// One available video rendition.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoStream {
    pub quality: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub codec: Option<String>,
}

/// One available audio rendition.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioStream {
    pub quality: String,
    #[serde(default)]
    pub codec: Option<String>,
}

/// Response of `POST /download`: what the service found at a URL.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMetadata {
    pub service: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub videos: Vec<VideoStream>,
    #[serde(default)]
    pub audios: Vec<AudioStream>,
}

/// Errors from the sodalite REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum SodaliteApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decode, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("sodalite API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body is not the expected JSON.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The health endpoint answered but did not report `ok`.
    #[error("service unhealthy: {0}")]
    Unhealthy(String),
}

impl SodaliteApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000/sodalite`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (e.g. one built with a request timeout).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Look up title, thumbnail and available renditions for a URL.
    ///
    /// Sends `POST /download`. Used to fill in display fields before a
    /// job is enqueued.
    pub async fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, SodaliteApiError> {
        let response = self
            .client
            .post(format!("{}/download", self.api_url))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or a
    /// [`SodaliteApiError::Status`] with the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SodaliteApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SodaliteApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// Reading the body can fail like any transport step; a body that
    /// arrives but does not decode is a [`SodaliteApiError::Decode`].
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SodaliteApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TaskService for SodaliteApi {
    async fn create_task(&self, request: &JobRequest) -> Result<TaskId, SodaliteApiError> {
        let body = CreateTaskBody {
            url: &request.url,
            format: request.format,
            video_quality: request.video_quality.as_deref(),
            audio_quality: request.audio_quality.as_deref(),
            download_mode: request.download_mode,
        };

        let response = self
            .client
            .post(format!("{}/process", self.api_url))
            .json(&body)
            .send()
            .await?;

        let created: CreatedTask = Self::parse_response(response).await?;
        Ok(created.task_id)
    }

    async fn task_phase(&self, task_id: &str) -> Result<PhaseObservation, SodaliteApiError> {
        let response = self
            .client
            .get(format!("{}/task/{}/phase", self.api_url, task_id))
            .send()
            .await?;

        let phase: PhaseResponse = Self::parse_response(response).await?;
        Ok(phase.into())
    }

    async fn task_status(&self, task_id: &str) -> Result<FinalStatus, SodaliteApiError> {
        let response = self
            .client
            .get(format!("{}/task/{}", self.api_url, task_id))
            .send()
            .await?;

        let status: TaskStatusResponse = Self::parse_response(response).await?;
        Ok(status.into())
    }

    async fn health(&self) -> Result<(), SodaliteApiError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;

        let health: HealthResponse = Self::parse_response(response).await?;
        if health.status == HEALTHY_STATUS {
            Ok(())
        } else {
            Err(SodaliteApiError::Unhealthy(health.status))
        }
    }
}
