//! HTTP client for the processing service.
//!
//! [`ProcessingService`] is the seam the engine depends on;
//! [`HttpProcessingService`] implements it with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use kazi_core::media::MediaContent;
use reqwest::multipart::{Form, Part};

use crate::messages::{
    ProcessAccepted, ProcessRequest, StatusResponse, ThumbnailRequest, ThumbnailResponse,
};

/// Errors from the processing service layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Processing service error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The request could not be built.
    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl RemoteApiError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Transport failures, timeouts, 5xx, 408 and 429 are transient.
    /// Malformed success bodies, other 4xx and encoding problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_decode() && !e.is_builder(),
            Self::ApiError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Encode(_) => false,
        }
    }
}

/// Operations the engine needs from a remote processing backend.
#[async_trait]
pub trait ProcessingService: Send + Sync {
    /// Submit a job; returns the service-assigned job id.
    async fn submit(&self, request: ProcessRequest<'_>) -> Result<String, RemoteApiError>;

    /// Fetch the current status of a previously submitted job.
    async fn status(&self, remote_job_id: &str) -> Result<StatusResponse, RemoteApiError>;

    /// Render a thumbnail; returns its URL.
    async fn thumbnail(&self, request: ThumbnailRequest<'_>) -> Result<String, RemoteApiError>;
}

/// [`ProcessingService`] over HTTP.
pub struct HttpProcessingService {
    client: reqwest::Client,
    api_url: String,
}

impl HttpProcessingService {
    /// Create a client for the service at `api_url` (e.g.
    /// `https://media.example.com/api`). Every request is bounded by
    /// `request_timeout`.
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Result<Self, RemoteApiError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn content_part(content: &MediaContent) -> Result<Part, RemoteApiError> {
        Part::bytes(content.data.clone())
            .file_name(content.name.clone())
            .mime_str(content.format.mime_type())
            .map_err(|e| RemoteApiError::Encode(e.to_string()))
    }

    fn json_part<T: serde::Serialize>(value: &T) -> Result<Part, RemoteApiError> {
        let json = serde_json::to_string(value).map_err(|e| RemoteApiError::Encode(e.to_string()))?;
        Part::text(json)
            .mime_str("application/json")
            .map_err(|e| RemoteApiError::Encode(e.to_string()))
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RemoteApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RemoteApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ProcessingService for HttpProcessingService {
    /// `POST /process` with the content, options, optimization flags and
    /// metadata as multipart fields.
    async fn submit(&self, request: ProcessRequest<'_>) -> Result<String, RemoteApiError> {
        let form = Form::new()
            .part("content", Self::content_part(request.content)?)
            .part("options", Self::json_part(request.options)?)
            .part("optimizations", Self::json_part(&request.options.optimizations)?)
            .part("metadata", Self::json_part(request.metadata)?);

        let response = self
            .client
            .post(format!("{}/process", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let accepted: ProcessAccepted = Self::parse_response(response).await?;
        tracing::debug!(remote_job_id = %accepted.job_id, "Processing service accepted job");
        Ok(accepted.job_id)
    }

    async fn status(&self, remote_job_id: &str) -> Result<StatusResponse, RemoteApiError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.api_url, remote_job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn thumbnail(&self, request: ThumbnailRequest<'_>) -> Result<String, RemoteApiError> {
        let form = Form::new()
            .part("content", Self::content_part(request.content)?)
            .text("timestamp", request.timestamp_secs.to_string())
            .text("branding", request.branding.to_string());

        let response = self
            .client
            .post(format!("{}/thumbnail", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let thumb: ThumbnailResponse = Self::parse_response(response).await?;
        Ok(thumb.thumbnail_url)
    }
}
