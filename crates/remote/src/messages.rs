//! Wire types exchanged with the processing service.
//!
//! The service speaks camelCase JSON:
//!
//! - `POST /process` -> `{"jobId": "..."}`
//! - `GET /status/{jobId}` -> `{"status", "progress", "output"?, "error"?}`
//! - `POST /thumbnail` -> `{"thumbnailUrl": "..."}`

use serde::{Deserialize, Serialize};

use kazi_core::job::{JobMetadata, OutputDescriptor};
use kazi_core::media::{MediaContent, MediaFormat, ProcessingOptions, Quality};

/// Body returned by `POST /process` once the service accepts a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessAccepted {
    pub job_id: String,
}

/// Remote job status as reported by `GET /status/{jobId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Output reported by the service for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOutput {
    #[serde(alias = "location")]
    pub url: String,
    #[serde(default)]
    pub format: Option<MediaFormat>,
    #[serde(default, alias = "sizeBytes")]
    pub size: Option<u64>,
    #[serde(default)]
    pub quality: Option<Quality>,
}

impl RemoteOutput {
    /// Convert to the shared output schema, filling gaps from what was
    /// requested.
    pub fn into_descriptor(self, requested: &ProcessingOptions) -> OutputDescriptor {
        OutputDescriptor {
            location: self.url,
            format: self.format.unwrap_or_else(|| requested.output_format()),
            size_bytes: self.size.unwrap_or(0),
            quality: self.quality.unwrap_or(requested.quality),
        }
    }
}

/// Body of `GET /status/{jobId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub output: Option<RemoteOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body returned by `POST /thumbnail`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResponse {
    pub thumbnail_url: String,
}

/// Everything sent with `POST /process`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRequest<'a> {
    pub content: &'a MediaContent,
    pub options: &'a ProcessingOptions,
    pub metadata: &'a JobMetadata,
}

/// Everything sent with `POST /thumbnail`.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailRequest<'a> {
    pub content: &'a MediaContent,
    pub timestamp_secs: f64,
    /// Overlay the platform watermark.
    pub branding: bool,
}
