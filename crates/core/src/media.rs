//! Media content and processing options supplied at submission time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// MediaFormat
// ---------------------------------------------------------------------------

/// Container formats accepted for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp4,
    Webm,
    Mov,
    Mkv,
    Avi,
}

impl MediaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::Avi => "avi",
        }
    }

    /// MIME type used for multipart uploads.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mov => "video/quicktime",
            Self::Mkv => "video/x-matroska",
            Self::Avi => "video/x-msvideo",
        }
    }

    /// Infer the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            "mov" => Ok(Self::Mov),
            "mkv" => Ok(Self::Mkv),
            "avi" => Ok(Self::Avi),
            other => Err(CoreError::Validation(format!(
                "Unsupported media format: \"{other}\""
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution / Quality
// ---------------------------------------------------------------------------

/// Target output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "2160p")]
    P2160,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P2160 => "2160p",
        }
    }

    /// Frame height in pixels.
    pub fn height(self) -> u32 {
        match self {
            Self::P360 => 360,
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::P2160 => 2160,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "360p" => Ok(Self::P360),
            "480p" => Ok(Self::P480),
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            "2160p" | "4k" => Ok(Self::P2160),
            other => Err(CoreError::Validation(format!(
                "Unsupported resolution: \"{other}\""
            ))),
        }
    }
}

/// Encoding quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// Rough output-to-input size ratio for this preset.
    pub fn size_ratio(self) -> f64 {
        match self {
            Self::Low => 0.35,
            Self::Medium => 0.6,
            Self::High => 0.85,
        }
    }
}

// ---------------------------------------------------------------------------
// MediaContent
// ---------------------------------------------------------------------------

/// A media item submitted for processing.
#[derive(Debug, Clone)]
pub struct MediaContent {
    /// Original file name; also the source reference recorded on the job.
    pub name: String,
    pub format: MediaFormat,
    pub duration_secs: Option<f64>,
    pub resolution: Option<Resolution>,
    pub data: Vec<u8>,
}

impl MediaContent {
    /// Wrap raw bytes, inferring the format from the file name.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Result<Self, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::Validation("Content name must not be empty".into()));
        }
        let format = MediaFormat::from_file_name(&name).ok_or_else(|| {
            CoreError::Validation(format!("Cannot determine media format of \"{name}\""))
        })?;
        Ok(Self {
            name,
            format,
            duration_secs: None,
            resolution: None,
            data,
        })
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

// ---------------------------------------------------------------------------
// ProcessingOptions
// ---------------------------------------------------------------------------

/// Bandwidth- and accessibility-oriented processing choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationFlags {
    /// Encode for small screens and constrained mobile data first.
    pub mobile_first: bool,
    /// Languages to burn supplementary subtitles for (ISO 639-1).
    pub subtitle_languages: Vec<String>,
    /// Downmix and compress the audio track.
    pub low_bandwidth_audio: bool,
    /// Produce small, heavily compressed preview thumbnails.
    pub data_saver_thumbnails: bool,
}

impl Default for OptimizationFlags {
    fn default() -> Self {
        Self {
            mobile_first: true,
            subtitle_languages: vec!["sw".to_string()],
            low_bandwidth_audio: true,
            data_saver_thumbnails: true,
        }
    }
}

/// Caller-supplied processing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Target resolution; the input resolution is kept when `None`.
    pub resolution: Option<Resolution>,
    /// Output container; defaults to MP4.
    pub output_format: Option<MediaFormat>,
    pub quality: Quality,
    pub optimizations: OptimizationFlags,
}

impl ProcessingOptions {
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_optimizations(mut self, optimizations: OptimizationFlags) -> Self {
        self.optimizations = optimizations;
        self
    }

    pub fn output_format(&self) -> MediaFormat {
        self.output_format.unwrap_or(MediaFormat::Mp4)
    }

    /// The resolution actually produced, after mobile-first capping at 720p.
    pub fn effective_resolution(&self) -> Option<Resolution> {
        match self.resolution {
            Some(r) if self.optimizations.mobile_first && r > Resolution::P720 => {
                Some(Resolution::P720)
            }
            other => other,
        }
    }
}
