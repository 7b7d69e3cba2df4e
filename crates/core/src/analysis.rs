//! Keyword-based cultural tagging and audience classification.
//!
//! This is a placeholder heuristic: free text is lower-cased, split into
//! words, and matched against a fixed vocabulary of Kenyan themes. A real classifier can be
//! plugged in by implementing [`ContentAnalyzer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{JobMetadata, TargetAudience};
use crate::media::MediaContent;

/// Cultural tag and the keywords that imply it.
///
/// Order matters: it is the order tags are reported in.
pub const CULTURAL_VOCABULARY: &[(&str, &[&str])] = &[
    (
        "tourism",
        &["tourism", "tourist", "travel", "holiday", "beach", "diani", "mombasa", "lamu", "hotel"],
    ),
    (
        "wildlife",
        &["wildlife", "safari", "maasai mara", "amboseli", "tsavo", "lion", "elephant", "migration"],
    ),
    (
        "culture",
        &["culture", "heritage", "tradition", "maasai", "kikuyu", "luo", "samburu", "ceremony"],
    ),
    ("music", &["music", "benga", "gengetone", "taarab", "dance", "concert"]),
    ("food", &["food", "nyama choma", "ugali", "chapati", "cuisine", "recipe"]),
    ("sports", &["sports", "athletics", "marathon", "rugby", "football", "runner"]),
    (
        "business",
        &["business", "startup", "mpesa", "m-pesa", "market", "entrepreneur", "fintech"],
    ),
    ("language", &["swahili", "kiswahili", "sheng"]),
    ("urban", &["nairobi", "kisumu", "nakuru", "eldoret", "city"]),
];

/// Return every cultural tag whose keywords appear in `text`.
///
/// Keywords match whole words only, so "lion" does not match "million".
/// Anything that is not alphanumeric separates words: "M-Pesa",
/// "m_pesa" and "m pesa" all match the keyword "m-pesa".
pub fn match_cultural_tags(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let words = split_words(&lowered);
    CULTURAL_VOCABULARY
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| contains_phrase(&words, kw)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}

fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether `keyword`'s words occur consecutively in `words`.
fn contains_phrase(words: &[&str], keyword: &str) -> bool {
    let phrase = split_words(keyword);
    !phrase.is_empty() && words.windows(phrase.len()).any(|window| window == phrase.as_slice())
}

/// Derive cultural tags from a job's title, description and tags.
pub fn derive_cultural_tags(metadata: &JobMetadata) -> Vec<String> {
    let text = format!(
        "{} {} {}",
        metadata.title,
        metadata.description,
        metadata.tags.join(" ")
    );
    match_cultural_tags(&text)
}

/// Pick the audience implied by a set of cultural tags.
pub fn classify_audience(cultural_tags: &[String]) -> TargetAudience {
    let has = |tag: &str| cultural_tags.iter().any(|t| t == tag);
    if has("tourism") || has("wildlife") {
        TargetAudience::Tourists
    } else if has("business") {
        TargetAudience::Business
    } else if has("music") || has("sports") {
        TargetAudience::Youth
    } else if has("language") || has("culture") {
        TargetAudience::Local
    } else {
        TargetAudience::General
    }
}

/// Fill in the derived fields of `metadata` in place.
pub fn enrich_metadata(metadata: &mut JobMetadata) {
    metadata.cultural_tags = derive_cultural_tags(metadata);
    metadata.target_audience = classify_audience(&metadata.cultural_tags);
}

// ---------------------------------------------------------------------------
// AnalysisResult / ContentAnalyzer
// ---------------------------------------------------------------------------

/// Derived analysis of a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub cultural_tags: Vec<String>,
    pub target_audience: TargetAudience,
    pub content_category: String,
    /// 0.0 (no signal) to 1.0.
    pub confidence: f32,
    /// Spoken language, when detectable.
    pub language: Option<String>,
}

impl AnalysisResult {
    /// Result substituted when analysis fails: no tags, general audience,
    /// zero confidence.
    pub fn neutral() -> Self {
        Self {
            cultural_tags: Vec::new(),
            target_audience: TargetAudience::General,
            content_category: "general".to_string(),
            confidence: 0.0,
            language: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }
}

/// Produces an [`AnalysisResult`] for a media item.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, content: &MediaContent) -> Result<AnalysisResult, CoreError>;
}

/// Default analyzer: keyword matching over the file name.
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

#[async_trait]
impl ContentAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, content: &MediaContent) -> Result<AnalysisResult, CoreError> {
        if content.data.is_empty() {
            return Err(CoreError::Analysis(format!(
                "\"{}\" has no data to analyze",
                content.name
            )));
        }

        let cultural_tags = match_cultural_tags(&content.name);
        let target_audience = classify_audience(&cultural_tags);
        let content_category = cultural_tags
            .first()
            .cloned()
            .unwrap_or_else(|| "general".to_string());
        let confidence = (cultural_tags.len() as f32 * 0.25).min(1.0);
        let language = cultural_tags
            .iter()
            .any(|t| t == "language")
            .then(|| "sw".to_string());

        Ok(AnalysisResult {
            cultural_tags,
            target_audience,
            content_category,
            confidence,
            language,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
