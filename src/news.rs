// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! News data structures.
//!
//! [`RawSubmission`] is the untrusted inbound message body. After the ingest
//! processor normalizes and hashes it, it becomes a [`NewNewsRecord`] that
//! the store persists together with its multimedia and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status given to freshly persisted records.
pub const STATUS_INDEXED: &str = "indexed";

/// Media type recorded when a submission does not name one.
pub const DEFAULT_MEDIA_TYPE: &str = "image";

/// Inbound submission as published on the ingest queue.
///
/// This is the canonical (internationalized) message shape. The older
/// Spanish-named shape (`titulo`, `cuerpo`, `fecha`, ...) is not accepted
/// here and must be translated before it reaches the queue.
///
/// # Example
///
/// ```
/// use newsflow::news::RawSubmission;
///
/// let body = br#"{"url":"https://example.com/a","title":"T","body":"B"}"#;
/// let submission = RawSubmission::from_slice(body).unwrap();
/// assert_eq!(submission.title, "T");
/// assert!(submission.tags.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubmission {
    #[serde(default)]
    pub job_id: Option<String>,
    pub url: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub r#abstract: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_bio: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub multimedia: Vec<String>,
    #[serde(default)]
    pub multimedia_type: Option<String>,
    /// Publication time as written by the source, e.g. `Martes 16 septiembre de 2025 | 23:01`
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

/// Why a message body is not a usable submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Malformed submission JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Required field '{0}' is empty")]
    EmptyField(&'static str),
}

impl RawSubmission {
    /// Decode and validate a message body.
    pub fn from_slice(body: &[u8]) -> Result<Self, SubmissionError> {
        let submission: RawSubmission = serde_json::from_slice(body)?;
        if submission.url.trim().is_empty() {
            return Err(SubmissionError::EmptyField("url"));
        }
        if submission.title.trim().is_empty() {
            return Err(SubmissionError::EmptyField("title"));
        }
        if submission.body.trim().is_empty() {
            return Err(SubmissionError::EmptyField("body"));
        }
        Ok(submission)
    }

    /// Media type for every multimedia URL of this submission.
    pub fn media_type(&self) -> &str {
        self.multimedia_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_MEDIA_TYPE)
    }

    /// Trimmed, lowercased, non-empty tag names with duplicates removed
    /// (first occurrence wins).
    pub fn clean_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

/// A media outlet, keyed by its unique name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub id: String,
    pub name: String,
    pub country: String,
}

/// A multimedia attachment of a news record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multimedia {
    pub url: String,
    pub media_type: String,
}

/// Everything needed to persist one news record atomically.
#[derive(Debug, Clone)]
pub struct NewNewsRecord {
    pub title: String,
    pub body: String,
    pub r#abstract: Option<String>,
    pub author: Option<String>,
    pub author_bio: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Normalized URL
    pub url: String,
    pub url_hash: String,
    pub content_hash: String,
    pub media_source_id: String,
    pub multimedia: Vec<Multimedia>,
    pub tags: Vec<String>,
}

/// What the dedup lookup knows about an already-persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingNews {
    pub id: String,
    pub content_hash: String,
}

/// A persisted record joined with its media source, multimedia and tags.
///
/// This is what the sync processor projects into a search document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsProjection {
    pub id: String,
    pub title: String,
    pub body: String,
    pub r#abstract: Option<String>,
    pub author: Option<String>,
    pub author_bio: Option<String>,
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub status: String,
    pub media_source: Option<MediaSource>,
    pub multimedia: Vec<String>,
    pub tags: Vec<String>,
}
