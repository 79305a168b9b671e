// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::news::{MediaSource, NewsProjection};

/// Denormalized news record as stored in the search index.
///
/// ```json
/// {
///   "news_id": "3f0c…",
///   "title": "…", "content": "…", "abstract": null,
///   "author": "…", "author_description": null,
///   "media_source": {"id": "…", "name": "latercera", "country": "chile"},
///   "published_date": "2025-09-17T02:01:00Z",
///   "published_ts": 1758074460,
///   "url": "https://latercera.com/…",
///   "multimedia": ["https://…"],
///   "tags": ["economia", "politica"],
///   "status": "indexed",
///   "indexed_at": "2025-09-17T02:05:13.120Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub news_id: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "abstract")]
    pub summary: Option<String>,
    pub author: Option<String>,
    pub author_description: Option<String>,
    pub media_source: Option<MediaSource>,
    pub published_date: DateTime<Utc>,
    /// `published_date` as epoch seconds, for numeric range queries
    pub published_ts: i64,
    pub url: String,
    pub multimedia: Vec<String>,
    pub tags: Vec<String>,
    pub status: String,
    pub indexed_at: DateTime<Utc>,
}

impl SearchDocument {
    pub fn from_projection(projection: NewsProjection, indexed_at: DateTime<Utc>) -> Self {
        Self {
            news_id: projection.id,
            title: projection.title,
            content: projection.body,
            summary: projection.r#abstract,
            author: projection.author,
            author_description: projection.author_bio,
            media_source: projection.media_source,
            published_ts: projection.published_at.timestamp(),
            published_date: projection.published_at,
            url: projection.url,
            multimedia: projection.multimedia,
            tags: projection.tags,
            status: projection.status,
            indexed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn projection() -> NewsProjection {
        NewsProjection {
            id: "n1".into(),
            title: "Title".into(),
            body: "Body".into(),
            r#abstract: None,
            author: Some("Ana".into()),
            author_bio: Some("Reporter".into()),
            published_at: Utc.with_ymd_and_hms(2025, 9, 17, 2, 1, 0).unwrap(),
            url: "https://latercera.com/story".into(),
            status: "indexed".into(),
            media_source: Some(MediaSource {
                id: "m1".into(),
                name: "latercera".into(),
                country: "chile".into(),
            }),
            multimedia: vec!["https://cdn/1.jpg".into()],
            tags: vec!["economia".into(), "politica".into()],
        }
    }

    #[test]
    fn test_wire_shape() {
        let indexed_at = Utc.with_ymd_and_hms(2025, 9, 17, 2, 5, 0).unwrap();
        let doc = SearchDocument::from_projection(projection(), indexed_at);
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["news_id"], "n1");
        assert_eq!(json["content"], "Body");
        assert!(json["abstract"].is_null());
        assert_eq!(json["author_description"], "Reporter");
        assert_eq!(json["media_source"]["name"], "latercera");
        assert_eq!(json["published_date"], "2025-09-17T02:01:00Z");
        assert_eq!(json["published_ts"], 1_758_074_460);
        assert_eq!(json["media_source"]["country"], "chile");
        assert_eq!(json["tags"], serde_json::json!(["economia", "politica"]));
        assert_eq!(json["indexed_at"], "2025-09-17T02:05:00Z");
    }

    #[test]
    fn test_missing_media_source_is_null() {
        let mut p = projection();
        p.media_source = None;
        let doc = SearchDocument::from_projection(p, Utc::now());
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["media_source"].is_null());

        let back: SearchDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
