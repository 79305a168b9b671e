// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::document::SearchDocument;
use super::query::NewsQuery;
use super::traits::{DeleteOutcome, SearchError, SearchIndexClient};

/// Search index held in a `DashMap`, keyed by news ID.
pub struct InMemorySearchIndex {
    documents: DashMap<String, SearchDocument>,
    unavailable: AtomicBool,
    upserts: AtomicUsize,
}

impl InMemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            unavailable: AtomicBool::new(false),
            upserts: AtomicUsize::new(0),
        }
    }

    /// Make every operation fail, or stop doing so.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Successful upserts so far, including overwrites.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), SearchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SearchError::Backend("search index unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndexClient for InMemorySearchIndex {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        self.check_available()
    }

    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError> {
        self.check_available()?;
        self.documents.insert(document.news_id.clone(), document.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, news_id: &str) -> Result<DeleteOutcome, SearchError> {
        self.check_available()?;
        Ok(match self.documents.remove(news_id) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn get(&self, news_id: &str) -> Result<Option<SearchDocument>, SearchError> {
        self.check_available()?;
        Ok(self.documents.get(news_id).map(|r| r.value().clone()))
    }

    async fn search(&self, query: &NewsQuery, limit: usize) -> Result<Vec<String>, SearchError> {
        self.check_available()?;
        let mut hits: Vec<(i64, String)> = self
            .documents
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| (r.value().published_ts, r.key().clone()))
            .collect();
        hits.sort_by(|a, b| b.cmp(a));
        Ok(hits.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::MediaSource;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, title: &str) -> SearchDocument {
        SearchDocument {
            news_id: id.into(),
            title: title.into(),
            content: "Body".into(),
            summary: None,
            author: None,
            author_description: None,
            media_source: None,
            published_date: Utc::now(),
            published_ts: Utc::now().timestamp(),
            url: "https://example.com/a".into(),
            multimedia: vec![],
            tags: vec![],
            status: "indexed".into(),
            indexed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_key() {
        let index = InMemorySearchIndex::new();
        index.upsert(&doc("n1", "first")).await.unwrap();
        index.upsert(&doc("n1", "second")).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.upsert_count(), 2);
        assert_eq!(index.get("n1").await.unwrap().unwrap().title, "second");
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let index = InMemorySearchIndex::new();
        index.upsert(&doc("n1", "t")).await.unwrap();

        assert_eq!(index.delete("n1").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(index.delete("n1").await.unwrap(), DeleteOutcome::NotFound);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let index = InMemorySearchIndex::new();
        index.set_unavailable(true);
        assert!(index.upsert(&doc("n1", "t")).await.is_err());
        assert!(index.ensure_index().await.is_err());
    }

    fn dated(id: &str, country: &str, day: u32) -> SearchDocument {
        let published = Utc.with_ymd_and_hms(2025, 9, day, 12, 0, 0).unwrap();
        SearchDocument {
            media_source: Some(MediaSource {
                id: format!("m-{country}"),
                name: format!("diario-{country}"),
                country: country.into(),
            }),
            published_date: published,
            published_ts: published.timestamp(),
            ..doc(id, "t")
        }
    }

    #[tokio::test]
    async fn test_search_by_country_and_date_range() {
        let index = InMemorySearchIndex::new();
        index.upsert(&dated("a", "chile", 10)).await.unwrap();
        index.upsert(&dated("b", "chile", 20)).await.unwrap();
        index.upsert(&dated("c", "peru", 15)).await.unwrap();
        index.upsert(&doc("d", "no source")).await.unwrap();

        let chile = index.search(&NewsQuery::new().country("Chile"), 10).await.unwrap();
        assert_eq!(chile, vec!["b", "a"]);

        let from = Utc.with_ymd_and_hms(2025, 9, 12, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 9, 20, 12, 0, 0).unwrap();
        let ranged = index
            .search(&NewsQuery::new().published_between(Some(from), Some(to)), 10)
            .await
            .unwrap();
        assert_eq!(ranged, vec!["b", "c"]);

        let both = NewsQuery::new().country("chile").published_between(Some(from), None);
        assert_eq!(index.search(&both, 10).await.unwrap(), vec!["b"]);
        assert_eq!(index.search(&NewsQuery::new(), 2).await.unwrap().len(), 2);
    }
}
