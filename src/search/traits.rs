// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use super::document::SearchDocument;
use super::query::NewsQuery;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search backend error: {0}")]
    Backend(String),
    #[error("Search document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Keyed document store backing full-text search. Keys are news IDs, so
/// repeated upserts of the same record converge on one document.
#[async_trait]
pub trait SearchIndexClient: Send + Sync {
    /// Create the index if it does not exist yet.
    async fn ensure_index(&self) -> Result<(), SearchError>;

    /// Insert or replace the document. Visible to searches on return.
    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError>;

    async fn delete(&self, news_id: &str) -> Result<DeleteOutcome, SearchError>;

    async fn get(&self, news_id: &str) -> Result<Option<SearchDocument>, SearchError>;

    /// News IDs matching `query`, newest publication first.
    async fn search(&self, query: &NewsQuery, limit: usize) -> Result<Vec<String>, SearchError>;
}
