// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::news::{ExistingNews, MediaSource, NewNewsRecord, NewsProjection};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    /// Another writer already persisted a record with this URL hash.
    #[error("News with url_hash {0} already exists")]
    DuplicateUrl(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Relational store of news records, media sources and tags.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Dedup lookup by normalized-URL hash.
    async fn find_by_url_hash(&self, url_hash: &str) -> Result<Option<ExistingNews>, StorageError>;

    /// Return the media source named `name`, creating it with `country` if
    /// it does not exist. Concurrent callers converge on one row.
    async fn get_or_create_media_source(&self, name: &str, country: &str) -> Result<MediaSource, StorageError>;

    /// Persist the record, its multimedia items and its tag associations in
    /// one transaction, returning the new record ID. Nothing is written if
    /// any part fails. A record with the same `url_hash` yields
    /// [`StorageError::DuplicateUrl`].
    async fn insert_news(&self, record: &NewNewsRecord) -> Result<String, StorageError>;

    /// The record joined with its media source, multimedia URLs and tag
    /// names (sorted), or `None` if no record has this ID.
    async fn load_projection(&self, news_id: &str) -> Result<Option<NewsProjection>, StorageError>;
}
