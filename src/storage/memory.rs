// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{NewsStore, StorageError};
use crate::news::{ExistingNews, MediaSource, Multimedia, NewNewsRecord, NewsProjection, STATUS_INDEXED};

struct StoredNews {
    record: NewNewsRecord,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    news: HashMap<String, StoredNews>,
    /// url_hash -> news id (the unique index)
    by_url_hash: HashMap<String, String>,
    /// name -> source
    media_sources: HashMap<String, MediaSource>,
    /// name -> tag id
    tags: HashMap<String, String>,
    news_tags: BTreeSet<(String, String)>,
    multimedia: Vec<(String, Multimedia)>,
}

/// Store held in process memory, with switches to inject failures.
///
/// All writes of one [`NewsStore::insert_news`] call happen under a single
/// lock after every check has passed, so a failing call leaves no rows.
pub struct InMemoryNewsStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    hide_existing: AtomicBool,
    failing_tag: Mutex<Option<String>>,
}

impl InMemoryNewsStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            unavailable: AtomicBool::new(false),
            hide_existing: AtomicBool::new(false),
            failing_tag: Mutex::new(None),
        }
    }

    /// Make every operation fail with a backend error, or stop doing so.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make dedup lookups miss, as if another writer committed right after
    /// the lookup. The unique url_hash check in `insert_news` still applies.
    pub fn set_hide_existing(&self, hide: bool) {
        self.hide_existing.store(hide, Ordering::SeqCst);
    }

    /// Fail any insert that would associate the given tag.
    pub fn fail_on_tag(&self, tag: Option<&str>) {
        *self.failing_tag.lock() = tag.map(str::to_string);
    }

    #[must_use]
    pub fn news_count(&self) -> usize {
        self.state.lock().news.len()
    }

    #[must_use]
    pub fn multimedia_count(&self) -> usize {
        self.state.lock().multimedia.len()
    }

    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.state.lock().tags.len()
    }

    #[must_use]
    pub fn tag_association_count(&self) -> usize {
        self.state.lock().news_tags.len()
    }

    #[must_use]
    pub fn media_source_count(&self) -> usize {
        self.state.lock().media_sources.len()
    }

    /// When the record was persisted.
    #[must_use]
    pub fn created_at(&self, news_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().news.get(news_id).map(|n| n.created_at)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Backend("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryNewsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NewsStore for InMemoryNewsStore {
    async fn find_by_url_hash(&self, url_hash: &str) -> Result<Option<ExistingNews>, StorageError> {
        self.check_available()?;
        if self.hide_existing.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let state = self.state.lock();
        Ok(state.by_url_hash.get(url_hash).and_then(|id| {
            state.news.get(id).map(|stored| ExistingNews {
                id: id.clone(),
                content_hash: stored.record.content_hash.clone(),
            })
        }))
    }

    async fn get_or_create_media_source(&self, name: &str, country: &str) -> Result<MediaSource, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let source = state
            .media_sources
            .entry(name.to_string())
            .or_insert_with(|| MediaSource {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                country: country.to_string(),
            });
        Ok(source.clone())
    }

    async fn insert_news(&self, record: &NewNewsRecord) -> Result<String, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();

        if state.by_url_hash.contains_key(&record.url_hash) {
            return Err(StorageError::DuplicateUrl(record.url_hash.clone()));
        }
        if let Some(failing) = self.failing_tag.lock().as_deref() {
            if record.tags.iter().any(|t| t == failing) {
                return Err(StorageError::Backend(format!("injected failure associating tag '{}'", failing)));
            }
        }

        let news_id = Uuid::new_v4().to_string();
        for item in &record.multimedia {
            state.multimedia.push((news_id.clone(), item.clone()));
        }
        for tag in &record.tags {
            let tag_id = state
                .tags
                .entry(tag.clone())
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            state.news_tags.insert((news_id.clone(), tag_id));
        }
        state.by_url_hash.insert(record.url_hash.clone(), news_id.clone());
        state.news.insert(
            news_id.clone(),
            StoredNews {
                record: record.clone(),
                status: STATUS_INDEXED.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(news_id)
    }

    async fn load_projection(&self, news_id: &str) -> Result<Option<NewsProjection>, StorageError> {
        self.check_available()?;
        let state = self.state.lock();
        let Some(stored) = state.news.get(news_id) else {
            return Ok(None);
        };
        let record = &stored.record;

        let media_source = state
            .media_sources
            .values()
            .find(|s| s.id == record.media_source_id)
            .cloned();
        let multimedia = state
            .multimedia
            .iter()
            .filter(|(id, _)| id == news_id)
            .map(|(_, m)| m.url.clone())
            .collect();
        let mut tags: Vec<String> = state
            .tags
            .iter()
            .filter(|(_, tag_id)| state.news_tags.contains(&(news_id.to_string(), (*tag_id).clone())))
            .map(|(name, _)| name.clone())
            .collect();
        tags.sort();

        Ok(Some(NewsProjection {
            id: news_id.to_string(),
            title: record.title.clone(),
            body: record.body.clone(),
            r#abstract: record.r#abstract.clone(),
            author: record.author.clone(),
            author_bio: record.author_bio.clone(),
            published_at: record.published_at,
            url: record.url.clone(),
            status: stored.status.clone(),
            media_source,
            multimedia,
            tags,
        }))
    }
}
