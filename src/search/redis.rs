// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RediSearch backend (Redis Stack).
//!
//! Documents are RedisJSON values at `<prefix><news_id>`; the index created
//! by [`SearchIndexClient::ensure_index`] picks them up on write, so an
//! upsert is searchable as soon as `JSON.SET` returns.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};
use tracing::{debug, info};

use super::document::SearchDocument;
use super::index_manager::SearchIndex;
use super::query::NewsQuery;
use super::traits::{DeleteOutcome, SearchError, SearchIndexClient};
use crate::resilience::retry::{retry, RetryConfig};

fn backend(e: redis::RedisError) -> SearchError {
    SearchError::Backend(e.to_string())
}

pub struct RedisSearchIndex {
    connection: ConnectionManager,
    index: SearchIndex,
}

impl RedisSearchIndex {
    /// Connect with startup-mode retry. `index_name` becomes `idx:<index_name>`.
    pub async fn connect(connection_string: &str, index_name: &str, key_prefix: &str) -> Result<Self, SearchError> {
        let client = Client::open(connection_string).map_err(backend)?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self {
            connection,
            index: SearchIndex::news(index_name, key_prefix),
        })
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }
}

#[async_trait]
impl SearchIndexClient for RedisSearchIndex {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        let args = self.index.to_ft_create_args();
        let mut conn = self.connection.clone();

        let result: Result<(), redis::RedisError> = cmd("FT.CREATE").arg(&args).query_async(&mut conn).await;
        match result {
            Ok(()) => {
                info!(index = %args[0], prefix = %self.index.prefix, "Search index created");
                Ok(())
            }
            Err(e) if e.to_string().contains("Index already exists") => {
                debug!(index = %args[0], "Search index already exists");
                Ok(())
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError> {
        let json = serde_json::to_string(document)?;
        let key = self.index.document_key(&document.news_id);
        let mut conn = self.connection.clone();

        // JSON.SET key $ <json>
        let _: () = cmd("JSON.SET")
            .arg(&key)
            .arg("$")
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, news_id: &str) -> Result<DeleteOutcome, SearchError> {
        let key = self.index.document_key(news_id);
        let mut conn = self.connection.clone();

        let removed: i64 = cmd("DEL").arg(&key).query_async(&mut conn).await.map_err(backend)?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn get(&self, news_id: &str) -> Result<Option<SearchDocument>, SearchError> {
        let key = self.index.document_key(news_id);
        let mut conn = self.connection.clone();

        let json: Option<String> = cmd("JSON.GET").arg(&key).query_async(&mut conn).await.map_err(backend)?;
        json.map(|s| serde_json::from_str(&s).map_err(SearchError::from))
            .transpose()
    }

    async fn search(&self, query: &NewsQuery, limit: usize) -> Result<Vec<String>, SearchError> {
        let index = self.index.index_name();
        let query_str = query.to_redisearch();
        debug!(index = %index, query = %query_str, "FT.SEARCH");
        let mut conn = self.connection.clone();

        // Reply: [total, key, key, ...]
        let reply: Vec<redis::Value> = cmd("FT.SEARCH")
            .arg(&index)
            .arg(&query_str)
            .arg("NOCONTENT")
            .arg("SORTBY")
            .arg("published_ts")
            .arg("DESC")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        reply
            .iter()
            .skip(1)
            .map(|value| {
                let key: String = redis::from_redis_value(value).map_err(backend)?;
                Ok(key
                    .strip_prefix(self.index.prefix.as_str())
                    .map_or_else(|| key.clone(), str::to_string))
            })
            .collect()
    }
}
