// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backend for news records (MySQL or SQLite through sqlx `Any`).
//!
//! Schema:
//! ```sql
//! CREATE TABLE media_sources (
//!   id VARCHAR(36) PRIMARY KEY,
//!   name VARCHAR(255) NOT NULL UNIQUE,
//!   country VARCHAR(64) NOT NULL,
//!   created_at BIGINT NOT NULL
//! )
//! CREATE TABLE news (
//!   id VARCHAR(36) PRIMARY KEY,
//!   title TEXT, content LONGTEXT, abstract TEXT,
//!   author VARCHAR(255), author_description TEXT,
//!   media_source_id VARCHAR(36),      -- media_sources.id
//!   published_date BIGINT NOT NULL,   -- UTC epoch millis
//!   url TEXT NOT NULL,                -- normalized
//!   url_hash CHAR(64) NOT NULL UNIQUE,
//!   content_hash CHAR(64) NOT NULL,
//!   status VARCHAR(32) NOT NULL,
//!   created_at BIGINT NOT NULL
//! )
//! CREATE TABLE news_multimedia (id, news_id, position, url, media_type)
//! CREATE TABLE tags (id, name UNIQUE)
//! CREATE TABLE news_tags (news_id, tag_id, PRIMARY KEY (news_id, tag_id))
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver hands MySQL TEXT columns back as BLOBs, so text columns
//! are read as `String` first and as UTF-8 bytes second. It also executes
//! one statement per query, so the schema is created table by table.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::{NewsStore, StorageError};
use crate::news::{ExistingNews, MediaSource, NewNewsRecord, NewsProjection, STATUS_INDEXED};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS media_sources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        country TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS news (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        abstract TEXT,
        author TEXT,
        author_description TEXT,
        media_source_id TEXT REFERENCES media_sources(id),
        published_date INTEGER NOT NULL,
        url TEXT NOT NULL,
        url_hash TEXT NOT NULL UNIQUE,
        content_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS news_multimedia (
        id TEXT PRIMARY KEY,
        news_id TEXT NOT NULL REFERENCES news(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        url TEXT NOT NULL,
        media_type TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tags (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS news_tags (
        news_id TEXT NOT NULL REFERENCES news(id) ON DELETE CASCADE,
        tag_id TEXT NOT NULL REFERENCES tags(id),
        PRIMARY KEY (news_id, tag_id)
    )"#,
];

const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS media_sources (
        id VARCHAR(36) PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        country VARCHAR(64) NOT NULL,
        created_at BIGINT NOT NULL
    ) CHARACTER SET utf8mb4"#,
    r#"CREATE TABLE IF NOT EXISTS news (
        id VARCHAR(36) PRIMARY KEY,
        title TEXT NOT NULL,
        content LONGTEXT NOT NULL,
        abstract TEXT,
        author VARCHAR(255),
        author_description TEXT,
        media_source_id VARCHAR(36),
        published_date BIGINT NOT NULL,
        url TEXT NOT NULL,
        url_hash CHAR(64) NOT NULL UNIQUE,
        content_hash CHAR(64) NOT NULL,
        status VARCHAR(32) NOT NULL,
        created_at BIGINT NOT NULL,
        INDEX idx_published_date (published_date),
        CONSTRAINT fk_news_media_source FOREIGN KEY (media_source_id) REFERENCES media_sources(id)
    ) CHARACTER SET utf8mb4"#,
    r#"CREATE TABLE IF NOT EXISTS news_multimedia (
        id VARCHAR(36) PRIMARY KEY,
        news_id VARCHAR(36) NOT NULL,
        position INT NOT NULL,
        url TEXT NOT NULL,
        media_type VARCHAR(32) NOT NULL,
        INDEX idx_multimedia_news (news_id),
        CONSTRAINT fk_multimedia_news FOREIGN KEY (news_id) REFERENCES news(id) ON DELETE CASCADE
    ) CHARACTER SET utf8mb4"#,
    r#"CREATE TABLE IF NOT EXISTS tags (
        id VARCHAR(36) PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE
    ) CHARACTER SET utf8mb4"#,
    r#"CREATE TABLE IF NOT EXISTS news_tags (
        news_id VARCHAR(36) NOT NULL,
        tag_id VARCHAR(36) NOT NULL,
        PRIMARY KEY (news_id, tag_id),
        CONSTRAINT fk_news_tags_news FOREIGN KEY (news_id) REFERENCES news(id) ON DELETE CASCADE,
        CONSTRAINT fk_news_tags_tag FOREIGN KEY (tag_id) REFERENCES tags(id)
    ) CHARACTER SET utf8mb4"#,
];

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || db.message().contains("UNIQUE constraint failed")
                || db.message().contains("Duplicate entry")
        }
        _ => false,
    }
}

/// Read a nullable text column, accepting the BLOB form the Any driver
/// produces for MySQL TEXT.
fn text(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn required_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    text(row, column).ok_or_else(|| StorageError::Backend(format!("column '{}' is NULL or not text", column)))
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Backend(format!("published_date {} out of range", millis)))
}

pub struct SqlNewsStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlNewsStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the schema if needed.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            // Readers don't block the writer
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&store.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        }

        store.init_schema().await?;
        info!(sqlite = is_sqlite, "SQL news store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = if self.is_sqlite { SQLITE_SCHEMA } else { MYSQL_SCHEMA };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    fn insert_media_source_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO media_sources (id, name, country, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO NOTHING"
        } else {
            "INSERT INTO media_sources (id, name, country, created_at) VALUES (?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE name = name"
        }
    }

    fn insert_tag_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO tags (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING"
        } else {
            "INSERT INTO tags (id, name) VALUES (?, ?) ON DUPLICATE KEY UPDATE name = name"
        }
    }

    fn insert_news_tag_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO news_tags (news_id, tag_id) VALUES (?, ?) ON CONFLICT(news_id, tag_id) DO NOTHING"
        } else {
            "INSERT INTO news_tags (news_id, tag_id) VALUES (?, ?) ON DUPLICATE KEY UPDATE tag_id = tag_id"
        }
    }
}

#[async_trait]
impl NewsStore for SqlNewsStore {
    async fn find_by_url_hash(&self, url_hash: &str) -> Result<Option<ExistingNews>, StorageError> {
        let row = sqlx::query("SELECT id, content_hash FROM news WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| {
            Ok(ExistingNews {
                id: required_text(&row, "id")?,
                content_hash: required_text(&row, "content_hash")?,
            })
        })
        .transpose()
    }

    async fn get_or_create_media_source(&self, name: &str, country: &str) -> Result<MediaSource, StorageError> {
        sqlx::query(self.insert_media_source_sql())
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(country)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let row = sqlx::query("SELECT id, name, country FROM media_sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or(StorageError::NotFound)?;

        Ok(MediaSource {
            id: required_text(&row, "id")?,
            name: required_text(&row, "name")?,
            country: required_text(&row, "country")?,
        })
    }

    async fn insert_news(&self, record: &NewNewsRecord) -> Result<String, StorageError> {
        let news_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        // Dropped without commit on any early return, which rolls back
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO news (id, title, content, abstract, author, author_description, media_source_id, \
             published_date, url, url_hash, content_hash, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&news_id)
        .bind(&record.title)
        .bind(&record.body)
        .bind(record.r#abstract.as_deref())
        .bind(record.author.as_deref())
        .bind(record.author_bio.as_deref())
        .bind(&record.media_source_id)
        .bind(record.published_at.timestamp_millis())
        .bind(&record.url)
        .bind(&record.url_hash)
        .bind(&record.content_hash)
        .bind(STATUS_INDEXED)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::DuplicateUrl(record.url_hash.clone())
            } else {
                backend(e)
            }
        })?;

        for (position, item) in record.multimedia.iter().enumerate() {
            sqlx::query("INSERT INTO news_multimedia (id, news_id, position, url, media_type) VALUES (?, ?, ?, ?, ?)")
                .bind(Uuid::new_v4().to_string())
                .bind(&news_id)
                .bind(position as i64)
                .bind(&item.url)
                .bind(&item.media_type)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for tag in &record.tags {
            sqlx::query(self.insert_tag_sql())
                .bind(Uuid::new_v4().to_string())
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

            let tag_row = sqlx::query("SELECT id FROM tags WHERE name = ?")
                .bind(tag)
                .fetch_one(&mut *tx)
                .await
                .map_err(backend)?;
            let tag_id = required_text(&tag_row, "id")?;

            sqlx::query(self.insert_news_tag_sql())
                .bind(&news_id)
                .bind(&tag_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;

        debug!(
            news_id = %news_id,
            multimedia = record.multimedia.len(),
            tags = record.tags.len(),
            "News persisted"
        );
        Ok(news_id)
    }

    async fn load_projection(&self, news_id: &str) -> Result<Option<NewsProjection>, StorageError> {
        let row = sqlx::query(
            "SELECT n.id, n.title, n.content, n.abstract, n.author, n.author_description, n.published_date, \
             n.url, n.status, m.id AS media_id, m.name AS media_name, m.country AS media_country \
             FROM news n LEFT JOIN media_sources m ON m.id = n.media_source_id \
             WHERE n.id = ?",
        )
        .bind(news_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let published_millis: i64 = row.try_get("published_date").map_err(backend)?;
        let media_source = match (text(&row, "media_id"), text(&row, "media_name")) {
            (Some(id), Some(name)) => Some(MediaSource {
                id,
                name,
                country: text(&row, "media_country").unwrap_or_default(),
            }),
            _ => None,
        };

        let multimedia = sqlx::query("SELECT url FROM news_multimedia WHERE news_id = ? ORDER BY position")
            .bind(news_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .iter()
            .map(|r| required_text(r, "url"))
            .collect::<Result<Vec<_>, _>>()?;

        let tags = sqlx::query(
            "SELECT t.name FROM tags t JOIN news_tags nt ON nt.tag_id = t.id WHERE nt.news_id = ? ORDER BY t.name",
        )
        .bind(news_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .iter()
        .map(|r| required_text(r, "name"))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(NewsProjection {
            id: required_text(&row, "id")?,
            title: required_text(&row, "title")?,
            body: required_text(&row, "content")?,
            r#abstract: text(&row, "abstract"),
            author: text(&row, "author"),
            author_bio: text(&row, "author_description"),
            published_at: millis_to_utc(published_millis)?,
            url: required_text(&row, "url")?,
            status: required_text(&row, "status")?,
            media_source,
            multimedia,
            tags,
        }))
    }
}
