// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search projection of news records.
//!
//! The sync processor turns each persisted record into a
//! [`SearchDocument`] and writes it through [`SearchIndexClient`], keyed by
//! news ID so replays overwrite instead of duplicating.
//!
//! # Query Language (RediSearch syntax)
//!
//! ```text
//! FT.SEARCH idx:news '@title:elecciones'
//! FT.SEARCH idx:news '@media_source:{latercera}'
//! FT.SEARCH idx:news '@tags:{economia|politica} @content:cobre'
//! FT.SEARCH idx:news '@country:{chile} @published_ts:[1758074460 +inf]'
//! ```
//!
//! [`NewsQuery`] builds the country, tag, date-range and text forms.

mod document;
mod index_manager;
mod memory;
mod query;
mod redis;
mod traits;

pub use document::SearchDocument;
pub use index_manager::{SearchField, SearchFieldType, SearchIndex};
pub use memory::InMemorySearchIndex;
pub use query::{NewsFilter, NewsQuery};
pub use redis::RedisSearchIndex;
pub use traits::{DeleteOutcome, SearchError, SearchIndexClient};
