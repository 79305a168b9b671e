// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RediSearch index definitions.
//!
//! # RediSearch Index Creation
//!
//! ```text
//! FT.CREATE idx:news
//!   ON JSON
//!   PREFIX 1 news:
//!   SCHEMA
//!     $.title AS title TEXT
//!     $.content AS content TEXT
//!     $.abstract AS abstract TEXT
//!     $.author AS author TEXT SORTABLE
//!     $.media_source.name AS media_source TAG
//!     $.media_source.country AS country TAG
//!     $.published_ts AS published_ts NUMERIC SORTABLE
//!     $.tags[*] AS tags TAG
//!     $.status AS status TAG
//! ```

/// Search index definition
#[derive(Debug, Clone)]
pub struct SearchIndex {
    /// Index name (will be prefixed with "idx:")
    pub name: String,
    /// Key prefix this index covers (e.g., "news:")
    pub prefix: String,
    /// Field definitions for the index
    pub fields: Vec<SearchField>,
}

impl SearchIndex {
    /// Create a new search index definition
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            fields: Vec::new(),
        }
    }

    /// The schema news documents are indexed with.
    pub fn news(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(name, prefix)
            .text("title")
            .text("content")
            .text("abstract")
            .text_sortable("author")
            .tag_at("media_source", "$.media_source.name")
            .tag_at("country", "$.media_source.country")
            .numeric_sortable("published_ts")
            .tag_at("tags", "$.tags[*]")
            .tag("status")
    }

    /// `idx:<name>`
    pub fn index_name(&self) -> String {
        format!("idx:{}", self.name)
    }

    /// Redis key of a document
    pub fn document_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Add a text field
    pub fn text(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField::new(name, None, SearchFieldType::Text, false));
        self
    }

    /// Add a sortable text field
    pub fn text_sortable(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField::new(name, None, SearchFieldType::Text, true));
        self
    }

    /// Add a tag field
    pub fn tag(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField::new(name, None, SearchFieldType::Tag, false));
        self
    }

    /// Add a tag field with custom JSON path
    pub fn tag_at(mut self, name: impl Into<String>, json_path: impl Into<String>) -> Self {
        self.fields
            .push(SearchField::new(name, Some(json_path.into()), SearchFieldType::Tag, false));
        self
    }

    /// Add a sortable numeric field
    pub fn numeric_sortable(mut self, name: impl Into<String>) -> Self {
        self.fields.push(SearchField::new(name, None, SearchFieldType::Numeric, true));
        self
    }

    /// Generate the FT.CREATE command arguments
    pub fn to_ft_create_args(&self) -> Vec<String> {
        let mut args = vec![
            self.index_name(),
            "ON".to_string(),
            "JSON".to_string(),
            "PREFIX".to_string(),
            "1".to_string(),
            self.prefix.clone(),
            "SCHEMA".to_string(),
        ];

        for field in &self.fields {
            args.extend(field.to_schema_args());
        }

        args
    }
}

/// Search field definition
#[derive(Debug, Clone)]
pub struct SearchField {
    /// Field name (used in queries)
    pub name: String,
    /// JSON path (defaults to $.{name})
    pub json_path: Option<String>,
    pub field_type: SearchFieldType,
    pub sortable: bool,
}

impl SearchField {
    fn new(name: impl Into<String>, json_path: Option<String>, field_type: SearchFieldType, sortable: bool) -> Self {
        Self {
            name: name.into(),
            json_path,
            field_type,
            sortable,
        }
    }

    fn to_schema_args(&self) -> Vec<String> {
        let json_path = self
            .json_path
            .clone()
            .unwrap_or_else(|| format!("$.{}", self.name));

        let mut args = vec![
            json_path,
            "AS".to_string(),
            self.name.clone(),
            self.field_type.to_string(),
        ];

        if self.sortable {
            args.push("SORTABLE".to_string());
        }

        args
    }
}

/// Search field types used by the news index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFieldType {
    /// Full-text searchable field
    Text,
    /// Tag field (exact match, supports OR)
    Tag,
    /// Numeric field (range queries)
    Numeric,
}

impl std::fmt::Display for SearchFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchFieldType::Text => write!(f, "TEXT"),
            SearchFieldType::Tag => write!(f, "TAG"),
            SearchFieldType::Numeric => write!(f, "NUMERIC"),
        }
    }
}
