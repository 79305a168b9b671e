// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed filters over the news index, rendered to RediSearch query syntax.

use chrono::{DateTime, Utc};

use super::document::SearchDocument;

/// One filter clause. Clauses in a [`NewsQuery`] are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum NewsFilter {
    /// Media source country, matched exactly
    Country(String),
    /// Any of the given tags
    Tags(Vec<String>),
    /// Publication time range; an open end is unbounded
    PublishedBetween {
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
    /// Full-text match on title and content
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsQuery {
    filters: Vec<NewsFilter>,
}

impl NewsQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.filters.push(NewsFilter::Country(country.into()));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(NewsFilter::Tags(tags.into_iter().map(Into::into).collect()));
        self
    }

    pub fn published_between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.filters.push(NewsFilter::PublishedBetween { from, to });
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.filters.push(NewsFilter::Text(text.into()));
        self
    }

    pub fn filters(&self) -> &[NewsFilter] {
        &self.filters
    }

    /// Evaluate against a document the way the index would.
    pub fn matches(&self, document: &SearchDocument) -> bool {
        self.filters.iter().all(|f| f.matches(document))
    }

    /// Render for `FT.SEARCH`. An empty query matches every document.
    #[must_use]
    pub fn to_redisearch(&self) -> String {
        if self.filters.is_empty() {
            return "*".to_string();
        }
        self.filters.iter().map(render).collect::<Vec<_>>().join(" ")
    }
}

impl NewsFilter {
    fn matches(&self, document: &SearchDocument) -> bool {
        match self {
            // TAG fields compare case-insensitively
            NewsFilter::Country(country) => document
                .media_source
                .as_ref()
                .is_some_and(|m| m.country.to_lowercase() == country.to_lowercase()),
            NewsFilter::Tags(tags) => tags
                .iter()
                .any(|t| document.tags.iter().any(|d| d.to_lowercase() == t.to_lowercase())),
            NewsFilter::PublishedBetween { from, to } => {
                from.map_or(true, |f| document.published_ts >= f.timestamp())
                    && to.map_or(true, |t| document.published_ts <= t.timestamp())
            }
            NewsFilter::Text(text) => {
                let needle = text.to_lowercase();
                document.title.to_lowercase().contains(&needle) || document.content.to_lowercase().contains(&needle)
            }
        }
    }
}

fn render(filter: &NewsFilter) -> String {
    match filter {
        NewsFilter::Country(country) => format!("@country:{{{}}}", escape_tag(country)),
        NewsFilter::Tags(tags) => {
            let joined = tags.iter().map(|t| escape_tag(t)).collect::<Vec<_>>().join("|");
            format!("@tags:{{{joined}}}")
        }
        NewsFilter::PublishedBetween { from, to } => {
            let min = from.map_or_else(|| "-inf".to_string(), |t| t.timestamp().to_string());
            let max = to.map_or_else(|| "+inf".to_string(), |t| t.timestamp().to_string());
            format!("@published_ts:[{min} {max}]")
        }
        NewsFilter::Text(text) => format!("@title|content:({})", escape_text(text)),
    }
}

/// Tag values escape spaces too, so a multi-word tag stays one value.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '@' | ':' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '%' | '-' | '+' | ',' | '.' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '@' | ':' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '%' | '-' | '+') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
