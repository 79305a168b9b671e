// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync events carried from the ingest stage to the search projector.
//!
//! Wire format:
//! ```json
//! {"news_id": "3f0c…", "action": "index"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Index,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Index => "index",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = SyncEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(SyncAction::Index),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(SyncEventError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncEventError {
    #[error("Malformed sync event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Sync event has an empty news_id")]
    MissingNewsId,
    #[error("Unknown sync action: {0}")]
    UnknownAction(String),
}

/// Wire representation; `action` stays a string so an unknown value is
/// reported as such rather than as a generic JSON error.
#[derive(Serialize, Deserialize)]
struct WireSyncEvent {
    news_id: String,
    action: String,
}

/// A request to (re)project or remove one news record in the search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub news_id: String,
    pub action: SyncAction,
}

impl SyncEvent {
    pub fn index(news_id: impl Into<String>) -> Self {
        Self { news_id: news_id.into(), action: SyncAction::Index }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, SyncEventError> {
        let wire: WireSyncEvent = serde_json::from_slice(body)?;
        if wire.news_id.trim().is_empty() {
            return Err(SyncEventError::MissingNewsId);
        }
        Ok(Self {
            news_id: wire.news_id,
            action: wire.action.parse()?,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireSyncEvent {
            news_id: self.news_id.clone(),
            action: self.action.as_str().to_string(),
        })
    }
}
