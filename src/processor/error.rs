// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::news::SubmissionError;
use crate::normalize::UrlError;
use crate::search::SearchError;
use crate::storage::StorageError;
use crate::sync_event::SyncEventError;
use crate::timestamp::TimestampError;

/// Why a delivery could not be processed.
///
/// Input problems are terminal and go straight to the dead-letter queue.
/// Backend problems are transient and get the queue's retry budget.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("Invalid publication date: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("Submission has neither a publication date nor a receive time")]
    MissingTimestamp,
    #[error(transparent)]
    SyncEvent(#[from] SyncEventError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("News record {0} not found")]
    RecordNotFound(String),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Failed to encode sync event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ProcessError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Submission(_)
            | ProcessError::Url(_)
            | ProcessError::Timestamp(_)
            | ProcessError::MissingTimestamp
            | ProcessError::SyncEvent(_)
            | ProcessError::Encode(_) => false,
            // A record missing now may be visible once the writer commits
            ProcessError::RecordNotFound(_) => true,
            ProcessError::Storage(_) | ProcessError::Search(_) | ProcessError::Broker(_) => true,
        }
    }

    /// Label used for the `errors_by_type` metric.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProcessError::Submission(_) => "decode",
            ProcessError::Url(_) => "invalid_url",
            ProcessError::Timestamp(_) | ProcessError::MissingTimestamp => "invalid_date",
            ProcessError::SyncEvent(_) => "invalid_event",
            ProcessError::Storage(_) => "storage",
            ProcessError::RecordNotFound(_) => "not_found",
            ProcessError::Search(_) => "search",
            ProcessError::Encode(_) => "encode",
            ProcessError::Broker(_) => "publish",
        }
    }
}
