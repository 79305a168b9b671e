// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync stage: projects persisted records into the search index.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, Span};

use super::{settle, MessageHandler, MessageOutcome, ProcessError};
use crate::broker::{BrokerError, Delivery, MessageBroker};
use crate::config::PipelineConfig;
use crate::dead_letter::RetryController;
use crate::metrics::PipelineMetrics;
use crate::search::{DeleteOutcome, SearchDocument, SearchIndexClient};
use crate::storage::NewsStore;
use crate::sync_event::{SyncAction, SyncEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Indexed,
    Deleted,
    /// Delete of a document that was not in the index.
    AlreadyAbsent,
}

pub struct SyncProcessor {
    store: Arc<dyn NewsStore>,
    index: Arc<dyn SearchIndexClient>,
    retry: RetryController,
    metrics: Arc<PipelineMetrics>,
}

impl SyncProcessor {
    pub async fn new(
        store: Arc<dyn NewsStore>,
        index: Arc<dyn SearchIndexClient>,
        broker: Arc<dyn MessageBroker>,
        config: &PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, BrokerError> {
        let retry = RetryController::new(broker, &config.sync_queue, config.max_retries, Arc::clone(&metrics)).await?;
        Ok(Self {
            store,
            index,
            retry,
            metrics,
        })
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.retry
    }

    #[tracing::instrument(skip_all, fields(news_id, action))]
    pub async fn process(&self, body: &[u8]) -> Result<SyncOutcome, ProcessError> {
        let event = SyncEvent::from_slice(body)?;
        let span = Span::current();
        span.record("news_id", event.news_id.as_str());
        span.record("action", event.action.as_str());

        match event.action {
            SyncAction::Index | SyncAction::Update => {
                let projection = self
                    .store
                    .load_projection(&event.news_id)
                    .await?
                    .ok_or_else(|| ProcessError::RecordNotFound(event.news_id.clone()))?;
                let document = SearchDocument::from_projection(projection, Utc::now());
                self.index.upsert(&document).await?;
                info!(tags = document.tags.len(), "Search document upserted");
                Ok(SyncOutcome::Indexed)
            }
            SyncAction::Delete => match self.index.delete(&event.news_id).await? {
                DeleteOutcome::Deleted => {
                    info!("Search document deleted");
                    Ok(SyncOutcome::Deleted)
                }
                DeleteOutcome::NotFound => {
                    debug!("Search document already absent");
                    Ok(SyncOutcome::AlreadyAbsent)
                }
            },
        }
    }
}

#[async_trait]
impl MessageHandler for SyncProcessor {
    async fn handle(&self, delivery: &Delivery) -> MessageOutcome {
        self.metrics.record_received();
        let started = Instant::now();
        let result = self.process(&delivery.body).await;
        settle(&self.retry, &self.metrics, delivery, started, result).await
    }
}
