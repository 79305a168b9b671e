// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ingest stage: raw submission in, persisted record and sync event out.
//!
//! # Flow
//!
//! ```text
//! decode → normalize URL → parse date → hash → dedup lookup
//!    ├─ hit:  ack (a redelivery also re-publishes the index event)
//!    └─ miss: media source → insert (one transaction) → publish index event → ack
//! ```
//!
//! A first delivery that hits an existing record is discarded. A
//! redelivery (`retry-count > 0` or an operator replay) may belong to an
//! attempt that committed the record and then failed to publish, so its
//! duplicate hit re-publishes the index event. The sync stage upserts by
//! news ID, so that extra event is harmless.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn, Span};

use super::{settle, MessageHandler, MessageOutcome, ProcessError};
use crate::broker::{BrokerError, Delivery, Destination, MessageBroker, OutboundMessage};
use crate::config::PipelineConfig;
use crate::dead_letter::{is_redelivery, QueueTopology, RetryController};
use crate::metrics::PipelineMetrics;
use crate::news::{Multimedia, NewNewsRecord, RawSubmission};
use crate::normalize::{content_hash, media_source_name, normalize_url, url_hash};
use crate::storage::{NewsStore, StorageError};
use crate::sync_event::SyncEvent;
use crate::timestamp::TimestampParser;

/// What happened to a successfully handled submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Newly persisted and announced on the sync queue.
    Persisted { news_id: String },
    /// Already stored under the same URL. `news_id` is `None` when the
    /// duplicate was detected by the insert racing another writer.
    Duplicate {
        news_id: Option<String>,
        content_changed: bool,
    },
}

pub struct IngestProcessor {
    store: Arc<dyn NewsStore>,
    broker: Arc<dyn MessageBroker>,
    parser: Arc<dyn TimestampParser>,
    retry: RetryController,
    sync_queue: String,
    default_country: String,
    metrics: Arc<PipelineMetrics>,
}

impl IngestProcessor {
    /// Provisions the ingest queue's dead-letter topology and the sync
    /// queue (with its own DLX, so the sync worker's declaration matches).
    pub async fn new(
        store: Arc<dyn NewsStore>,
        broker: Arc<dyn MessageBroker>,
        parser: Arc<dyn TimestampParser>,
        config: &PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, BrokerError> {
        let retry = RetryController::new(
            Arc::clone(&broker),
            &config.ingest_queue,
            config.max_retries,
            Arc::clone(&metrics),
        )
        .await?;
        QueueTopology::new(&config.sync_queue).provision(broker.as_ref()).await?;

        Ok(Self {
            store,
            broker,
            parser,
            retry,
            sync_queue: config.sync_queue.clone(),
            default_country: config.default_country.clone(),
            metrics,
        })
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.retry
    }

    /// Run the pipeline for a first delivery without settling it.
    pub async fn process(&self, body: &[u8]) -> Result<IngestOutcome, ProcessError> {
        self.process_attempt(body, false).await
    }

    /// Run the pipeline without settling. `redelivered` marks a message
    /// that went through a retry or replay before.
    #[tracing::instrument(skip_all, fields(job_id, news_id, url_hash, redelivered))]
    pub async fn process_attempt(&self, body: &[u8], redelivered: bool) -> Result<IngestOutcome, ProcessError> {
        let submission = RawSubmission::from_slice(body)?;
        let span = Span::current();
        if let Some(job_id) = &submission.job_id {
            span.record("job_id", job_id.as_str());
        }

        let url = normalize_url(&submission.url)?;
        let published_at = self.published_at(&submission)?;
        let url_hash = url_hash(&url);
        let content_hash = content_hash(&submission.title, &submission.body);
        span.record("url_hash", url_hash.as_str());

        if let Some(existing) = self.store.find_by_url_hash(&url_hash).await? {
            span.record("news_id", existing.id.as_str());
            let content_changed = existing.content_hash != content_hash;
            if content_changed {
                warn!(url = %url, "Duplicate URL with different content, keeping stored version");
                self.metrics.record_content_changed();
            }
            if redelivered {
                self.publish_index_event(&existing.id).await?;
                debug!(url = %url, "Re-announced existing record for a redelivered message");
            }
            self.metrics.record_duplicate();
            info!(url = %url, "Duplicate submission");
            return Ok(IngestOutcome::Duplicate {
                news_id: Some(existing.id),
                content_changed,
            });
        }

        let source = self
            .store
            .get_or_create_media_source(&media_source_name(&url), &self.default_country)
            .await?;

        let media_type = submission.media_type().to_string();
        let record = NewNewsRecord {
            multimedia: submission
                .multimedia
                .iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
                .map(|u| Multimedia {
                    url: u.to_string(),
                    media_type: media_type.clone(),
                })
                .collect(),
            tags: submission.clean_tags(),
            title: submission.title,
            body: submission.body,
            r#abstract: submission.r#abstract,
            author: submission.author,
            author_bio: submission.author_bio,
            published_at,
            url,
            url_hash,
            content_hash,
            media_source_id: source.id,
        };

        let news_id = match self.store.insert_news(&record).await {
            Ok(id) => id,
            Err(StorageError::DuplicateUrl(_)) => {
                // Lost the race to a concurrent writer; its event covers the index
                self.metrics.record_duplicate();
                info!(url = %record.url, "Duplicate detected on insert");
                return Ok(IngestOutcome::Duplicate {
                    news_id: None,
                    content_changed: false,
                });
            }
            Err(e) => return Err(e.into()),
        };
        span.record("news_id", news_id.as_str());

        self.publish_index_event(&news_id).await?;
        info!(
            url = %record.url,
            media_source = %source.name,
            tags = record.tags.len(),
            multimedia = record.multimedia.len(),
            "News persisted"
        );
        Ok(IngestOutcome::Persisted { news_id })
    }

    /// `published` through the configured parser; `received_at` if absent.
    fn published_at(&self, submission: &RawSubmission) -> Result<DateTime<Utc>, ProcessError> {
        match submission.published.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => Ok(self.parser.parse(raw)?.with_timezone(&Utc)),
            None => {
                let received = submission.received_at.ok_or(ProcessError::MissingTimestamp)?;
                debug!("No publication date, using receive time");
                Ok(received)
            }
        }
    }

    async fn publish_index_event(&self, news_id: &str) -> Result<(), ProcessError> {
        let body = SyncEvent::index(news_id).to_vec().map_err(ProcessError::Encode)?;
        self.broker
            .publish(&Destination::Queue(self.sync_queue.clone()), OutboundMessage::json(body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for IngestProcessor {
    async fn handle(&self, delivery: &Delivery) -> MessageOutcome {
        self.metrics.record_received();
        let started = Instant::now();
        let result = self
            .process_attempt(&delivery.body, is_redelivery(&delivery.headers))
            .await;
        settle(&self.retry, &self.metrics, delivery, started, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::dead_letter::{DeadLetterReason, FailureDisposition};
    use crate::storage::InMemoryNewsStore;

    struct Harness {
        broker: InMemoryBroker,
        store: Arc<InMemoryNewsStore>,
        metrics: Arc<PipelineMetrics>,
        processor: IngestProcessor,
    }

    async fn harness() -> Harness {
        let broker = InMemoryBroker::new();
        let store = Arc::new(InMemoryNewsStore::new());
        let metrics = Arc::new(PipelineMetrics::new("ingest"));
        let config = PipelineConfig::default();
        let processor = IngestProcessor::new(
            store.clone(),
            Arc::new(broker.clone()),
            config.timestamp_parser(),
            &config,
            Arc::clone(&metrics),
        )
        .await
        .unwrap();
        Harness { broker, store, metrics, processor }
    }

    fn submission(url: &str) -> Vec<u8> {
        serde_json::json!({
            "job_id": "job-1",
            "url": url,
            "title": "Cobre sube",
            "body": "El precio del cobre subió.",
            "tags": ["economia", " mineria ", "economia", ""],
            "multimedia": ["https://cdn.example.com/1.jpg", "https://cdn.example.com/2.jpg"],
            "published": "Martes 16 septiembre de 2025 | 23:01"
        })
        .to_string()
        .into_bytes()
    }

    async fn deliver(h: &Harness, body: Vec<u8>) -> Delivery {
        h.broker
            .publish(&Destination::Queue("ingestion_queue".into()), OutboundMessage::json(body))
            .await
            .unwrap();
        h.broker.pop("ingestion_queue").unwrap()
    }

    #[tokio::test]
    async fn test_persists_and_publishes_index_event() {
        let h = harness().await;
        let outcome = h.processor.process(&submission("https://www.latercera.com/cobre/")).await.unwrap();

        let IngestOutcome::Persisted { news_id } = outcome else {
            panic!("expected a new record");
        };
        assert_eq!(h.store.news_count(), 1);
        assert_eq!(h.store.multimedia_count(), 2);
        assert_eq!(h.store.tag_association_count(), 2);

        let projection = h.store.load_projection(&news_id).await.unwrap().unwrap();
        assert_eq!(projection.url, "https://latercera.com/cobre");
        assert_eq!(projection.media_source.unwrap().name, "latercera");
        assert_eq!(projection.published_at.to_rfc3339(), "2025-09-17T02:01:00+00:00");

        let events = h.broker.messages("sync_queue");
        assert_eq!(events.len(), 1);
        let event = SyncEvent::from_slice(&events[0].body).unwrap();
        assert_eq!(event, SyncEvent::index(news_id));
    }

    #[tokio::test]
    async fn test_provisions_both_topologies() {
        let h = harness().await;
        assert_eq!(h.broker.dead_letter_exchange_of("ingestion_queue").as_deref(), Some("ingestion_queue_dlx"));
        assert_eq!(h.broker.dead_letter_exchange_of("sync_queue").as_deref(), Some("sync_queue_dlx"));
        assert!(h.broker.has_queue("sync_queue_dlq"));
    }

    #[tokio::test]
    async fn test_duplicate_is_discarded_without_republishing() {
        let h = harness().await;
        h.processor.process(&submission("https://example.com/a")).await.unwrap();
        let outcome = h.processor.process(&submission("https://EXAMPLE.com/a/")).await.unwrap();

        assert!(matches!(
            outcome,
            IngestOutcome::Duplicate { news_id: Some(_), content_changed: false }
        ));
        assert_eq!(h.store.news_count(), 1);
        assert_eq!(h.broker.queue_len("sync_queue"), 1);
        assert_eq!(h.metrics.snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_redelivered_duplicate_reannounces_record() {
        let h = harness().await;
        // Commit succeeds, publish fails: the record exists but was never announced
        h.broker.set_publish_failure("sync_queue", true);
        let err = h.processor.process(&submission("https://example.com/a")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.news_count(), 1);
        assert_eq!(h.broker.queue_len("sync_queue"), 0);

        h.broker.set_publish_failure("sync_queue", false);
        let outcome = h.processor.process_attempt(&submission("https://example.com/a"), true).await.unwrap();

        let IngestOutcome::Duplicate { news_id: Some(news_id), .. } = outcome else {
            panic!("expected a duplicate with the stored id");
        };
        let events = h.broker.messages("sync_queue");
        assert_eq!(events.len(), 1);
        assert_eq!(SyncEvent::from_slice(&events[0].body).unwrap(), SyncEvent::index(news_id));
    }

    #[tokio::test]
    async fn test_handle_reannounces_only_on_retry() {
        let h = harness().await;
        h.processor.process(&submission("https://example.com/a")).await.unwrap();

        let mut message = OutboundMessage::json(submission("https://example.com/a"));
        h.broker
            .publish(&Destination::Queue("ingestion_queue".into()), message.clone())
            .await
            .unwrap();
        let first = h.broker.pop("ingestion_queue").unwrap();
        assert_eq!(h.processor.handle(&first).await, MessageOutcome::Completed);
        assert_eq!(h.broker.queue_len("sync_queue"), 1);

        message
            .headers
            .insert(crate::dead_letter::RETRY_COUNT_HEADER.to_string(), crate::broker::HeaderValue::Int(1));
        h.broker
            .publish(&Destination::Queue("ingestion_queue".into()), message)
            .await
            .unwrap();
        let retried = h.broker.pop("ingestion_queue").unwrap();
        assert_eq!(h.processor.handle(&retried).await, MessageOutcome::Completed);
        assert_eq!(h.broker.queue_len("sync_queue"), 2);
    }

    #[tokio::test]
    async fn test_changed_content_is_flagged_not_updated() {
        let h = harness().await;
        h.processor.process(&submission("https://example.com/a")).await.unwrap();

        let mut changed: serde_json::Value = serde_json::from_slice(&submission("https://example.com/a")).unwrap();
        changed["body"] = "Corrected body".into();
        let outcome = h.processor.process(changed.to_string().as_bytes()).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Duplicate { content_changed: true, .. }));
        assert_eq!(h.metrics.snapshot().content_changed, 1);
        assert_eq!(h.store.news_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_race_is_a_duplicate() {
        let h = harness().await;
        h.processor.process(&submission("https://example.com/a")).await.unwrap();
        h.store.set_hide_existing(true);

        let outcome = h.processor.process(&submission("https://example.com/a")).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Duplicate { news_id: None, content_changed: false });
        assert_eq!(h.store.news_count(), 1);
        assert_eq!(h.broker.queue_len("sync_queue"), 1);
    }

    #[tokio::test]
    async fn test_received_at_fallback() {
        let h = harness().await;
        let body = br#"{"url":"https://example.com/b","title":"T","body":"B","received_at":"2025-09-17T02:05:00Z"}"#;
        let IngestOutcome::Persisted { news_id } = h.processor.process(body).await.unwrap() else {
            panic!("expected a new record");
        };
        let projection = h.store.load_projection(&news_id).await.unwrap().unwrap();
        assert_eq!(projection.published_at.to_rfc3339(), "2025-09-17T02:05:00+00:00");
    }

    #[tokio::test]
    async fn test_missing_dates_are_terminal() {
        let h = harness().await;
        let err = h
            .processor
            .process(br#"{"url":"https://example.com/b","title":"T","body":"B"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::MissingTimestamp));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_input_errors_dead_letter_immediately() {
        let h = harness().await;
        let bad_date = serde_json::json!({
            "url": "https://example.com/c", "title": "T", "body": "B",
            "published": "16/09/2025 23:01"
        });

        for body in [
            b"not json".to_vec(),
            br#"{"url":"ftp://example.com/a","title":"T","body":"B","published":"1 enero de 2025 | 10:00"}"#.to_vec(),
            bad_date.to_string().into_bytes(),
        ] {
            let delivery = deliver(&h, body).await;
            let outcome = h.processor.handle(&delivery).await;
            assert!(matches!(
                outcome,
                MessageOutcome::Failed {
                    disposition: FailureDisposition::DeadLettered { reason: DeadLetterReason::NonRetryable },
                    ..
                }
            ));
        }

        assert_eq!(h.broker.queue_len("ingestion_queue_dlq"), 3);
        assert_eq!(h.broker.queue_len("ingestion_queue"), 0);
        assert_eq!(h.store.news_count(), 0);
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.messages_failed, 3);
        assert_eq!(snapshot.messages_retried, 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_retried() {
        let h = harness().await;
        h.store.set_unavailable(true);

        let delivery = deliver(&h, submission("https://example.com/a")).await;
        let outcome = h.processor.handle(&delivery).await;

        assert_eq!(
            outcome,
            MessageOutcome::Failed {
                error_type: "storage",
                disposition: FailureDisposition::Requeued { attempt: 1 },
            }
        );
        assert_eq!(h.broker.queue_len("ingestion_queue"), 1);
        assert_eq!(h.broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_tag_failure_rolls_back_and_retries() {
        let h = harness().await;
        h.store.fail_on_tag(Some("mineria"));

        let delivery = deliver(&h, submission("https://example.com/a")).await;
        let outcome = h.processor.handle(&delivery).await;

        assert!(matches!(outcome, MessageOutcome::Failed { disposition: FailureDisposition::Requeued { .. }, .. }));
        assert_eq!(h.store.news_count(), 0);
        assert_eq!(h.store.multimedia_count(), 0);
        assert_eq!(h.store.tag_association_count(), 0);
        assert_eq!(h.broker.queue_len("sync_queue"), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_recovers_on_redelivery() {
        let h = harness().await;
        h.broker.set_publish_failure("sync_queue", true);

        let delivery = deliver(&h, submission("https://example.com/a")).await;
        let outcome = h.processor.handle(&delivery).await;
        assert!(matches!(outcome, MessageOutcome::Failed { error_type: "publish", .. }));
        assert_eq!(h.store.news_count(), 1);

        h.broker.set_publish_failure("sync_queue", false);
        let redelivered = h.broker.pop("ingestion_queue").unwrap();
        assert_eq!(h.processor.handle(&redelivered).await, MessageOutcome::Completed);

        assert_eq!(h.store.news_count(), 1);
        assert_eq!(h.broker.queue_len("sync_queue"), 1);
    }

    #[tokio::test]
    async fn test_success_is_acked_and_counted() {
        let h = harness().await;
        let delivery = deliver(&h, submission("https://example.com/a")).await;

        assert_eq!(h.processor.handle(&delivery).await, MessageOutcome::Completed);
        assert_eq!(h.broker.unacked_count(), 0);

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.messages_processed, 1);
        assert_eq!(snapshot.messages_succeeded, 1);
        assert_eq!(snapshot.success_rate_percent, 100.0);
    }
}
