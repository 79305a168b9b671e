// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator views over a queue's dead-letter side: counts, a
//! non-destructive look at parked messages, and purge.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::topology::QueueTopology;
use super::{retry_count, DLQ_REASON_HEADER, MANUAL_RETRY_HEADER, RETRY_REASON_HEADER};
use crate::broker::{BrokerError, Delivery, HeaderValue, Headers, MessageBroker, QueueStatus};

/// Counts for a primary queue and its dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyStatus {
    pub queue: String,
    pub primary: QueueStatus,
    pub dead_letter_queue: String,
    pub dead_lettered: QueueStatus,
}

/// What an operator needs to decide between replay and purge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterSummary {
    pub retry_count: u32,
    pub retry_reason: Option<String>,
    pub dlq_reason: Option<String>,
    pub manual_retry: bool,
    pub content_type: Option<String>,
    /// Parsed JSON, or the lossy UTF-8 text of a body that isn't JSON
    pub body: Value,
}

impl DeadLetterSummary {
    fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            retry_count: retry_count(&delivery.headers),
            retry_reason: text_header(&delivery.headers, RETRY_REASON_HEADER),
            dlq_reason: text_header(&delivery.headers, DLQ_REASON_HEADER),
            manual_retry: matches!(delivery.headers.get(MANUAL_RETRY_HEADER), Some(HeaderValue::Bool(true))),
            content_type: delivery.content_type.clone(),
            body: serde_json::from_slice(&delivery.body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&delivery.body).into_owned())),
        }
    }
}

fn text_header(headers: &Headers, name: &str) -> Option<String> {
    match headers.get(name) {
        Some(HeaderValue::Text(text)) => Some(text.clone()),
        _ => None,
    }
}

impl QueueTopology {
    pub async fn status(&self, broker: &dyn MessageBroker) -> Result<TopologyStatus, BrokerError> {
        Ok(TopologyStatus {
            queue: self.queue.clone(),
            primary: broker.queue_status(&self.queue).await?,
            dead_letter_queue: self.dead_letter_queue.clone(),
            dead_lettered: broker.queue_status(&self.dead_letter_queue).await?,
        })
    }

    /// Read up to `limit` dead letters without consuming them.
    ///
    /// Fetched messages stay unacked until all are read, so none is seen
    /// twice, then every one goes back to the DLQ.
    pub async fn inspect_dead_letters(
        &self,
        broker: &dyn MessageBroker,
        limit: usize,
    ) -> Result<Vec<DeadLetterSummary>, BrokerError> {
        let mut held = Vec::new();
        let mut fetch_error = None;
        while held.len() < limit {
            match broker.get(&self.dead_letter_queue).await {
                Ok(Some(delivery)) => held.push(delivery),
                Ok(None) => break,
                Err(e) => {
                    fetch_error = Some(e);
                    break;
                }
            }
        }

        let summaries = held.iter().map(DeadLetterSummary::from_delivery).collect();

        // Back to front keeps the queue order
        for delivery in held.iter().rev() {
            broker.requeue(delivery).await?;
        }
        if let Some(e) = fetch_error {
            return Err(e);
        }
        Ok(summaries)
    }

    /// Permanently drop every message parked in the DLQ.
    pub async fn purge_dead_letters(&self, broker: &dyn MessageBroker) -> Result<u32, BrokerError> {
        let purged = broker.purge(&self.dead_letter_queue).await?;
        if purged > 0 {
            warn!(dlq = %self.dead_letter_queue, purged, "Dead-letter queue purged");
        } else {
            info!(dlq = %self.dead_letter_queue, "Dead-letter queue already empty");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Destination, InMemoryBroker, OutboundMessage};
    use crate::dead_letter::RETRY_COUNT_HEADER;

    async fn provisioned() -> (InMemoryBroker, QueueTopology) {
        let broker = InMemoryBroker::new();
        let topology = QueueTopology::new("work");
        topology.provision(&broker).await.unwrap();
        (broker, topology)
    }

    async fn park(broker: &InMemoryBroker, topology: &QueueTopology, body: &[u8], reason: &str) {
        let mut message = OutboundMessage::json(body.to_vec());
        message.headers.insert(RETRY_COUNT_HEADER.into(), HeaderValue::Int(3));
        message
            .headers
            .insert(RETRY_REASON_HEADER.into(), HeaderValue::Text("storage unavailable".into()));
        message.headers.insert(DLQ_REASON_HEADER.into(), HeaderValue::Text(reason.into()));
        broker
            .publish(&Destination::Exchange(topology.dead_letter_exchange.clone()), message)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_both_queues() {
        let (broker, topology) = provisioned().await;
        broker
            .publish(&Destination::Queue("work".into()), OutboundMessage::default())
            .await
            .unwrap();
        park(&broker, &topology, b"{}", "non-retryable").await;
        park(&broker, &topology, b"{}", "non-retryable").await;

        let status = topology.status(&broker).await.unwrap();

        assert_eq!(status.queue, "work");
        assert_eq!(status.primary.messages, 1);
        assert_eq!(status.dead_letter_queue, "work_dlq");
        assert_eq!(status.dead_lettered.messages, 2);
    }

    #[tokio::test]
    async fn test_inspect_leaves_messages_in_place() {
        let (broker, topology) = provisioned().await;
        park(&broker, &topology, br#"{"url":"https://example.com/a"}"#, "max-retries-exceeded").await;
        park(&broker, &topology, b"not json", "non-retryable").await;
        park(&broker, &topology, b"{}", "non-retryable").await;

        let summaries = topology.inspect_dead_letters(&broker, 2).await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].retry_count, 3);
        assert_eq!(summaries[0].dlq_reason.as_deref(), Some("max-retries-exceeded"));
        assert_eq!(summaries[0].retry_reason.as_deref(), Some("storage unavailable"));
        assert_eq!(summaries[0].body["url"], "https://example.com/a");
        assert_eq!(summaries[1].body, Value::String("not json".into()));
        assert!(!summaries[1].manual_retry);

        // Nothing consumed, order unchanged
        assert_eq!(broker.unacked_count(), 0);
        let parked = broker.messages("work_dlq");
        assert_eq!(parked.len(), 3);
        assert_eq!(parked[0].body, br#"{"url":"https://example.com/a"}"#);
        assert_eq!(parked[1].body, b"not json");
    }

    #[tokio::test]
    async fn test_inspect_empty_dlq() {
        let (broker, topology) = provisioned().await;
        assert!(topology.inspect_dead_letters(&broker, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_empties_only_the_dlq() {
        let (broker, topology) = provisioned().await;
        broker
            .publish(&Destination::Queue("work".into()), OutboundMessage::default())
            .await
            .unwrap();
        park(&broker, &topology, b"{}", "non-retryable").await;
        park(&broker, &topology, b"{}", "non-retryable").await;

        assert_eq!(topology.purge_dead_letters(&broker).await.unwrap(), 2);
        assert_eq!(broker.queue_len("work_dlq"), 0);
        assert_eq!(broker.queue_len("work"), 1);
        assert_eq!(topology.purge_dead_letters(&broker).await.unwrap(), 0);
    }
}
