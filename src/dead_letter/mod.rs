// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retries and dead-lettering on top of the message broker.
//!
//! Every processed queue gets a fanout dead-letter exchange and a
//! dead-letter queue (see [`QueueTopology`]). A failed delivery is either
//! republished to the back of its queue with an incremented `retry-count`
//! header, or diverted to the dead-letter queue tagged with a `dlq-reason`:
//!
//! | Failure | retry-count | Outcome |
//! |---------|-------------|---------|
//! | non-retryable | any | DLQ, `non-retryable` |
//! | retryable | `< max` | requeued with count + 1 |
//! | retryable | `>= max` | DLQ, `max-retries-exceeded` |
//!
//! Requeues are immediate; there is no per-message backoff.
//!
//! Operators work the DLQ through [`QueueTopology::status`],
//! [`QueueTopology::inspect_dead_letters`], [`replay_dead_letters`] and
//! [`QueueTopology::purge_dead_letters`].

mod admin;
mod controller;
mod topology;

use chrono::Utc;
use tracing::info;

use crate::broker::{BrokerError, Destination, HeaderValue, MessageBroker};

pub use controller::{is_redelivery, retry_count, DeadLetterReason, FailureDisposition, RetryController};
pub use admin::{DeadLetterSummary, TopologyStatus};
pub use topology::QueueTopology;

/// Retries allowed when none (or 0) is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const RETRY_COUNT_HEADER: &str = "retry-count";
pub const RETRY_REASON_HEADER: &str = "retry-reason";
pub const DLQ_REASON_HEADER: &str = "dlq-reason";
/// Set on messages an operator moved back from the DLQ.
pub const MANUAL_RETRY_HEADER: &str = "manual-retry";
pub const MANUAL_RETRY_AT_HEADER: &str = "manual-retry-at";

/// Move up to `limit` messages from the dead-letter queue back onto the
/// primary queue with a fresh retry budget. Returns how many were moved.
///
/// If a republish fails the DLQ message is left unsettled; the broker
/// returns it to the DLQ when the channel closes.
pub async fn replay_dead_letters(
    broker: &dyn MessageBroker,
    topology: &QueueTopology,
    limit: usize,
) -> Result<usize, BrokerError> {
    let mut moved = 0;
    while moved < limit {
        let Some(delivery) = broker.get(&topology.dead_letter_queue).await? else {
            break;
        };

        let mut message = delivery.to_outbound();
        message.headers.remove(DLQ_REASON_HEADER);
        message.headers.insert(RETRY_COUNT_HEADER.to_string(), HeaderValue::Int(0));
        message.headers.insert(MANUAL_RETRY_HEADER.to_string(), HeaderValue::Bool(true));
        message
            .headers
            .insert(MANUAL_RETRY_AT_HEADER.to_string(), HeaderValue::Text(Utc::now().to_rfc3339()));

        broker.publish(&Destination::Queue(topology.queue.clone()), message).await?;
        broker.ack(&delivery).await?;
        moved += 1;
    }

    info!(queue = %topology.queue, dlq = %topology.dead_letter_queue, moved, "Replayed dead letters");
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, OutboundMessage};

    async fn dead_letter(broker: &InMemoryBroker, topology: &QueueTopology, body: &[u8]) {
        let mut message = OutboundMessage::json(body.to_vec());
        message.headers.insert(RETRY_COUNT_HEADER.into(), HeaderValue::Int(3));
        message
            .headers
            .insert(DLQ_REASON_HEADER.into(), HeaderValue::Text("max-retries-exceeded".into()));
        broker
            .publish(&Destination::Exchange(topology.dead_letter_exchange.clone()), message)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replay_resets_retry_budget() {
        let broker = InMemoryBroker::new();
        let topology = QueueTopology::new("work");
        topology.provision(&broker).await.unwrap();
        dead_letter(&broker, &topology, b"a").await;
        dead_letter(&broker, &topology, b"b").await;
        dead_letter(&broker, &topology, b"c").await;

        let moved = replay_dead_letters(&broker, &topology, 2).await.unwrap();

        assert_eq!(moved, 2);
        assert_eq!(broker.queue_len("work_dlq"), 1);
        let replayed = broker.messages("work");
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].body, b"a");
        assert_eq!(replayed[0].headers.get(RETRY_COUNT_HEADER), Some(&HeaderValue::Int(0)));
        assert_eq!(replayed[0].headers.get(DLQ_REASON_HEADER), None);
        assert_eq!(replayed[0].headers.get(MANUAL_RETRY_HEADER), Some(&HeaderValue::Bool(true)));
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_stops_when_dlq_is_empty() {
        let broker = InMemoryBroker::new();
        let topology = QueueTopology::new("work");
        topology.provision(&broker).await.unwrap();
        dead_letter(&broker, &topology, b"only").await;

        assert_eq!(replay_dead_letters(&broker, &topology, 10).await.unwrap(), 1);
        assert_eq!(replay_dead_letters(&broker, &topology, 10).await.unwrap(), 0);
    }
}
