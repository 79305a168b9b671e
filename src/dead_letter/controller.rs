// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::topology::QueueTopology;
use super::{DEFAULT_MAX_RETRIES, DLQ_REASON_HEADER, MANUAL_RETRY_HEADER, RETRY_COUNT_HEADER, RETRY_REASON_HEADER};
use crate::broker::{BrokerError, Delivery, Destination, HeaderValue, Headers, MessageBroker};
use crate::metrics::PipelineMetrics;

/// Why a message ended up in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    NonRetryable,
    MaxRetriesExceeded,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::NonRetryable => "non-retryable",
            DeadLetterReason::MaxRetriesExceeded => "max-retries-exceeded",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What [`RetryController::handle_failure`] did with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Republished to the primary queue; `attempt` is the new retry count.
    Requeued { attempt: u32 },
    /// Published to the dead-letter exchange.
    DeadLettered { reason: DeadLetterReason },
    /// The republish (or the ack after it) failed. The original was
    /// rejected without requeue, so the broker's own dead-lettering applies.
    Unhandled,
}

impl FailureDisposition {
    /// Whether the delivery was settled by an explicit requeue or divert.
    pub fn is_handled(&self) -> bool {
        !matches!(self, FailureDisposition::Unhandled)
    }
}

/// Current retry count of a message. Only a non-negative integer header
/// counts; anything else reads as 0.
pub fn retry_count(headers: &Headers) -> u32 {
    match headers.get(RETRY_COUNT_HEADER) {
        Some(HeaderValue::Int(n)) if *n >= 0 => u32::try_from(*n).unwrap_or(u32::MAX),
        _ => 0,
    }
}

/// Whether a message was delivered before: requeued by a retry or moved
/// back from the dead-letter queue by an operator.
pub fn is_redelivery(headers: &Headers) -> bool {
    retry_count(headers) > 0 || matches!(headers.get(MANUAL_RETRY_HEADER), Some(HeaderValue::Bool(true)))
}

/// Owns the bounded-retry / dead-letter protocol for one queue.
pub struct RetryController {
    broker: Arc<dyn MessageBroker>,
    topology: QueueTopology,
    max_retries: u32,
    metrics: Arc<PipelineMetrics>,
}

impl RetryController {
    /// Provision the queue's dead-letter topology and build a controller
    /// for it. `max_retries == 0` selects [`DEFAULT_MAX_RETRIES`].
    pub async fn new(
        broker: Arc<dyn MessageBroker>,
        queue: &str,
        max_retries: u32,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, BrokerError> {
        let topology = QueueTopology::new(queue);
        topology.provision(broker.as_ref()).await?;

        let max_retries = if max_retries == 0 { DEFAULT_MAX_RETRIES } else { max_retries };
        Ok(Self {
            broker,
            topology,
            max_retries,
            metrics,
        })
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Settle a failed delivery.
    ///
    /// Non-retryable failures and deliveries that already used up their
    /// retries are diverted to the DLX; everything else is republished to
    /// the back of the primary queue with `retry-count + 1`. The original is
    /// always settled (acked after a successful republish, rejected otherwise).
    pub async fn handle_failure(
        &self,
        delivery: &Delivery,
        error: &(dyn fmt::Display + Sync),
        retryable: bool,
    ) -> FailureDisposition {
        let count = retry_count(&delivery.headers);
        let reason = error.to_string();

        if !retryable {
            warn!(queue = %self.topology.queue, retry_count = count, reason = %reason, "Non-retryable failure");
            return self.divert(delivery, count, &reason, DeadLetterReason::NonRetryable).await;
        }

        if count >= self.max_retries {
            warn!(
                queue = %self.topology.queue,
                retry_count = count,
                max_retries = self.max_retries,
                reason = %reason,
                "Retries exhausted"
            );
            return self
                .divert(delivery, count, &reason, DeadLetterReason::MaxRetriesExceeded)
                .await;
        }

        self.requeue(delivery, count + 1, &reason).await
    }

    /// Ack a successfully processed delivery.
    pub async fn acknowledge_success(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.broker.ack(delivery).await
    }

    async fn requeue(&self, delivery: &Delivery, attempt: u32, reason: &str) -> FailureDisposition {
        let mut message = delivery.to_outbound();
        message
            .headers
            .insert(RETRY_COUNT_HEADER.to_string(), HeaderValue::Int(i64::from(attempt)));
        message
            .headers
            .insert(RETRY_REASON_HEADER.to_string(), HeaderValue::Text(reason.to_string()));

        let destination = Destination::Queue(self.topology.queue.clone());
        if let Err(e) = self.broker.publish(&destination, message).await {
            return self.give_up(delivery, "requeue", &e).await;
        }
        self.metrics.record_retry();

        if let Err(e) = self.broker.ack(delivery).await {
            error!(queue = %self.topology.queue, error = %e, "Requeued but failed to ack original");
            return FailureDisposition::Unhandled;
        }

        info!(
            queue = %self.topology.queue,
            retry_count = attempt,
            max_retries = self.max_retries,
            "Message requeued"
        );
        FailureDisposition::Requeued { attempt }
    }

    async fn divert(
        &self,
        delivery: &Delivery,
        count: u32,
        reason: &str,
        dlq_reason: DeadLetterReason,
    ) -> FailureDisposition {
        let mut message = delivery.to_outbound();
        message
            .headers
            .insert(RETRY_COUNT_HEADER.to_string(), HeaderValue::Int(i64::from(count)));
        message
            .headers
            .insert(RETRY_REASON_HEADER.to_string(), HeaderValue::Text(reason.to_string()));
        message
            .headers
            .insert(DLQ_REASON_HEADER.to_string(), HeaderValue::Text(dlq_reason.as_str().to_string()));

        let destination = Destination::Exchange(self.topology.dead_letter_exchange.clone());
        if let Err(e) = self.broker.publish(&destination, message).await {
            return self.give_up(delivery, "dead-letter", &e).await;
        }
        self.metrics.record_dead_letter(dlq_reason.as_str());

        if let Err(e) = self.broker.ack(delivery).await {
            error!(queue = %self.topology.queue, error = %e, "Dead-lettered but failed to ack original");
            return FailureDisposition::Unhandled;
        }

        warn!(
            queue = %self.topology.queue,
            dlq = %self.topology.dead_letter_queue,
            reason = dlq_reason.as_str(),
            "Message sent to dead-letter queue"
        );
        FailureDisposition::DeadLettered { reason: dlq_reason }
    }

    /// Reject without requeue so the message cannot loop.
    async fn give_up(&self, delivery: &Delivery, action: &str, cause: &BrokerError) -> FailureDisposition {
        error!(queue = %self.topology.queue, action, error = %cause, "Publish failed, rejecting original");
        if let Err(e) = self.broker.reject(delivery).await {
            error!(queue = %self.topology.queue, error = %e, "Failed to reject delivery");
        }
        FailureDisposition::Unhandled
    }
}
