// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use tracing::info;

use crate::broker::{BrokerError, MessageBroker};

/// The broker entities backing one logical queue:
///
/// ```text
///   <queue>  --(reject / explicit divert)-->  <queue>_dlx (fanout)  -->  <queue>_dlq
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
}

impl QueueTopology {
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            dead_letter_exchange: format!("{}_dlx", queue),
            dead_letter_queue: format!("{}_dlq", queue),
            queue,
        }
    }

    /// Declare exchange, DLQ, binding and primary queue. Safe to call from
    /// every process that touches the queue, as long as all of them use
    /// this same topology.
    pub async fn provision(&self, broker: &dyn MessageBroker) -> Result<(), BrokerError> {
        broker.declare_fanout_exchange(&self.dead_letter_exchange).await?;
        broker.declare_queue(&self.dead_letter_queue, None).await?;
        broker.bind_queue(&self.dead_letter_queue, &self.dead_letter_exchange).await?;
        broker.declare_queue(&self.queue, Some(&self.dead_letter_exchange)).await?;

        info!(
            queue = %self.queue,
            dlx = %self.dead_letter_exchange,
            dlq = %self.dead_letter_queue,
            "Dead-letter topology provisioned"
        );
        Ok(())
    }
}
