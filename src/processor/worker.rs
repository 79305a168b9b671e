// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::MessageHandler;
use crate::broker::{BrokerError, MessageBroker};

/// Consumes one queue and runs a handler per delivery.
///
/// Deliveries are spawned onto a [`JoinSet`] as they arrive, so the number
/// in flight is bounded by the broker prefetch rather than by the worker.
pub struct Worker<H> {
    broker: Arc<dyn MessageBroker>,
    handler: Arc<H>,
    queue: String,
    consumer_tag: String,
}

impl<H: MessageHandler> Worker<H> {
    pub fn new(broker: Arc<dyn MessageBroker>, handler: Arc<H>, queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            broker,
            handler,
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped), then wait
    /// for in-flight deliveries to settle.
    ///
    /// A consumer stream error stops the loop and is returned after draining.
    #[tracing::instrument(skip_all, fields(queue = %self.queue))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut deliveries = self.broker.consume(&self.queue, &self.consumer_tag).await?;
        let mut in_flight = JoinSet::new();
        let mut result = Ok(());
        info!(consumer_tag = %self.consumer_tag, "Worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, no longer consuming");
                        break;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let handler = Arc::clone(&self.handler);
                        in_flight.spawn(async move {
                            let outcome = handler.handle(&delivery).await;
                            debug!(delivery_tag = delivery.delivery_tag, ?outcome, "Delivery settled");
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Consumer stream failed");
                        result = Err(e);
                        break;
                    }
                    None => {
                        warn!("Consumer stream ended");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Message task panicked");
                    }
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight messages");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Message task panicked");
            }
        }

        info!("Worker stopped");
        result
    }
}
