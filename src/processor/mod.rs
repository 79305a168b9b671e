// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue consumers of the pipeline.
//!
//! ```text
//! ingestion_queue ──► IngestProcessor ──► sync_queue ──► SyncProcessor ──► search index
//!        │                  │                  │                │
//!        └─ _dlx ─► _dlq    └─ SQL store       └─ _dlx ─► _dlq  └─ SQL store (read)
//! ```
//!
//! Both processors implement [`MessageHandler`]: every delivery ends either
//! acked or handed to the queue's [`RetryController`], and the outcome is
//! counted in [`PipelineMetrics`]. [`Worker`] feeds deliveries from a
//! subscription to a handler concurrently.

mod error;
mod ingest;
mod sync;
mod worker;

use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::broker::Delivery;
use crate::dead_letter::{retry_count, FailureDisposition, RetryController};
use crate::metrics::PipelineMetrics;

pub use error::ProcessError;
pub use ingest::{IngestOutcome, IngestProcessor};
pub use sync::{SyncOutcome, SyncProcessor};
pub use worker::Worker;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processed and acked.
    Completed,
    /// Processed, but the ack failed. The broker redelivers it later and
    /// the processors are idempotent, so the work is not lost or repeated.
    AckFailed,
    /// Processing failed and the retry controller settled the delivery.
    Failed {
        error_type: &'static str,
        disposition: FailureDisposition,
    },
}

/// Processes and settles one delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> MessageOutcome;
}

/// Ack on success, or hand the failure to the retry controller.
pub(crate) async fn settle<T>(
    retry: &RetryController,
    metrics: &PipelineMetrics,
    delivery: &Delivery,
    started: Instant,
    result: Result<T, ProcessError>,
) -> MessageOutcome {
    match result {
        Ok(_) => match retry.acknowledge_success(delivery).await {
            Ok(()) => {
                metrics.record_success(started.elapsed());
                MessageOutcome::Completed
            }
            Err(e) => {
                error!(queue = %delivery.queue, error = %e, "Failed to ack processed message");
                metrics.record_failure("ack");
                MessageOutcome::AckFailed
            }
        },
        Err(e) => {
            let error_type = e.error_type();
            metrics.record_failure(error_type);
            warn!(
                queue = %delivery.queue,
                error_type,
                retryable = e.is_retryable(),
                retry_count = retry_count(&delivery.headers),
                error = %e,
                "Message processing failed"
            );
            let disposition = retry.handle_failure(delivery, &e, e.is_retryable()).await;
            MessageOutcome::Failed { error_type, disposition }
        }
    }
}
