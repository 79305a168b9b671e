// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pipeline metrics.
//!
//! Each worker owns one [`PipelineMetrics`] and hands an `Arc` of it to its
//! processor and retry controller. Counters are kept locally (for the JSON
//! snapshot served on `/metrics`) and mirrored into the `metrics` facade,
//! so whichever exporter the binary installs sees the same events.
//!
//! # Metric Naming Convention
//! - `newsflow_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `service`: ingest, sync
//! - `outcome`: received, succeeded, failed, duplicate
//! - `error_type`: see [`crate::processor::ProcessError::error_type`]
//! - `reason`: non-retryable, max-retries-exceeded

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Point-in-time copy of a worker's counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub service: String,
    pub uptime_seconds: u64,
    pub messages_processed: u64,
    pub messages_succeeded: u64,
    pub messages_failed: u64,
    pub messages_retried: u64,
    pub messages_dead_lettered: u64,
    pub duplicates: u64,
    pub content_changed: u64,
    /// Mean handling time of successful messages
    pub avg_processing_time_ms: f64,
    pub errors_by_type: BTreeMap<String, u64>,
    pub success_rate_percent: f64,
}

/// Counter set for one worker.
pub struct PipelineMetrics {
    service: String,
    started: Instant,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    duplicates: AtomicU64,
    content_changed: AtomicU64,
    success_time_micros: AtomicU64,
    errors_by_type: Mutex<BTreeMap<String, u64>>,
}

impl PipelineMetrics {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            started: Instant::now(),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            content_changed: AtomicU64::new(0),
            success_time_micros: AtomicU64::new(0),
            errors_by_type: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// A delivery was picked up.
    pub fn record_received(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.mirror_outcome("received");
    }

    /// A delivery was handled and acked.
    pub fn record_success(&self, elapsed: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.success_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.mirror_outcome("succeeded");
        histogram!("newsflow_processing_seconds", "service" => self.service.clone())
            .record(elapsed.as_secs_f64());
    }

    /// A delivery failed; `error_type` is the classification label.
    pub fn record_failure(&self, error_type: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.errors_by_type.lock().entry(error_type.to_string()).or_insert(0) += 1;
        self.mirror_outcome("failed");
        counter!(
            "newsflow_errors_total",
            "service" => self.service.clone(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    /// A submission matched an already-persisted record.
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        self.mirror_outcome("duplicate");
    }

    /// A duplicate URL arrived with a different content hash.
    pub fn record_content_changed(&self) {
        self.content_changed.fetch_add(1, Ordering::Relaxed);
        counter!("newsflow_content_changed_total", "service" => self.service.clone()).increment(1);
    }

    /// A failed delivery was requeued for another attempt.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        counter!("newsflow_retries_total", "service" => self.service.clone()).increment(1);
    }

    /// A failed delivery was moved to the dead-letter queue.
    pub fn record_dead_letter(&self, reason: &str) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!(
            "newsflow_dead_letters_total",
            "service" => self.service.clone(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn mirror_outcome(&self, outcome: &'static str) {
        counter!(
            "newsflow_messages_total",
            "service" => self.service.clone(),
            "outcome" => outcome
        )
        .increment(1);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let success_micros = self.success_time_micros.load(Ordering::Relaxed);

        let avg_processing_time_ms = if succeeded > 0 {
            success_micros as f64 / succeeded as f64 / 1000.0
        } else {
            0.0
        };
        let success_rate_percent = if processed > 0 {
            succeeded as f64 / processed as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            service: self.service.clone(),
            uptime_seconds: self.started.elapsed().as_secs(),
            messages_processed: processed,
            messages_succeeded: succeeded,
            messages_failed: self.failed.load(Ordering::Relaxed),
            messages_retried: self.retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            content_changed: self.content_changed.load(Ordering::Relaxed),
            avg_processing_time_ms,
            errors_by_type: self.errors_by_type.lock().clone(),
            success_rate_percent,
        }
    }

    /// Emit the current snapshot as one structured log line.
    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        info!(
            service = %s.service,
            uptime_seconds = s.uptime_seconds,
            processed = s.messages_processed,
            succeeded = s.messages_succeeded,
            failed = s.messages_failed,
            retried = s.messages_retried,
            dead_lettered = s.messages_dead_lettered,
            duplicates = s.duplicates,
            avg_processing_time_ms = s.avg_processing_time_ms,
            success_rate_percent = s.success_rate_percent,
            "Pipeline metrics"
        );
    }
}
