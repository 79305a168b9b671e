// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # newsflow
//!
//! Queue-driven news ingestion: submissions arrive on a message queue, are
//! persisted once despite duplicates and transient failures, and are
//! projected into a search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ingestion_queue (AMQP)                    │
//! │  • JSON submissions from the HTTP front door                │
//! │  • _dlx / _dlq pair for terminal and exhausted messages     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      IngestProcessor                        │
//! │  • URL normalization + SHA-256 identity                     │
//! │  • Dedup on url_hash                                        │
//! │  • One transaction: news + multimedia + tags (MySQL/SQLite) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  ({"news_id", "action": "index"})
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SyncProcessor                         │
//! │  • Loads the record with media source, multimedia, tags     │
//! │  • Keyed upsert into RediSearch (idx:news)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both stages settle failures through [`RetryController`]: bounded
//! requeues for transient errors, immediate dead-lettering for bad input.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use newsflow::broker::InMemoryBroker;
//! use newsflow::processor::{IngestProcessor, MessageHandler};
//! use newsflow::storage::InMemoryNewsStore;
//! use newsflow::{PipelineConfig, PipelineMetrics};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PipelineConfig::default();
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let ingest = IngestProcessor::new(
//!         Arc::new(InMemoryNewsStore::new()),
//!         broker.clone(),
//!         config.timestamp_parser(),
//!         &config,
//!         Arc::new(PipelineMetrics::new("ingest")),
//!     )
//!     .await
//!     .expect("topology");
//!
//!     let body = br#"{"url":"https://example.com/a","title":"T","body":"B",
//!                    "published":"Martes 16 septiembre de 2025 | 23:01"}"#;
//!     ingest.process(body).await.expect("persisted");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`broker`]: AMQP and in-memory message brokers
//! - [`dead_letter`]: Retry/dead-letter protocol and DLQ maintenance
//! - [`processor`]: Ingest and sync stages, consumer worker
//! - [`storage`]: SQL (MySQL/SQLite) and in-memory news stores
//! - [`search`]: RediSearch and in-memory search indexes
//! - [`normalize`], [`timestamp`]: Identity and date parsing
//! - [`metrics`], [`server`]: Counters and the HTTP surface

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod metrics;
pub mod news;
pub mod normalize;
pub mod processor;
pub mod resilience;
pub mod search;
pub mod server;
pub mod storage;
pub mod sync_event;
pub mod timestamp;

pub use config::{PipelineConfig, TimestampFormat};
pub use dead_letter::{
    replay_dead_letters, DeadLetterReason, DeadLetterSummary, FailureDisposition, QueueTopology, RetryController,
    TopologyStatus,
};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use processor::{IngestProcessor, MessageHandler, MessageOutcome, ProcessError, SyncProcessor, Worker};
pub use resilience::retry::RetryConfig;
pub use sync_event::{SyncAction, SyncEvent};
