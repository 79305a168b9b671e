// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! newsflow worker binary.
//!
//! ```text
//! newsflow ingest                          # consume ingestion_queue
//! newsflow sync                            # consume sync_queue
//! newsflow dlq status                      # counts for both queues and their DLQs
//! newsflow dlq inspect --queue sync_queue  # print parked messages, leave them in place
//! newsflow dlq replay --queue sync_queue   # move dead letters back, then exit
//! newsflow dlq purge --queue sync_queue --yes
//! ```
//!
//! Configuration comes from `NEWSFLOW_*` environment variables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use newsflow::broker::{AmqpBroker, MessageBroker};
use newsflow::processor::{IngestProcessor, MessageHandler, SyncProcessor, Worker};
use newsflow::search::{RedisSearchIndex, SearchIndexClient};
use newsflow::server::{self, ServerState};
use newsflow::storage::SqlNewsStore;
use newsflow::{replay_dead_letters, PipelineConfig, PipelineMetrics, QueueTopology};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "newsflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume submissions, persist them and emit sync events
    Ingest,
    /// Consume sync events and maintain the search index
    Sync,
    /// Dead-letter queue maintenance
    Dlq {
        #[command(subcommand)]
        action: DlqCommand,
    },
}

/// `--queue` names the primary queue; its `<queue>_dlq` is the target.
#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// Message and consumer counts (defaults to the ingest and sync queues)
    Status {
        #[arg(long)]
        queue: Option<String>,
    },
    /// Print dead letters with their retry headers without consuming them
    Inspect {
        /// Defaults to the ingest queue
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Move dead letters back onto the primary queue with a fresh retry budget
    Replay {
        /// Defaults to the ingest queue
        #[arg(long)]
        queue: Option<String>,
        /// Maximum number of messages to move
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Permanently delete every dead letter
    Purge {
        #[arg(long)]
        queue: String,
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        // stdout carries `dlq` command output
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env().context("loading NEWSFLOW_* configuration")?;
    info!(command = ?cli.command, "newsflow starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Command::Ingest => run_ingest(config, shutdown_rx).await,
        Command::Sync => run_sync(config, shutdown_rx).await,
        Command::Dlq { action } => run_dlq(config, action).await,
    }
}

async fn run_ingest(config: PipelineConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let broker = Arc::new(AmqpBroker::connect(&config.amqp_url, config.prefetch_count).await?);
    let store = Arc::new(SqlNewsStore::new(&config.sql_url).await?);
    let metrics = Arc::new(PipelineMetrics::new("ingest"));

    let processor = Arc::new(
        IngestProcessor::new(
            store.clone(),
            broker.clone(),
            config.timestamp_parser(),
            &config,
            Arc::clone(&metrics),
        )
        .await?,
    );

    let result = run_worker(&config, broker.clone(), processor, &config.ingest_queue, metrics, shutdown).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error closing broker connection");
    }
    store.close().await;
    result
}

async fn run_sync(config: PipelineConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let broker = Arc::new(AmqpBroker::connect(&config.amqp_url, config.prefetch_count).await?);
    let store = Arc::new(SqlNewsStore::new(&config.sql_url).await?);
    let index = Arc::new(
        RedisSearchIndex::connect(&config.redis_url, &config.search_index, &config.search_key_prefix).await?,
    );
    index.ensure_index().await?;
    let metrics = Arc::new(PipelineMetrics::new("sync"));

    let processor = Arc::new(
        SyncProcessor::new(store.clone(), index, broker.clone(), &config, Arc::clone(&metrics)).await?,
    );

    let result = run_worker(&config, broker.clone(), processor, &config.sync_queue, metrics, shutdown).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error closing broker connection");
    }
    store.close().await;
    result
}

async fn run_dlq(config: PipelineConfig, action: DlqCommand) -> anyhow::Result<()> {
    if let DlqCommand::Purge { queue, yes: false } = &action {
        bail!("refusing to purge {}_dlq without --yes", queue);
    }

    let broker = AmqpBroker::connect(&config.amqp_url, config.prefetch_count).await?;
    let result = dlq_action(&config, &broker, action).await;
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error closing broker connection");
    }
    result
}

async fn dlq_action(config: &PipelineConfig, broker: &AmqpBroker, action: DlqCommand) -> anyhow::Result<()> {
    let topology_for = |queue: Option<String>| QueueTopology::new(queue.unwrap_or_else(|| config.ingest_queue.clone()));

    match action {
        DlqCommand::Status { queue } => {
            let queues = match queue {
                Some(queue) => vec![queue],
                None => vec![config.ingest_queue.clone(), config.sync_queue.clone()],
            };
            for queue in queues {
                let topology = QueueTopology::new(queue);
                topology.provision(broker).await?;
                let status = topology.status(broker).await?;
                if status.dead_lettered.messages > 0 {
                    warn!(dlq = %status.dead_letter_queue, messages = status.dead_lettered.messages, "Dead letters waiting");
                }
                println!("{}", serde_json::to_string(&status)?);
            }
        }
        DlqCommand::Inspect { queue, limit } => {
            let topology = topology_for(queue);
            topology.provision(broker).await?;
            let summaries = topology.inspect_dead_letters(broker, limit).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            info!(dlq = %topology.dead_letter_queue, shown = summaries.len(), "Inspection finished");
        }
        DlqCommand::Replay { queue, limit } => {
            let topology = topology_for(queue);
            topology.provision(broker).await?;
            let moved = replay_dead_letters(broker, &topology, limit).await?;
            info!(queue = %topology.queue, moved, "Replay finished");
        }
        DlqCommand::Purge { queue, .. } => {
            let topology = QueueTopology::new(queue);
            topology.provision(broker).await?;
            let purged = topology.purge_dead_letters(broker).await?;
            info!(dlq = %topology.dead_letter_queue, purged, "Purge finished");
        }
    }
    Ok(())
}

/// Start the optional HTTP surface and the periodic metrics log, then
/// consume until shutdown.
async fn run_worker<H: MessageHandler>(
    config: &PipelineConfig,
    broker: Arc<dyn MessageBroker>,
    handler: Arc<H>,
    queue: &str,
    metrics: Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if let Some(addr) = &config.http_addr {
        let addr: SocketAddr = addr.parse().with_context(|| format!("invalid http_addr '{}'", addr))?;
        let state = ServerState {
            metrics: Arc::clone(&metrics),
            prometheus: install_prometheus(),
        };
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state, server_shutdown).await {
                error!(addr = %addr, error = %e, "HTTP surface failed");
            }
        });
    }

    let snapshot_metrics = Arc::clone(&metrics);
    let mut snapshot_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => snapshot_metrics.log_snapshot(),
                _ = snapshot_shutdown.changed() => break,
            }
        }
    });

    let consumer_tag = format!("{}-{}", metrics.service(), std::process::id());
    Worker::new(broker, handler, queue, consumer_tag).run(shutdown).await?;
    metrics.log_snapshot();
    Ok(())
}

fn install_prometheus() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
