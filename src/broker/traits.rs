// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Failed to declare {kind} '{name}': {reason}")]
    Topology {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Acknowledgement failed: {0}")]
    Ack(String),
    #[error("Consume failed: {0}")]
    Consume(String),
    #[error("No such queue: {0}")]
    UnknownQueue(String),
    #[error("No such exchange: {0}")]
    UnknownExchange(String),
    #[error("Unknown delivery tag {0} (already settled?)")]
    UnknownDelivery(u64),
}

/// A header value. Only the shapes this pipeline writes are modelled;
/// other AMQP field types are dropped on the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
    Bool(bool),
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// A message received from a queue, awaiting ack or reject.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned tag, unique per channel
    pub delivery_tag: u64,
    /// Queue this delivery was consumed from
    pub queue: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub content_type: Option<String>,
}

impl Delivery {
    /// The same payload, ready to be published somewhere else.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            body: self.body.clone(),
            headers: self.headers.clone(),
            content_type: self.content_type.clone(),
        }
    }
}

/// A message to publish. Always sent persistent.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub content_type: Option<String>,
}

impl OutboundMessage {
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            body,
            headers: Headers::new(),
            content_type: Some("application/json".to_string()),
        }
    }
}

/// Where a publish goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Default exchange, routing key = queue name
    Queue(String),
    /// Fanout exchange, empty routing key
    Exchange(String),
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Counts reported by the broker for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Ready messages; deliveries awaiting ack are not included
    pub messages: u32,
    pub consumers: u32,
}

/// The queue operations the pipeline needs.
///
/// Declarations must be idempotent: re-declaring an entity with the same
/// arguments is a no-op.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare a durable fanout exchange.
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Declare a durable queue, optionally forwarding rejected/expired
    /// messages to `dead_letter_exchange`.
    async fn declare_queue(&self, name: &str, dead_letter_exchange: Option<&str>) -> Result<(), BrokerError>;

    /// Bind a queue to an exchange with an empty routing key.
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError>;

    /// Publish persistently. Returns once the broker has confirmed the message.
    async fn publish(&self, destination: &Destination, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Settle a delivery as done; it leaves the queue permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Settle a delivery as failed without redelivery. The broker applies
    /// the queue's dead-letter exchange, if any.
    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Fetch one ready message without subscribing (`basic.get`), or `None`
    /// if the queue is empty. The delivery must still be settled.
    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    /// Start consuming a queue with manual acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    /// Return an unsettled delivery to its queue for redelivery.
    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Message and consumer counts of an existing queue.
    async fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError>;

    /// Drop every ready message in a queue. Returns how many were dropped.
    async fn purge(&self, queue: &str) -> Result<u32, BrokerError>;
}
