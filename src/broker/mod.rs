// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message broker abstraction.
//!
//! The processors and the dead-letter protocol talk to [`MessageBroker`];
//! [`AmqpBroker`] is the RabbitMQ implementation and [`InMemoryBroker`]
//! the one used by tests.

pub mod amqp;
pub mod memory;
pub mod traits;

pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;
pub use traits::{
    BrokerError, Delivery, DeliveryStream, Destination, HeaderValue, Headers, MessageBroker, OutboundMessage,
    QueueStatus,
};
