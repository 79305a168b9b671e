// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RabbitMQ backend over a single confirm-mode channel.
//!
//! Every publish is persistent (`delivery_mode = 2`) and waits for the
//! broker's publisher confirm, so a returned `Ok` means the message is
//! durable. Consumption uses manual acknowledgement with the configured
//! prefetch as the only bound on in-flight deliveries.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicPublishOptions, BasicQosOptions, BasicRejectOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use super::traits::{
    BrokerError, Delivery, DeliveryStream, Destination, HeaderValue, Headers, MessageBroker, OutboundMessage,
    QueueStatus,
};
use crate::resilience::retry::{retry, RetryConfig};

const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
const PERSISTENT: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect with startup-mode retry, open a confirm-mode channel and set prefetch.
    pub async fn connect(uri: &str, prefetch_count: u16) -> Result<Self, BrokerError> {
        let connection = retry("amqp_connect", &RetryConfig::startup(), || async {
            Connection::connect(uri, ConnectionProperties::default())
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))
        })
        .await?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to open channel: {}", e)))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to enable publisher confirms: {}", e)))?;
        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to set prefetch: {}", e)))?;

        info!(prefetch_count, "Connected to AMQP broker");
        Ok(Self { connection, channel })
    }

    /// Close the channel, then the connection. Unacked deliveries return to their queues.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        let value = match value {
            HeaderValue::Int(n) => AMQPValue::LongLongInt(*n),
            HeaderValue::Text(s) => AMQPValue::LongString(LongString::from(s.as_str())),
            HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
        };
        table.insert(ShortString::from(key.as_str()), value);
    }
    table
}

fn from_amqp_value(value: &AMQPValue) -> Option<HeaderValue> {
    let value = match value {
        AMQPValue::Boolean(b) => HeaderValue::Bool(*b),
        AMQPValue::ShortShortInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongLongInt(n) => HeaderValue::Int(*n),
        AMQPValue::ShortString(s) => HeaderValue::Text(s.as_str().to_string()),
        AMQPValue::LongString(s) => HeaderValue::Text(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        // Tables, arrays, floats etc. (e.g. RabbitMQ's x-death) are not used by the pipeline
        _ => return None,
    };
    Some(value)
}

fn from_field_table(table: Option<&FieldTable>) -> Headers {
    table
        .map(|t| {
            t.inner()
                .iter()
                .filter_map(|(k, v)| from_amqp_value(v).map(|v| (k.as_str().to_string(), v)))
                .collect()
        })
        .unwrap_or_default()
}

fn convert_delivery(delivery: lapin::message::Delivery, queue: &str) -> Delivery {
    let properties = &delivery.properties;
    Delivery {
        delivery_tag: delivery.delivery_tag,
        queue: queue.to_string(),
        headers: from_field_table(properties.headers().as_ref()),
        content_type: properties.content_type().as_ref().map(|ct| ct.as_str().to_string()),
        body: delivery.data,
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Topology {
                kind: "exchange",
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn declare_queue(&self, name: &str, dead_letter_exchange: Option<&str>) -> Result<(), BrokerError> {
        let mut arguments = FieldTable::default();
        if let Some(dlx) = dead_letter_exchange {
            arguments.insert(
                ShortString::from(DEAD_LETTER_EXCHANGE_ARG),
                AMQPValue::LongString(LongString::from(dlx)),
            );
        }
        self.channel
            .queue_declare(name, QueueDeclareOptions { durable: true, ..Default::default() }, arguments)
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Topology {
                kind: "queue",
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(queue, exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| BrokerError::Topology {
                kind: "binding",
                name: format!("{} -> {}", exchange, queue),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, destination: &Destination, message: OutboundMessage) -> Result<(), BrokerError> {
        let (exchange, routing_key) = match destination {
            Destination::Queue(queue) => ("", queue.as_str()),
            Destination::Exchange(exchange) => (exchange.as_str(), ""),
        };

        let mut properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_headers(to_field_table(&message.headers));
        if let Some(content_type) = message.content_type {
            properties = properties.with_content_type(ShortString::from(content_type));
        }

        let confirmation = self
            .channel
            .basic_publish(exchange, routing_key, BasicPublishOptions::default(), &message.body, properties)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(format!(
                "broker nacked publish to exchange '{}' with routing key '{}'",
                exchange, routing_key
            )));
        }
        debug!(exchange, routing_key, bytes = message.body.len(), "Published");
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        Ok(message.map(|m| convert_delivery(m.delivery, queue)))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        info!(queue, consumer_tag, "Consuming");
        let queue = queue.to_string();
        Ok(consumer
            .map(move |result| {
                result
                    .map(|delivery| convert_delivery(delivery, &queue))
                    .map_err(|e| BrokerError::Consume(e.to_string()))
            })
            .boxed())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: true })
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    // A passive declare of a missing queue fails with 404 and closes the channel
    async fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions { passive: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::UnknownQueue(format!("{}: {}", queue, e)))?;
        Ok(QueueStatus {
            messages: declared.message_count(),
            consumers: declared.consumer_count(),
        })
    }

    async fn purge(&self, queue: &str) -> Result<u32, BrokerError> {
        self.channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to purge {}: {}", queue, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_conversion_keeps_pipeline_shapes() {
        let mut headers = Headers::new();
        headers.insert("retry-count".into(), HeaderValue::Int(2));
        headers.insert("retry-reason".into(), HeaderValue::Text("timeout".into()));
        headers.insert("replayed".into(), HeaderValue::Bool(true));

        let table = to_field_table(&headers);
        assert_eq!(from_field_table(Some(&table)), headers);
    }

    #[test]
    fn test_narrow_integers_widen() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("retry-count"), AMQPValue::LongInt(3));
        table.insert(ShortString::from("small"), AMQPValue::ShortShortUInt(7));

        let headers = from_field_table(Some(&table));
        assert_eq!(headers.get("retry-count"), Some(&HeaderValue::Int(3)));
        assert_eq!(headers.get("small"), Some(&HeaderValue::Int(7)));
    }

    #[test]
    fn test_unsupported_values_are_dropped() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("x-death"), AMQPValue::FieldTable(FieldTable::default()));
        table.insert(ShortString::from("ratio"), AMQPValue::Double(0.5));

        assert!(from_field_table(Some(&table)).is_empty());
        assert!(from_field_table(None).is_empty());
    }
}
