// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process broker with AMQP-like routing semantics.
//!
//! Queues are FIFO, fanout exchanges copy to every bound queue, and a
//! rejected delivery is routed through its queue's dead-letter exchange.
//! Publishes can be made to fail per destination so tests can drive the
//! error paths of the retry protocol.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::traits::{BrokerError, Delivery, DeliveryStream, Destination, MessageBroker, OutboundMessage, QueueStatus};

#[derive(Default)]
struct QueueState {
    dead_letter_exchange: Option<String>,
    ready: VecDeque<OutboundMessage>,
    consumers: u32,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    /// exchange name -> bound queues
    exchanges: HashMap<String, Vec<String>>,
    unacked: HashMap<u64, Delivery>,
    failing_targets: HashSet<String>,
}

impl State {
    fn route(&mut self, destination: &Destination, message: OutboundMessage) -> Result<(), BrokerError> {
        match destination {
            Destination::Queue(name) => {
                let queue = self
                    .queues
                    .get_mut(name)
                    .ok_or_else(|| BrokerError::UnknownQueue(name.clone()))?;
                queue.ready.push_back(message);
            }
            Destination::Exchange(name) => {
                let bound = self
                    .exchanges
                    .get(name)
                    .ok_or_else(|| BrokerError::UnknownExchange(name.clone()))?
                    .clone();
                for queue_name in bound {
                    if let Some(queue) = self.queues.get_mut(&queue_name) {
                        queue.ready.push_back(message.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    next_tag: AtomicU64,
    fail_acks: AtomicBool,
}

impl Inner {
    fn take_next(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state.lock();
        let message = state.queues.get_mut(queue)?.ready.pop_front()?;
        let delivery = Delivery {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed) + 1,
            queue: queue.to_string(),
            body: message.body,
            headers: message.headers,
            content_type: message.content_type,
        };
        state.unacked.insert(delivery.delivery_tag, delivery.clone());
        Some(delivery)
    }
}

/// One open consume stream; counted on its queue while alive.
struct Subscription {
    inner: Arc<Inner>,
    queue: String,
}

impl Subscription {
    fn open(inner: Arc<Inner>, queue: &str) -> Self {
        if let Some(q) = inner.state.lock().queues.get_mut(queue) {
            q.consumers += 1;
        }
        Self {
            inner,
            queue: queue.to_string(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(q) = self.inner.state.lock().queues.get_mut(&self.queue) {
            q.consumers = q.consumers.saturating_sub(1);
        }
    }
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                next_tag: AtomicU64::new(0),
                fail_acks: AtomicBool::new(false),
            }),
        }
    }

    /// Make every publish to `target` (queue or exchange name) fail, or stop doing so.
    pub fn set_publish_failure(&self, target: &str, failing: bool) {
        let mut state = self.inner.state.lock();
        if failing {
            state.failing_targets.insert(target.to_string());
        } else {
            state.failing_targets.remove(target);
        }
    }

    /// Make every ack fail, or stop doing so.
    pub fn set_ack_failure(&self, failing: bool) {
        self.inner.fail_acks.store(failing, Ordering::SeqCst);
    }

    /// Take the next ready message off `queue` as an unacked delivery.
    pub fn pop(&self, queue: &str) -> Option<Delivery> {
        self.inner.take_next(queue)
    }

    /// Ready (not yet delivered) messages in `queue`.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Copies of the ready messages in `queue`, front first.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet acked or rejected.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.inner.state.lock().unacked.len()
    }

    #[must_use]
    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue)
    }

    /// Dead-letter exchange argument the queue was declared with.
    #[must_use]
    pub fn dead_letter_exchange_of(&self, queue: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .and_then(|q| q.dead_letter_exchange.clone())
    }

    /// Queues bound to `exchange`.
    #[must_use]
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_fanout_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.inner.state.lock().exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, name: &str, dead_letter_exchange: Option<&str>) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();
        match state.queues.get(name) {
            Some(existing) if existing.dead_letter_exchange.as_deref() != dead_letter_exchange => {
                // AMQP answers PRECONDITION_FAILED for inequivalent arguments
                Err(BrokerError::Topology {
                    kind: "queue",
                    name: name.to_string(),
                    reason: format!(
                        "inequivalent x-dead-letter-exchange: declared {:?}, requested {:?}",
                        existing.dead_letter_exchange, dead_letter_exchange
                    ),
                })
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        dead_letter_exchange: dead_letter_exchange.map(str::to_string),
                        ..QueueState::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let bound = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn publish(&self, destination: &Destination, message: OutboundMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock();
            let target = match destination {
                Destination::Queue(name) | Destination::Exchange(name) => name,
            };
            if state.failing_targets.contains(target) {
                return Err(BrokerError::Publish(format!("injected failure publishing to {}", target)));
            }
            state.route(destination, message)?;
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        if self.inner.fail_acks.load(Ordering::SeqCst) {
            return Err(BrokerError::Ack(format!("injected failure acking {}", delivery.delivery_tag)));
        }
        self.inner
            .state
            .lock()
            .unacked
            .remove(&delivery.delivery_tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(delivery.delivery_tag))
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock();
            let rejected = state
                .unacked
                .remove(&delivery.delivery_tag)
                .ok_or(BrokerError::UnknownDelivery(delivery.delivery_tag))?;
            let dlx = state
                .queues
                .get(&rejected.queue)
                .and_then(|q| q.dead_letter_exchange.clone());
            if let Some(dlx) = dlx {
                // A missing DLX drops the message, as RabbitMQ does
                if state.exchanges.contains_key(&dlx) {
                    state.route(&Destination::Exchange(dlx), rejected.to_outbound())?;
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        if !self.has_queue(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        Ok(self.inner.take_next(queue))
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        if !self.has_queue(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let subscription = Subscription::open(Arc::clone(&self.inner), queue);
        let deliveries = stream::unfold(subscription, |subscription| async move {
            let delivery = loop {
                // Register before checking so a publish in between is not missed
                let notified = subscription.inner.notify.notified();
                if let Some(delivery) = subscription.inner.take_next(&subscription.queue) {
                    break delivery;
                }
                notified.await;
            };
            Some((Ok(delivery), subscription))
        });
        Ok(deliveries.boxed())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock();
            let returned = state
                .unacked
                .remove(&delivery.delivery_tag)
                .ok_or(BrokerError::UnknownDelivery(delivery.delivery_tag))?;
            let queue = state
                .queues
                .get_mut(&returned.queue)
                .ok_or_else(|| BrokerError::UnknownQueue(returned.queue.clone()))?;
            queue.ready.push_front(returned.to_outbound());
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn queue_status(&self, queue: &str) -> Result<QueueStatus, BrokerError> {
        let state = self.inner.state.lock();
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        Ok(QueueStatus {
            messages: u32::try_from(q.ready.len()).unwrap_or(u32::MAX),
            consumers: q.consumers,
        })
    }

    async fn purge(&self, queue: &str) -> Result<u32, BrokerError> {
        let mut state = self.inner.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        let dropped = u32::try_from(q.ready.len()).unwrap_or(u32::MAX);
        q.ready.clear();
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::HeaderValue;
    use std::time::Duration;

    async fn broker_with_queue(name: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(name, None).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_and_pop_fifo() {
        let broker = broker_with_queue("q").await;
        for i in 0..3u8 {
            broker
                .publish(&Destination::Queue("q".into()), OutboundMessage::json(vec![i]))
                .await
                .unwrap();
        }

        assert_eq!(broker.queue_len("q"), 3);
        assert_eq!(broker.pop("q").unwrap().body, vec![0]);
        assert_eq!(broker.pop("q").unwrap().body, vec![1]);
        assert_eq!(broker.unacked_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_queue_fails() {
        let broker = InMemoryBroker::new();
        let result = broker
            .publish(&Destination::Queue("missing".into()), OutboundMessage::default())
            .await;
        assert!(matches!(result, Err(BrokerError::UnknownQueue(_))));
    }

    #[tokio::test]
    async fn test_ack_removes_delivery_once() {
        let broker = broker_with_queue("q").await;
        broker
            .publish(&Destination::Queue("q".into()), OutboundMessage::default())
            .await
            .unwrap();
        let delivery = broker.pop("q").unwrap();

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert!(matches!(broker.ack(&delivery).await, Err(BrokerError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_reject_routes_through_dead_letter_exchange() {
        let broker = InMemoryBroker::new();
        broker.declare_fanout_exchange("q_dlx").await.unwrap();
        broker.declare_queue("q_dlq", None).await.unwrap();
        broker.bind_queue("q_dlq", "q_dlx").await.unwrap();
        broker.declare_queue("q", Some("q_dlx")).await.unwrap();

        let mut message = OutboundMessage::json(b"{}".to_vec());
        message.headers.insert("retry-count".into(), HeaderValue::Int(2));
        broker.publish(&Destination::Queue("q".into()), message).await.unwrap();

        let delivery = broker.pop("q").unwrap();
        broker.reject(&delivery).await.unwrap();

        assert_eq!(broker.queue_len("q"), 0);
        let dead = broker.messages("q_dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, b"{}");
        assert_eq!(dead[0].headers.get("retry-count"), Some(&HeaderValue::Int(2)));
    }

    #[tokio::test]
    async fn test_reject_without_dlx_drops() {
        let broker = broker_with_queue("q").await;
        broker
            .publish(&Destination::Queue("q".into()), OutboundMessage::default())
            .await
            .unwrap();
        let delivery = broker.pop("q").unwrap();
        broker.reject(&delivery).await.unwrap();

        assert_eq!(broker.queue_len("q"), 0);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_redeclare_is_idempotent_but_checks_arguments() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("q", Some("q_dlx")).await.unwrap();
        broker.declare_queue("q", Some("q_dlx")).await.unwrap();

        let err = broker.declare_queue("q", None).await.unwrap_err();
        assert!(matches!(err, BrokerError::Topology { kind: "queue", .. }));
    }

    #[tokio::test]
    async fn test_injected_publish_failure_is_per_target() {
        let broker = broker_with_queue("a").await;
        broker.declare_queue("b", None).await.unwrap();
        broker.set_publish_failure("a", true);

        let failed = broker
            .publish(&Destination::Queue("a".into()), OutboundMessage::default())
            .await;
        assert!(matches!(failed, Err(BrokerError::Publish(_))));
        broker
            .publish(&Destination::Queue("b".into()), OutboundMessage::default())
            .await
            .unwrap();

        broker.set_publish_failure("a", false);
        broker
            .publish(&Destination::Queue("a".into()), OutboundMessage::default())
            .await
            .unwrap();
        assert_eq!(broker.queue_len("a"), 1);
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish() {
        let broker = broker_with_queue("q").await;
        let mut deliveries = broker.consume("q", "test").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish(&Destination::Queue("q".into()), OutboundMessage::json(b"late".to_vec()))
                .await
                .unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), deliveries.next())
            .await
            .expect("delivery within timeout")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"late");
        assert_eq!(delivery.queue, "q");
        assert_eq!(delivery.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_requeue_returns_delivery_to_the_front() {
        let broker = broker_with_queue("q").await;
        for body in [b"a", b"b"] {
            broker
                .publish(&Destination::Queue("q".into()), OutboundMessage::json(body.to_vec()))
                .await
                .unwrap();
        }
        let first = broker.pop("q").unwrap();

        broker.requeue(&first).await.unwrap();

        assert_eq!(broker.unacked_count(), 0);
        let bodies: Vec<_> = broker.messages("q").into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(matches!(broker.requeue(&first).await, Err(BrokerError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_queue_status_counts_ready_messages_and_consumers() {
        let broker = broker_with_queue("q").await;
        for _ in 0..3 {
            broker
                .publish(&Destination::Queue("q".into()), OutboundMessage::default())
                .await
                .unwrap();
        }
        let _held = broker.pop("q").unwrap();
        assert_eq!(broker.queue_status("q").await.unwrap(), QueueStatus { messages: 2, consumers: 0 });

        let stream = broker.consume("q", "t").await.unwrap();
        assert_eq!(broker.queue_status("q").await.unwrap().consumers, 1);
        drop(stream);
        assert_eq!(broker.queue_status("q").await.unwrap().consumers, 0);

        assert!(matches!(broker.queue_status("nope").await, Err(BrokerError::UnknownQueue(_))));
    }

    #[tokio::test]
    async fn test_purge_drops_ready_messages_only() {
        let broker = broker_with_queue("q").await;
        for _ in 0..3 {
            broker
                .publish(&Destination::Queue("q".into()), OutboundMessage::default())
                .await
                .unwrap();
        }
        let held = broker.pop("q").unwrap();

        assert_eq!(broker.purge("q").await.unwrap(), 2);
        assert_eq!(broker.queue_len("q"), 0);
        broker.ack(&held).await.unwrap();
        assert_eq!(broker.purge("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_unknown_queue() {
        let broker = InMemoryBroker::new();
        assert!(matches!(broker.consume("nope", "t").await, Err(BrokerError::UnknownQueue(_))));
    }
}
