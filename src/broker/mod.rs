// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process publish/subscribe message fabric.
//!
//! The broker is a small AMQP-flavoured model: topic exchanges route published
//! messages into bound queues, consumers hold deliveries until they acknowledge
//! them, and durable queues can be snapshotted and recovered.
//!
//! Delivery is pull based. The owner of a broker repeatedly calls
//! [`Broker::next_delivery`] and dispatches the returned message by its
//! consumer tag. This keeps handlers as ordinary `&mut self` methods on the
//! owner while preserving the fabric's ordering contract:
//!
//! * a consumer never holds more than `prefetch` unacknowledged deliveries
//! * among consumers able to receive, the highest priority is served first
//! * ties are broken by publish order, then by consumer registration order
//!
//! Control-plane subscriptions (stop/discard) use a higher priority than the
//! lifecycle queues, so they overtake in-flight lifecycle work.
//!
//! # Examples
//!
//! ```
//! use activity_engine::broker::{Broker, ConsumeOptions, Content, MessageProperties, QueueOptions};
//!
//! let mut broker = Broker::new("task_1");
//! broker.assert_exchange("run");
//! broker.assert_queue("run-q", QueueOptions::durable());
//! broker.bind_queue("run-q", "run", "run.#", 0).unwrap();
//! broker.consume("run-q", ConsumeOptions::new("_activity-run").exclusive()).unwrap();
//!
//! broker.publish("run", "run.enter", Content::new(), MessageProperties::new()).unwrap();
//! broker.publish("run", "run.start", Content::new(), MessageProperties::new()).unwrap();
//!
//! let enter = broker.next_delivery().unwrap();
//! assert_eq!(enter.routing_key(), "run.enter");
//!
//! // prefetch 1: nothing more until run.enter is acknowledged
//! assert!(broker.next_delivery().is_none());
//! broker.ack(&enter);
//! assert_eq!(broker.next_delivery().unwrap().routing_key(), "run.start");
//! ```

mod message;
mod queue;
mod routing;

pub use message::{Content, Message, MessageFields, MessageProperties};
pub use queue::{ConsumeOptions, Queue, QueueOptions};
pub use routing::RoutingPattern;

use crate::errors::BrokerError;
use crate::observability::messages::broker::{ConsumerCancelled, MandatoryMessageUnroutable};
use crate::observability::messages::StructuredLog;
use queue::{Consumer, Pending};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    pattern: RoutingPattern,
    priority: i32,
}

#[derive(Debug, Clone, Default)]
struct Exchange {
    bindings: Vec<Binding>,
}

/// Serializable snapshot of the durable part of a broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerState {
    pub queues: Vec<QueueState>,
    #[serde(default)]
    pub bindings: Vec<BindingState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub name: String,
    pub options: QueueOptions,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingState {
    pub exchange: String,
    pub queue: String,
    pub pattern: String,
    pub priority: i32,
}

/// Topic exchanges, queues and consumers owned by one element.
#[derive(Debug, Clone)]
pub struct Broker {
    name: String,
    exchanges: BTreeMap<String, Exchange>,
    queues: BTreeMap<String, Queue>,
    consumers: Vec<Consumer>,
    sequence: u64,
    delivery_tag: u64,
}

impl Broker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exchanges: BTreeMap::new(),
            queues: BTreeMap::new(),
            consumers: Vec::new(),
            sequence: 0,
            delivery_tag: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a topic exchange; no-op if it exists.
    pub fn assert_exchange(&mut self, name: &str) {
        self.exchanges.entry(name.to_string()).or_default();
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    /// Declare a queue; an existing queue keeps its messages and options.
    pub fn assert_queue(&mut self, name: &str, options: QueueOptions) {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Queue::new(name, options));
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn get_queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    /// Delete a queue together with its bindings and consumers.
    pub fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        self.consumers.retain(|c| c.queue != name);
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
    }

    /// Bind a queue to an exchange. Binding the same pattern twice is a no-op.
    pub fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        pattern: &str,
        priority: i32,
    ) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(self.queue_not_found(queue));
        }
        let broker = self.name.clone();
        let target = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                broker,
                exchange: exchange.to_string(),
            })?;

        if target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern.as_str() == pattern)
        {
            return Ok(());
        }

        target.bindings.push(Binding {
            queue: queue.to_string(),
            pattern: RoutingPattern::compile(pattern),
            priority,
        });
        // stable: equal priorities keep bind order
        target.bindings.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn unbind_queue(&mut self, queue: &str, exchange: &str, pattern: &str) {
        if let Some(target) = self.exchanges.get_mut(exchange) {
            target
                .bindings
                .retain(|b| !(b.queue == queue && b.pattern.as_str() == pattern));
        }
    }

    /// Route a message to every queue bound with a matching pattern.
    ///
    /// No matching binding is a silent no-op unless the message is mandatory,
    /// in which case [`BrokerError::Unroutable`] is returned.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        content: Content,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        let target = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound {
                broker: self.name.clone(),
                exchange: exchange.to_string(),
            })?;

        let mut targets: Vec<String> = Vec::new();
        for binding in target.bindings.iter() {
            if binding.pattern.matches(routing_key) && !targets.contains(&binding.queue) {
                targets.push(binding.queue.clone());
            }
        }

        if targets.is_empty() {
            if properties.mandatory {
                MandatoryMessageUnroutable {
                    broker: &self.name,
                    exchange,
                    routing_key,
                }
                .log();
                return Err(BrokerError::Unroutable {
                    broker: self.name.clone(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                });
            }
            return Ok(());
        }

        self.sequence += 1;
        let message = Message::new(exchange, routing_key, content, properties);
        for queue_name in targets {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.push(self.sequence, message.clone());
            }
        }
        Ok(())
    }

    /// Put a message straight onto a queue, bypassing exchanges.
    pub fn queue_message(
        &mut self,
        queue: &str,
        routing_key: &str,
        content: Content,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(self.queue_not_found(queue));
        }
        self.sequence += 1;
        let sequence = self.sequence;
        let message = Message::new("", routing_key, content, properties);
        if let Some(target) = self.queues.get_mut(queue) {
            target.push(sequence, message);
        }
        Ok(())
    }

    /// Register a consumer.
    pub fn consume(&mut self, queue: &str, options: ConsumeOptions) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(self.queue_not_found(queue));
        }

        let existing: Vec<&Consumer> = self.consumers.iter().filter(|c| c.queue == queue).collect();
        if let Some(holder) = existing.iter().find(|c| c.options.exclusive) {
            return Err(self.exclusive_conflict(queue, holder.tag(), &options.consumer_tag));
        }
        if options.exclusive {
            if let Some(holder) = existing.first() {
                return Err(self.exclusive_conflict(queue, holder.tag(), &options.consumer_tag));
            }
        }

        self.consumers.push(Consumer {
            queue: queue.to_string(),
            options,
            unacked: 0,
        });
        Ok(())
    }

    /// Register a consumer unless one with the same tag already consumes the queue.
    pub fn assert_consumer(
        &mut self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError> {
        if self
            .consumers
            .iter()
            .any(|c| c.queue == queue && c.tag() == options.consumer_tag)
        {
            return Ok(());
        }
        self.consume(queue, options)
    }

    /// Consume from a temporary, auto-deleted queue bound to `exchange` with `pattern`.
    ///
    /// The queue is named after the consumer tag and disappears on cancel.
    pub fn subscribe_tmp(
        &mut self,
        exchange: &str,
        pattern: &str,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError> {
        if self.has_consumer(&options.consumer_tag) {
            return Ok(());
        }
        let queue = format!("tmp-{}", options.consumer_tag);
        self.assert_queue(&queue, QueueOptions::transient());
        self.bind_queue(&queue, exchange, pattern, options.priority)?;
        self.consume(&queue, options)
    }

    /// Remove a consumer, returning its unacknowledged deliveries to the queue.
    pub fn cancel(&mut self, consumer_tag: &str) -> bool {
        let Some(idx) = self.consumers.iter().position(|c| c.tag() == consumer_tag) else {
            return false;
        };
        let consumer = self.consumers.remove(idx);

        let mut requeued = 0;
        let mut delete = false;
        if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            requeued = queue.requeue_consumer(consumer_tag);
            delete = queue.options().auto_delete
                && !self.consumers.iter().any(|c| c.queue == consumer.queue);
        }
        if delete {
            self.delete_queue(&consumer.queue);
        }

        ConsumerCancelled {
            broker: &self.name,
            consumer_tag,
            requeued,
        }
        .log();
        true
    }

    pub fn has_consumer(&self, consumer_tag: &str) -> bool {
        self.consumers.iter().any(|c| c.tag() == consumer_tag)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.consumers.iter().filter(|c| c.queue == queue).count()
    }

    /// Hand the next message to the consumer that should receive it.
    pub fn next_delivery(&mut self) -> Option<Message> {
        let mut best: Option<(usize, usize, i32, u64)> = None;
        for (ci, consumer) in self.consumers.iter().enumerate() {
            if !consumer.has_capacity() {
                continue;
            }
            let Some(queue) = self.queues.get(&consumer.queue) else {
                continue;
            };
            let Some(mi) = queue.first_ready() else {
                continue;
            };
            let sequence = queue.messages[mi].sequence;
            let priority = consumer.options.priority;
            let better = match best {
                None => true,
                Some((_, _, best_priority, best_sequence)) => {
                    priority > best_priority
                        || (priority == best_priority && sequence < best_sequence)
                }
            };
            if better {
                best = Some((ci, mi, priority, sequence));
            }
        }

        let (ci, mi, _, _) = best?;
        self.delivery_tag += 1;
        let delivery_tag = self.delivery_tag;
        let consumer = &mut self.consumers[ci];
        let queue = self.queues.get_mut(&consumer.queue)?;

        let mut message = if consumer.options.no_ack {
            queue.messages.remove(mi).message
        } else {
            let entry = &mut queue.messages[mi];
            entry.pending = Some(Pending {
                consumer_tag: consumer.tag().to_string(),
                delivery_tag,
            });
            consumer.unacked += 1;
            entry.message.clone()
        };

        message.fields.consumer_tag = Some(consumer.tag().to_string());
        message.fields.delivery_tag = Some(delivery_tag);
        message.fields.queue = Some(consumer.queue.clone());
        Some(message)
    }

    /// Acknowledge a delivery. Unknown or already settled deliveries are ignored.
    pub fn ack(&mut self, message: &Message) {
        let Some((queue, delivery_tag)) = Self::delivery_of(message) else {
            return;
        };
        let settled = self
            .queues
            .get_mut(queue)
            .and_then(|q| q.take_pending(delivery_tag));
        if let Some(settled) = settled {
            if let Some(pending) = settled.pending {
                self.release(&pending.consumer_tag, 1);
            }
        }
    }

    /// Acknowledge this delivery and every earlier one held by the same consumer.
    pub fn ack_all_up_to(&mut self, message: &Message) {
        let Some((queue, delivery_tag)) = Self::delivery_of(message) else {
            return;
        };
        let Some(consumer_tag) = message.fields.consumer_tag.as_deref() else {
            return;
        };
        let settled = self
            .queues
            .get_mut(queue)
            .map(|q| q.take_pending_up_to(consumer_tag, delivery_tag))
            .unwrap_or(0);
        self.release(consumer_tag, settled);
    }

    /// Reject a delivery, optionally returning it to its queue.
    pub fn nack(&mut self, message: &Message, requeue: bool) {
        let Some((queue, delivery_tag)) = Self::delivery_of(message) else {
            return;
        };
        let Some(target) = self.queues.get_mut(queue) else {
            return;
        };
        let settled = if requeue {
            target.requeue(delivery_tag)
        } else {
            target.take_pending(delivery_tag).is_some()
        };
        if settled {
            if let Some(tag) = message.fields.consumer_tag.as_deref() {
                self.release(tag, 1);
            }
        }
    }

    /// Drop undelivered messages from a queue.
    pub fn purge(&mut self, queue: &str) -> usize {
        self.queues.get_mut(queue).map(Queue::purge).unwrap_or(0)
    }

    /// Take the first undelivered message of a queue without a consumer.
    pub fn get(&mut self, queue: &str) -> Option<Message> {
        let target = self.queues.get_mut(queue)?;
        let idx = target.first_ready()?;
        let mut message = target.messages.remove(idx).message;
        message.fields.queue = Some(queue.to_string());
        Some(message)
    }

    pub fn message_count(&self, queue: &str) -> usize {
        self.queues.get(queue).map(Queue::message_count).unwrap_or(0)
    }

    /// Bind a plain queue for polling with [`Broker::get`].
    pub fn observe(&mut self, exchange: &str, pattern: &str, queue: &str) -> Result<(), BrokerError> {
        self.assert_queue(
            queue,
            QueueOptions {
                durable: false,
                auto_delete: false,
            },
        );
        self.bind_queue(queue, exchange, pattern, 0)
    }

    /// Snapshot durable queues, their persistent messages and bindings.
    pub fn get_state(&self) -> BrokerState {
        let queues: Vec<QueueState> = self
            .queues
            .values()
            .filter(|q| q.options().durable)
            .map(|q| QueueState {
                name: q.name().to_string(),
                options: q.options(),
                messages: q.snapshot(),
            })
            .collect();

        let mut bindings = Vec::new();
        for (exchange, target) in self.exchanges.iter() {
            for binding in target.bindings.iter() {
                if queues.iter().any(|q| q.name == binding.queue) {
                    bindings.push(BindingState {
                        exchange: exchange.clone(),
                        queue: binding.queue.clone(),
                        pattern: binding.pattern.as_str().to_string(),
                        priority: binding.priority,
                    });
                }
            }
        }

        BrokerState { queues, bindings }
    }

    /// Restore a snapshot. Every restored message is flagged as redelivered.
    pub fn recover(&mut self, state: &BrokerState) {
        for queue_state in state.queues.iter() {
            self.assert_queue(&queue_state.name, queue_state.options);
            for consumer in self.consumers.iter_mut() {
                if consumer.queue == queue_state.name {
                    consumer.unacked = 0;
                }
            }
            let mut recovered = Vec::with_capacity(queue_state.messages.len());
            for message in queue_state.messages.iter() {
                self.sequence += 1;
                let mut message = message.clone();
                message.fields.redelivered = true;
                recovered.push((self.sequence, message));
            }
            if let Some(queue) = self.queues.get_mut(&queue_state.name) {
                queue.messages.clear();
                for (sequence, message) in recovered {
                    queue.push(sequence, message);
                }
            }
        }

        for binding in state.bindings.iter() {
            if self.has_exchange(&binding.exchange) {
                // queue was asserted above, bind cannot fail
                let _ = self.bind_queue(
                    &binding.queue,
                    &binding.exchange,
                    &binding.pattern,
                    binding.priority,
                );
            }
        }
    }

    fn delivery_of(message: &Message) -> Option<(&str, u64)> {
        Some((
            message.fields.queue.as_deref()?,
            message.fields.delivery_tag?,
        ))
    }

    fn release(&mut self, consumer_tag: &str, count: usize) {
        if let Some(consumer) = self.consumers.iter_mut().find(|c| c.tag() == consumer_tag) {
            consumer.unacked = consumer.unacked.saturating_sub(count);
        }
    }

    fn queue_not_found(&self, queue: &str) -> BrokerError {
        BrokerError::QueueNotFound {
            broker: self.name.clone(),
            queue: queue.to_string(),
        }
    }

    fn exclusive_conflict(&self, queue: &str, holder: &str, consumer_tag: &str) -> BrokerError {
        BrokerError::ExclusiveConsumer {
            broker: self.name.clone(),
            queue: queue.to_string(),
            holder: holder.to_string(),
            consumer_tag: consumer_tag.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Broker {
        let mut broker = Broker::new("test");
        broker.assert_exchange("run");
        broker.assert_exchange("api");
        broker.assert_queue("run-q", QueueOptions::durable());
        broker.bind_queue("run-q", "run", "run.#", 0).unwrap();
        broker
    }

    fn publish(broker: &mut Broker, exchange: &str, key: &str) {
        broker
            .publish(exchange, key, Content::new(), MessageProperties::new())
            .unwrap();
    }

    #[test]
    fn test_publish_without_binding_is_noop() {
        let mut broker = broker();
        assert!(broker
            .publish("api", "activity.stop.x", Content::new(), MessageProperties::new())
            .is_ok());
    }

    #[test]
    fn test_mandatory_publish_without_binding_fails() {
        let mut broker = broker();
        let result = broker.publish(
            "api",
            "activity.error",
            Content::new(),
            MessageProperties::new().mandatory(true),
        );
        assert!(matches!(result, Err(BrokerError::Unroutable { .. })));
    }

    #[test]
    fn test_unknown_exchange_fails() {
        let mut broker = broker();
        let result = broker.publish("nope", "x", Content::new(), MessageProperties::new());
        assert!(matches!(result, Err(BrokerError::ExchangeNotFound { .. })));
    }

    #[test]
    fn test_exclusive_consumer_rejects_second() {
        let mut broker = broker();
        broker
            .consume("run-q", ConsumeOptions::new("a").exclusive())
            .unwrap();
        let result = broker.consume("run-q", ConsumeOptions::new("b"));
        assert!(matches!(result, Err(BrokerError::ExclusiveConsumer { .. })));
        assert!(broker
            .assert_consumer("run-q", ConsumeOptions::new("a").exclusive())
            .is_ok());
    }

    #[test]
    fn test_higher_priority_consumer_is_served_first() {
        let mut broker = broker();
        broker.consume("run-q", ConsumeOptions::new("run")).unwrap();
        broker
            .subscribe_tmp("api", "activity.*.e1", ConsumeOptions::new("api").no_ack().priority(100))
            .unwrap();

        publish(&mut broker, "run", "run.enter");
        publish(&mut broker, "api", "activity.stop.e1");

        let first = broker.next_delivery().unwrap();
        assert_eq!(first.routing_key(), "activity.stop.e1");
        assert_eq!(first.fields.consumer_tag.as_deref(), Some("api"));
        let second = broker.next_delivery().unwrap();
        assert_eq!(second.routing_key(), "run.enter");
    }

    #[test]
    fn test_equal_priority_follows_publish_order() {
        let mut broker = broker();
        broker.assert_exchange("execution");
        broker.assert_queue("execution-q", QueueOptions::durable());
        broker
            .bind_queue("execution-q", "execution", "execution.#", 0)
            .unwrap();
        broker.consume("run-q", ConsumeOptions::new("run")).unwrap();
        broker
            .consume("execution-q", ConsumeOptions::new("execution"))
            .unwrap();

        publish(&mut broker, "execution", "execution.completed");
        publish(&mut broker, "run", "run.end");

        assert_eq!(
            broker.next_delivery().unwrap().routing_key(),
            "execution.completed"
        );
        assert_eq!(broker.next_delivery().unwrap().routing_key(), "run.end");
    }

    #[test]
    fn test_cancel_requeues_unacked_as_redelivered() {
        let mut broker = broker();
        broker.consume("run-q", ConsumeOptions::new("run")).unwrap();
        publish(&mut broker, "run", "run.execute");

        let delivered = broker.next_delivery().unwrap();
        assert!(!delivered.is_redelivered());
        assert!(broker.cancel("run"));

        broker.consume("run-q", ConsumeOptions::new("run")).unwrap();
        let again = broker.next_delivery().unwrap();
        assert_eq!(again.routing_key(), "run.execute");
        assert!(again.is_redelivered());
    }

    #[test]
    fn test_cancel_deletes_temporary_queue() {
        let mut broker = broker();
        broker
            .subscribe_tmp("api", "activity.#", ConsumeOptions::new("tmp").no_ack())
            .unwrap();
        assert!(broker.has_queue("tmp-tmp"));
        broker.cancel("tmp");
        assert!(!broker.has_queue("tmp-tmp"));
        assert!(broker
            .publish("api", "activity.stop", Content::new(), MessageProperties::new())
            .is_ok());
    }

    #[test]
    fn test_ack_all_up_to_settles_earlier_deliveries() {
        let mut broker = broker();
        broker
            .consume("run-q", ConsumeOptions::new("run").prefetch(10))
            .unwrap();
        publish(&mut broker, "run", "run.a");
        publish(&mut broker, "run", "run.b");
        publish(&mut broker, "run", "run.c");

        let _a = broker.next_delivery().unwrap();
        let b = broker.next_delivery().unwrap();
        broker.ack_all_up_to(&b);
        assert_eq!(broker.message_count("run-q"), 1);
    }

    #[test]
    fn test_state_round_trip_redelivers_durable_only() {
        let mut broker = broker();
        broker.consume("run-q", ConsumeOptions::new("run")).unwrap();
        publish(&mut broker, "run", "run.execute");
        broker
            .publish(
                "run",
                "run.next",
                Content::new(),
                MessageProperties::new().transient(),
            )
            .unwrap();
        let _held = broker.next_delivery().unwrap();

        let state = broker.get_state();
        let json = serde_json::to_string(&state).unwrap();
        let state: BrokerState = serde_json::from_str(&json).unwrap();

        let mut recovered = Broker::new("test");
        recovered.assert_exchange("run");
        recovered.recover(&state);
        recovered
            .consume("run-q", ConsumeOptions::new("run"))
            .unwrap();

        let message = recovered.next_delivery().unwrap();
        assert_eq!(message.routing_key(), "run.execute");
        assert!(message.is_redelivered());
        recovered.ack(&message);
        assert!(recovered.next_delivery().is_none());

        publish(&mut recovered, "run", "run.end");
        assert_eq!(recovered.next_delivery().unwrap().routing_key(), "run.end");
    }

    #[test]
    fn test_get_polls_without_consumer() {
        let mut broker = broker();
        broker.assert_exchange("event");
        broker.observe("event", "activity.#", "events").unwrap();
        broker
            .publish("event", "activity.enter", Content::new(), MessageProperties::new())
            .unwrap();
        assert_eq!(broker.get("events").unwrap().routing_key(), "activity.enter");
        assert!(broker.get("events").is_none());
    }

    #[test]
    fn test_purge_drops_ready_messages() {
        let mut broker = broker();
        publish(&mut broker, "run", "run.a");
        publish(&mut broker, "run", "run.b");
        assert_eq!(broker.purge("run-q"), 2);
        assert_eq!(broker.message_count("run-q"), 0);
    }
}
