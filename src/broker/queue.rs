// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::message::Message;
use serde::{Deserialize, Serialize};

/// Queue declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Included in state snapshots and restored on recover
    pub durable: bool,
    /// Deleted when its last consumer is cancelled
    pub auto_delete: bool,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            auto_delete: false,
        }
    }

    pub fn transient() -> Self {
        Self {
            durable: false,
            auto_delete: true,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::durable()
    }
}

/// Consumer registration options.
///
/// # Examples
///
/// ```
/// use activity_engine::broker::ConsumeOptions;
///
/// let options = ConsumeOptions::new("_activity-execute")
///     .exclusive()
///     .prefetch(100)
///     .priority(100);
///
/// assert_eq!(options.prefetch, 100);
/// assert!(options.exclusive);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub exclusive: bool,
    /// Maximum number of unacknowledged deliveries held by the consumer
    pub prefetch: usize,
    /// Higher priority consumers are served first
    pub priority: i32,
    /// Deliveries are acknowledged on hand-off
    pub no_ack: bool,
}

impl ConsumeOptions {
    pub fn new(consumer_tag: impl Into<String>) -> Self {
        Self {
            consumer_tag: consumer_tag.into(),
            exclusive: false,
            prefetch: 1,
            priority: 0,
            no_ack: false,
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub consumer_tag: String,
    pub delivery_tag: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub sequence: u64,
    pub message: Message,
    pub pending: Option<Pending>,
}

#[derive(Debug, Clone)]
pub(crate) struct Consumer {
    pub queue: String,
    pub options: ConsumeOptions,
    pub unacked: usize,
}

impl Consumer {
    pub fn tag(&self) -> &str {
        &self.options.consumer_tag
    }

    pub fn has_capacity(&self) -> bool {
        self.options.no_ack || self.unacked < self.options.prefetch
    }
}

/// A named FIFO of messages. Delivered-but-unacknowledged messages keep their
/// position so that requeue and snapshots preserve publish order.
#[derive(Debug, Clone)]
pub struct Queue {
    name: String,
    options: QueueOptions,
    pub(crate) messages: Vec<QueuedMessage>,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            messages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> QueueOptions {
        self.options
    }

    /// Total messages, delivered or not
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn push(&mut self, sequence: u64, message: Message) {
        self.messages.push(QueuedMessage {
            sequence,
            message,
            pending: None,
        });
    }

    pub(crate) fn first_ready(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.pending.is_none())
    }

    pub(crate) fn take_pending(&mut self, delivery_tag: u64) -> Option<QueuedMessage> {
        let idx = self.messages.iter().position(|m| {
            m.pending
                .as_ref()
                .is_some_and(|p| p.delivery_tag == delivery_tag)
        })?;
        Some(self.messages.remove(idx))
    }

    /// Remove every pending delivery of `consumer_tag` up to and including `delivery_tag`.
    pub(crate) fn take_pending_up_to(&mut self, consumer_tag: &str, delivery_tag: u64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| match &m.pending {
            Some(p) => !(p.consumer_tag == consumer_tag && p.delivery_tag <= delivery_tag),
            None => true,
        });
        before - self.messages.len()
    }

    pub(crate) fn requeue(&mut self, delivery_tag: u64) -> bool {
        for entry in self.messages.iter_mut() {
            if entry
                .pending
                .as_ref()
                .is_some_and(|p| p.delivery_tag == delivery_tag)
            {
                entry.pending = None;
                entry.message.fields.redelivered = true;
                return true;
            }
        }
        false
    }

    /// Return every delivery held by `consumer_tag` to the queue, flagged as redelivered.
    pub(crate) fn requeue_consumer(&mut self, consumer_tag: &str) -> usize {
        let mut count = 0;
        for entry in self.messages.iter_mut() {
            if entry
                .pending
                .as_ref()
                .is_some_and(|p| p.consumer_tag == consumer_tag)
            {
                entry.pending = None;
                entry.message.fields.redelivered = true;
                count += 1;
            }
        }
        count
    }

    /// Drop messages that are not currently delivered.
    pub(crate) fn purge(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.pending.is_some());
        before - self.messages.len()
    }

    /// Persistent messages in queue order with delivery bookkeeping stripped.
    pub(crate) fn snapshot(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.message.properties.persistent)
            .map(|m| {
                let mut message = m.message.clone();
                message.fields.consumer_tag = None;
                message.fields.delivery_tag = None;
                message.fields.queue = None;
                message
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::{Content, MessageProperties};

    fn message(key: &str, persistent: bool) -> Message {
        Message::new(
            "run",
            key,
            Content::new(),
            MessageProperties::new().persistent(persistent),
        )
    }

    #[test]
    fn test_snapshot_skips_transient_messages() {
        let mut queue = Queue::new("run-q", QueueOptions::durable());
        queue.push(1, message("run.enter", true));
        queue.push(2, message("run.next", false));
        queue.push(3, message("run.start", true));

        let keys: Vec<String> = queue
            .snapshot()
            .into_iter()
            .map(|m| m.fields.routing_key)
            .collect();
        assert_eq!(keys, vec!["run.enter", "run.start"]);
    }

    #[test]
    fn test_purge_keeps_pending() {
        let mut queue = Queue::new("run-q", QueueOptions::durable());
        queue.push(1, message("run.execute", true));
        queue.push(2, message("run.end", true));
        queue.messages[0].pending = Some(Pending {
            consumer_tag: "c".into(),
            delivery_tag: 7,
        });

        assert_eq!(queue.purge(), 1);
        assert_eq!(queue.message_count(), 1);
        assert_eq!(queue.first_ready(), None);
    }

    #[test]
    fn test_requeue_consumer_flags_redelivered() {
        let mut queue = Queue::new("execute-q", QueueOptions::durable());
        queue.push(1, message("execute.start", true));
        queue.messages[0].pending = Some(Pending {
            consumer_tag: "c".into(),
            delivery_tag: 1,
        });

        assert_eq!(queue.requeue_consumer("c"), 1);
        assert_eq!(queue.first_ready(), Some(0));
        assert!(queue.messages[0].message.fields.redelivered);
    }
}
