// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Inbound synchronization for parallel joins.
//!
//! A join buffers one inbound signal per incoming flow. Signals stay
//! unacknowledged in the inbound queue while buffered, so a snapshot taken
//! mid-join redelivers them and the buffer is rebuilt on resume.

use crate::broker::{Content, Message};
use crate::flows::discard_sequence_of;

/// Result of buffering one inbound signal.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// A second signal over a flow that already reported
    Duplicate,
    Pending { remaining: usize },
    /// Every flow reported and at least one was taken
    Run {
        inbound: Vec<Content>,
        messages: Vec<Message>,
    },
    /// Every flow reported and all were discarded
    Discard {
        inbound: Vec<Content>,
        discard_sequence: Vec<String>,
        messages: Vec<Message>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct JoinSynchronizer {
    expected: usize,
    buffer: Vec<Message>,
}

impl JoinSynchronizer {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            buffer: Vec::new(),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Distinct flows heard from so far.
    pub fn touched(&self) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        for message in self.buffer.iter() {
            let id = message.content.id().unwrap_or_default();
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Buffer a `flow.take` / `flow.discard` signal.
    ///
    /// Duplicates are kept so that they are acknowledged with the rest, but
    /// they do not count towards completion.
    pub fn push(&mut self, message: Message) -> JoinOutcome {
        let id = message.content.id().map(str::to_string);
        let duplicate = self
            .buffer
            .iter()
            .any(|m| m.content.id().map(str::to_string) == id);
        self.buffer.push(message);
        if duplicate {
            return JoinOutcome::Duplicate;
        }

        let touched = self.touched();
        if touched < self.expected {
            return JoinOutcome::Pending {
                remaining: self.expected - touched,
            };
        }

        let messages = std::mem::take(&mut self.buffer);
        let inbound: Vec<Content> = messages.iter().map(|m| m.content.clone()).collect();
        let taken = messages.iter().any(|m| m.routing_key() == "flow.take");
        if taken {
            return JoinOutcome::Run { inbound, messages };
        }

        let mut discard_sequence: Vec<String> = Vec::new();
        for content in inbound.iter() {
            for id in discard_sequence_of(content) {
                if !discard_sequence.contains(&id) {
                    discard_sequence.push(id);
                }
            }
        }
        JoinOutcome::Discard {
            inbound,
            discard_sequence,
            messages,
        }
    }
}
