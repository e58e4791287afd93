// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the message fabric.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A mandatory message matched no binding.
///
/// # Log Level
/// `warn!` - The publisher receives a routing error
pub struct MandatoryMessageUnroutable<'a> {
    pub broker: &'a str,
    pub exchange: &'a str,
    pub routing_key: &'a str,
}

impl Display for MandatoryMessageUnroutable<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Mandatory message '{}' on exchange '{}' of '{}' was not routed to any queue",
            self.routing_key, self.exchange, self.broker
        )
    }
}

impl StructuredLog for MandatoryMessageUnroutable<'_> {
    fn log(&self) {
        tracing::warn!(
            broker = self.broker,
            exchange = self.exchange,
            routing_key = self.routing_key,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "mandatory_unroutable",
            span_name = name,
            broker = self.broker,
            exchange = self.exchange,
            routing_key = self.routing_key,
        )
    }
}

/// A consumer was cancelled.
///
/// # Log Level
/// `trace!` - High volume fabric bookkeeping
pub struct ConsumerCancelled<'a> {
    pub broker: &'a str,
    pub consumer_tag: &'a str,
    pub requeued: usize,
}

impl Display for ConsumerCancelled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Consumer '{}' of '{}' cancelled, {} message(s) requeued",
            self.consumer_tag, self.broker, self.requeued
        )
    }
}

impl StructuredLog for ConsumerCancelled<'_> {
    fn log(&self) {
        tracing::trace!(
            broker = self.broker,
            consumer_tag = self.consumer_tag,
            requeued = self.requeued,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::trace_span!(
            "consumer_cancelled",
            span_name = name,
            broker = self.broker,
            consumer_tag = self.consumer_tag,
        )
    }
}
