// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for activity lifecycle events.
//!
//! This module contains message types for logging events related to:
//! * Lifecycle transitions (enter, start, end, discard, leave)
//! * Stop and resume control signals
//! * Parallel join bookkeeping
//! * Outbound flow evaluation

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Activity moved to a new lifecycle state.
///
/// # Log Level
/// `debug!` - Emitted for every lifecycle message
///
/// # Example
/// ```
/// use activity_engine::observability::messages::activity::ActivityStateChanged;
///
/// let msg = ActivityStateChanged {
///     activity_id: "review",
///     execution_id: "review_9a8b",
///     state: "start",
///     redelivered: true,
/// };
///
/// assert_eq!(msg.to_string(), "<review_9a8b (review)> start (redelivered)");
/// ```
pub struct ActivityStateChanged<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub state: &'a str,
    pub redelivered: bool,
}

impl Display for ActivityStateChanged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> {}",
            self.execution_id, self.activity_id, self.state
        )?;
        if self.redelivered {
            write!(f, " (redelivered)")?;
        }
        Ok(())
    }
}

impl StructuredLog for ActivityStateChanged<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            state = self.state,
            redelivered = self.redelivered,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "activity",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            state = self.state,
        )
    }
}

/// Activity was stopped by a control message.
///
/// # Log Level
/// `debug!` - Control-plane event
pub struct ActivityStopped<'a> {
    pub activity_id: &'a str,
    pub execution_id: Option<&'a str>,
    pub was_running: bool,
}

impl Display for ActivityStopped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> stopped",
            self.execution_id.unwrap_or("-"),
            self.activity_id
        )?;
        if !self.was_running {
            write!(f, " while idle")?;
        }
        Ok(())
    }
}

impl StructuredLog for ActivityStopped<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            was_running = self.was_running,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "activity_stopped",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
        )
    }
}

/// Activity resumed from a recovered state.
///
/// # Log Level
/// `debug!` - Recovery path
pub struct ActivityResumed<'a> {
    pub activity_id: &'a str,
    pub routing_key: &'a str,
}

impl Display for ActivityResumed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "<{}> resume from {}", self.activity_id, self.routing_key)
    }
}

impl StructuredLog for ActivityResumed<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            routing_key = self.routing_key,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "activity_resumed",
            span_name = name,
            activity_id = self.activity_id,
            routing_key = self.routing_key,
        )
    }
}

/// Parallel join received an inbound signal and still waits for more.
///
/// # Log Level
/// `debug!` - Join bookkeeping
pub struct JoinInboundPending<'a> {
    pub activity_id: &'a str,
    pub source_id: &'a str,
    pub action: &'a str,
    pub remaining: usize,
}

impl Display for JoinInboundPending<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{}> inbound {} from <{}>, {} remaining",
            self.activity_id, self.action, self.source_id, self.remaining
        )
    }
}

impl StructuredLog for JoinInboundPending<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            source_id = self.source_id,
            action = self.action,
            remaining = self.remaining,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "join",
            span_name = name,
            activity_id = self.activity_id,
            remaining = self.remaining,
        )
    }
}

/// Outbound flow condition evaluated.
///
/// # Log Level
/// `debug!` - Per-flow decision trace
pub struct FlowEvaluated<'a> {
    pub activity_id: &'a str,
    pub evaluation_id: &'a str,
    pub flow_id: &'a str,
    pub result: bool,
}

impl Display for FlowEvaluated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> flow <{}> evaluated to: {}",
            self.evaluation_id, self.activity_id, self.flow_id, self.result
        )
    }
}

impl StructuredLog for FlowEvaluated<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            evaluation_id = self.evaluation_id,
            flow_id = self.flow_id,
            result = self.result,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "flow_evaluated",
            span_name = name,
            activity_id = self.activity_id,
            flow_id = self.flow_id,
        )
    }
}

/// Outbound evaluation failed, usually a gateway deadlock.
///
/// # Log Level
/// `warn!` - Surfaces as an `activity.error` event
pub struct OutboundEvaluationFailed<'a> {
    pub activity_id: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for OutboundEvaluationFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{}> outbound evaluation failed: {}",
            self.activity_id, self.error
        )
    }
}

impl StructuredLog for OutboundEvaluationFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            activity_id = self.activity_id,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "outbound_failed",
            span_name = name,
            activity_id = self.activity_id,
        )
    }
}
