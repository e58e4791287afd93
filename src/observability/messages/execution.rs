// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the execution controller.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Execution controller started or resumed a behaviour.
///
/// # Log Level
/// `debug!` - Per activation
///
/// # Example
/// ```
/// use activity_engine::observability::messages::execution::ExecutionStarted;
///
/// let msg = ExecutionStarted {
///     activity_id: "approve",
///     execution_id: "approve_77c1",
///     resumed: false,
/// };
///
/// tracing::debug!("{}", msg);
/// ```
pub struct ExecutionStarted<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub resumed: bool,
}

impl Display for ExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let verb = if self.resumed { "resume execution" } else { "execute" };
        write!(f, "<{} ({})> {}", self.execution_id, self.activity_id, verb)
    }
}

impl StructuredLog for ExecutionStarted<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            resumed = self.resumed,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "execution",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
        )
    }
}

/// A postponed step finished; `completion` is `completed`, `discard` or `error`.
///
/// # Log Level
/// `debug!` - Completion aggregation trace
pub struct ExecutionCompleted<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub completion: &'a str,
    pub is_root_scope: bool,
}

impl Display for ExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let scope = if self.is_root_scope { "execution" } else { "sub execution" };
        write!(
            f,
            "<{} ({})> {} {}",
            self.execution_id, self.activity_id, self.completion, scope
        )
    }
}

impl StructuredLog for ExecutionCompleted<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            completion = self.completion,
            is_root_scope = self.is_root_scope,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "execution_completed",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            completion = self.completion,
        )
    }
}

/// A behaviour raised an error while executing.
///
/// # Log Level
/// `error!` - Republished as `execute.error`
pub struct BehaviourFailed<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for BehaviourFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> behaviour failed: {}",
            self.execution_id, self.activity_id, self.error
        )
    }
}

impl StructuredLog for BehaviourFailed<'_> {
    fn log(&self) {
        tracing::error!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "behaviour_failed",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
        )
    }
}

/// Discard requested for an activity that is not executing.
///
/// # Log Level
/// `warn!` - Ignored control signal
pub struct ExecutionNotRunning<'a> {
    pub activity_id: &'a str,
}

impl Display for ExecutionNotRunning<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "<{}> is not executing", self.activity_id)
    }
}

impl StructuredLog for ExecutionNotRunning<'_> {
    fn log(&self) {
        tracing::warn!(activity_id = self.activity_id, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "execution_not_running",
            span_name = name,
            activity_id = self.activity_id,
        )
    }
}
