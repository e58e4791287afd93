// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for process scopes, sub-processes and loops.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A process scope started executing its start activities.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ProcessExecutionStarted<'a> {
    pub process_id: &'a str,
    pub execution_id: &'a str,
    pub start_count: usize,
}

impl Display for ProcessExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> execute with {} start activit{}",
            self.execution_id,
            self.process_id,
            self.start_count,
            if self.start_count == 1 { "y" } else { "ies" }
        )
    }
}

impl StructuredLog for ProcessExecutionStarted<'_> {
    fn log(&self) {
        tracing::info!(
            process_id = self.process_id,
            execution_id = self.execution_id,
            start_count = self.start_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "process",
            span_name = name,
            process_id = self.process_id,
            execution_id = self.execution_id,
        )
    }
}

/// A process scope reached a terminal state.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use activity_engine::observability::messages::process::ProcessExecutionCompleted;
///
/// let msg = ProcessExecutionCompleted {
///     process_id: "order",
///     execution_id: "order_0c1d",
///     completion: "completed",
/// };
///
/// assert_eq!(msg.to_string(), "<order_0c1d (order)> completed");
/// ```
pub struct ProcessExecutionCompleted<'a> {
    pub process_id: &'a str,
    pub execution_id: &'a str,
    pub completion: &'a str,
}

impl Display for ProcessExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> {}",
            self.execution_id, self.process_id, self.completion
        )
    }
}

impl StructuredLog for ProcessExecutionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            process_id = self.process_id,
            execution_id = self.execution_id,
            completion = self.completion,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "process_completed",
            span_name = name,
            process_id = self.process_id,
            execution_id = self.execution_id,
        )
    }
}

/// A child activity published an error event the scope does not handle.
///
/// # Log Level
/// `error!` - Fails the process scope
pub struct ProcessActivityError<'a> {
    pub process_id: &'a str,
    pub activity_id: &'a str,
    pub error: &'a str,
}

impl Display for ProcessActivityError<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{}> activity <{}> failed: {}",
            self.process_id, self.activity_id, self.error
        )
    }
}

impl StructuredLog for ProcessActivityError<'_> {
    fn log(&self) {
        tracing::error!(
            process_id = self.process_id,
            activity_id = self.activity_id,
            error = self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "process_activity_error",
            span_name = name,
            process_id = self.process_id,
            activity_id = self.activity_id,
        )
    }
}

/// A nested process execution finished and its result was relayed upward.
///
/// # Log Level
/// `debug!` - Sub-process bookkeeping
pub struct SubProcessRelayed<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub completion: &'a str,
}

impl Display for SubProcessRelayed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> sub process execution {}",
            self.execution_id, self.activity_id, self.completion
        )
    }
}

impl StructuredLog for SubProcessRelayed<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            completion = self.completion,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "sub_process",
            span_name = name,
            activity_id = self.activity_id,
            execution_id = self.execution_id,
        )
    }
}

/// Multi-instance loop started an iteration.
///
/// # Log Level
/// `debug!` - Per iteration
pub struct LoopIterationStarted<'a> {
    pub activity_id: &'a str,
    pub execution_id: &'a str,
    pub index: usize,
    pub cardinality: usize,
}

impl Display for LoopIterationStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "<{} ({})> iteration {} of {}",
            self.execution_id,
            self.activity_id,
            self.index + 1,
            self.cardinality
        )
    }
}

impl StructuredLog for LoopIterationStarted<'_> {
    fn log(&self) {
        tracing::debug!(
            activity_id = self.activity_id,
            execution_id = self.execution_id,
            index = self.index,
            cardinality = self.cardinality,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "loop_iteration",
            span_name = name,
            activity_id = self.activity_id,
            index = self.index,
        )
    }
}
