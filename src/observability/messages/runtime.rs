// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the async process runner.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Runner task spawned for a process.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunnerStarted<'a> {
    pub process_id: &'a str,
}

impl Display for RunnerStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Process runner started for '{}'", self.process_id)
    }
}

impl StructuredLog for RunnerStarted<'_> {
    fn log(&self) {
        tracing::info!(process_id = self.process_id, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("runner", span_name = name, process_id = self.process_id)
    }
}

/// Runner received a command.
///
/// # Log Level
/// `debug!` - Per command
pub struct RunnerCommandReceived<'a> {
    pub process_id: &'a str,
    pub command: &'a str,
}

impl Display for RunnerCommandReceived<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Process '{}' received {} command", self.process_id, self.command)
    }
}

impl StructuredLog for RunnerCommandReceived<'_> {
    fn log(&self) {
        tracing::debug!(
            process_id = self.process_id,
            command = self.command,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "runner_command",
            span_name = name,
            process_id = self.process_id,
            command = self.command,
        )
    }
}

/// Runner finished, by completion or cancellation.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunnerFinished<'a> {
    pub process_id: &'a str,
    pub completion: &'a str,
    pub cancelled: bool,
}

impl Display for RunnerFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.cancelled {
            write!(f, "Process runner for '{}' cancelled", self.process_id)
        } else {
            write!(
                f,
                "Process runner for '{}' finished: {}",
                self.process_id, self.completion
            )
        }
    }
}

impl StructuredLog for RunnerFinished<'_> {
    fn log(&self) {
        tracing::info!(
            process_id = self.process_id,
            completion = self.completion,
            cancelled = self.cancelled,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "runner_finished",
            span_name = name,
            process_id = self.process_id,
        )
    }
}
