// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Async runner for a top-level process.
//!
//! The process itself is synchronous: every call into a
//! [`ProcessExecution`] routes messages until the scope is quiet again. The
//! runner moves one execution onto a tokio task and talks to it over
//! channels:
//!
//! ```text
//!   ProcessRunner ──commands (mpsc)──▶ task ──▶ ProcessExecution
//!        ▲                              │
//!        └──────── ProcessEvent (mpsc) ◀┘  activity.* / flow.* / execution.*
//! ```
//!
//! The task ends when the process finishes, stops, is cancelled through the
//! runner's [`CancellationToken`], or every command sender is gone.

use crate::broker::Content;
use crate::engine::{
    ActivityApi, ProcessContext, ProcessEvent, ProcessExecution, ProcessExecutionState,
    ProcessStatus,
};
use crate::errors::{ActivityError, RuntimeError};
use crate::observability::messages::runtime::{
    RunnerCommandReceived, RunnerFinished, RunnerStarted,
};
use crate::observability::messages::StructuredLog;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

enum RunnerCommand {
    Signal {
        activity_id: String,
        message: Value,
        reply: oneshot::Sender<Result<bool, ActivityError>>,
    },
    Discard,
    Stop,
    GetState(oneshot::Sender<ProcessExecutionState>),
    GetPostponed(oneshot::Sender<Vec<ActivityApi>>),
}

impl RunnerCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Signal { .. } => "signal",
            Self::Discard => "discard",
            Self::Stop => "stop",
            Self::GetState(_) => "get_state",
            Self::GetPostponed(_) => "get_postponed",
        }
    }
}

/// Final word from a runner task.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    /// The runner was cancelled before the process finished
    pub cancelled: bool,
    pub state: ProcessExecutionState,
}

impl ProcessOutcome {
    /// Activity outputs recorded in the process environment.
    pub fn output(&self) -> &Map<String, Value> {
        &self.state.environment.output
    }
}

/// Handle to a process running on its own tokio task.
///
/// # Examples
///
/// ```
/// use activity_engine::config::{Environment, GraphBuilder};
/// use activity_engine::engine::{ProcessContext, ProcessStatus};
/// use activity_engine::runtime::ProcessRunner;
/// use activity_engine::broker::Content;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let graph = GraphBuilder::new("hello")
///     .activity("start", "start_event")
///     .activity("end", "end_event")
///     .flow("f1", "start", "end")
///     .build();
/// let context = ProcessContext::new(Arc::new(graph), Environment::default());
///
/// let (runner, _events) = ProcessRunner::spawn(context, "hello_1", Content::new());
/// let outcome = runner.wait().await.unwrap();
/// assert_eq!(outcome.status, ProcessStatus::Completed);
/// # }
/// ```
pub struct ProcessRunner {
    process_id: String,
    execution_id: String,
    commands: mpsc::UnboundedSender<RunnerCommand>,
    cancellation: CancellationToken,
    task: JoinHandle<Result<ProcessOutcome, RuntimeError>>,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("process_id", &self.process_id)
            .field("execution_id", &self.execution_id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl ProcessRunner {
    /// Start a fresh execution of `context.graph` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        context: ProcessContext,
        execution_id: &str,
        input: Content,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        Self::start(context, execution_id, move |execution| execution.execute(input))
    }

    /// Continue a snapshotted execution on a new task.
    pub fn resume(
        context: ProcessContext,
        state: ProcessExecutionState,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let execution_id = state.execution_id.clone();
        Self::start(context, &execution_id, move |execution| {
            execution.recover(&state)?;
            execution.resume()
        })
    }

    fn start<F>(
        context: ProcessContext,
        execution_id: &str,
        begin: F,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>)
    where
        F: FnOnce(&mut ProcessExecution) -> Result<(), ActivityError> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();

        let process_id = context.graph.process_id().to_string();
        let span = RunnerStarted {
            process_id: &process_id,
        }
        .span("run_process");
        let execution = ProcessExecution::new(context.with_event_sink(event_tx), execution_id);
        let task = tokio::spawn(
            run_process(execution, begin, command_rx, cancellation.clone()).instrument(span),
        );

        let runner = Self {
            process_id,
            execution_id: execution_id.to_string(),
            commands: command_tx,
            cancellation,
            task,
        };
        (runner, event_rx)
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token that stops the process when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Signal the latest waiting step of `activity_id`.
    ///
    /// Returns `Ok(false)` when no such step is waiting.
    pub async fn signal(&self, activity_id: &str, message: Value) -> Result<bool, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.send(RunnerCommand::Signal {
            activity_id: activity_id.to_string(),
            message,
            reply,
        })?;
        Ok(response.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub fn discard(&self) -> Result<(), RuntimeError> {
        self.send(RunnerCommand::Discard)
    }

    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.send(RunnerCommand::Stop)
    }

    pub async fn get_state(&self) -> Result<ProcessExecutionState, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.send(RunnerCommand::GetState(reply))?;
        response.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn get_postponed(&self) -> Result<Vec<ActivityApi>, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.send(RunnerCommand::GetPostponed(reply))?;
        response.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Wait for the task to end.
    pub async fn wait(self) -> Result<ProcessOutcome, RuntimeError> {
        self.task.await.map_err(|e| RuntimeError::TaskFailed {
            message: e.to_string(),
        })?
    }

    fn send(&self, command: RunnerCommand) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn run_process<F>(
    mut execution: ProcessExecution,
    begin: F,
    mut commands: mpsc::UnboundedReceiver<RunnerCommand>,
    cancellation: CancellationToken,
) -> Result<ProcessOutcome, RuntimeError>
where
    F: FnOnce(&mut ProcessExecution) -> Result<(), ActivityError>,
{
    let process_id = execution.id().to_string();
    RunnerStarted {
        process_id: &process_id,
    }
    .log();

    begin(&mut execution)?;

    let mut cancelled = false;
    while is_active(execution.status()) {
        tokio::select! {
            _ = cancellation.cancelled() => {
                cancelled = true;
                execution.stop()?;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    execution.stop()?;
                    break;
                };
                RunnerCommandReceived {
                    process_id: &process_id,
                    command: command.name(),
                }
                .log();
                handle_command(&mut execution, command)?;
            }
        }
    }

    let status = execution.status();
    RunnerFinished {
        process_id: &process_id,
        completion: status.as_str(),
        cancelled,
    }
    .log();

    Ok(ProcessOutcome {
        status,
        cancelled,
        state: execution.get_state(),
    })
}

fn is_active(status: ProcessStatus) -> bool {
    matches!(status, ProcessStatus::Idle | ProcessStatus::Executing)
}

fn handle_command(
    execution: &mut ProcessExecution,
    command: RunnerCommand,
) -> Result<(), ActivityError> {
    match command {
        RunnerCommand::Signal {
            activity_id,
            message,
            reply,
        } => {
            // caller gave up waiting for the answer
            let _ = reply.send(execution.signal(&activity_id, message));
        }
        RunnerCommand::Discard => execution.discard()?,
        RunnerCommand::Stop => execution.stop()?,
        RunnerCommand::GetState(reply) => {
            let _ = reply.send(execution.get_state());
        }
        RunnerCommand::GetPostponed(reply) => {
            let _ = reply.send(execution.get_postponed());
        }
    }
    Ok(())
}
