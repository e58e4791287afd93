// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Activity lifecycle engine.
//!
//! * [`Activity`] runs one node of a process graph through its lifecycle.
//! * [`ActivityExecution`] tracks the steps of one activity run.
//! * [`JoinSynchronizer`] collects inbound signals of a parallel join.
//! * [`ProcessExecution`] hosts the activities of a scope and routes their events.

pub mod activity;
pub mod api;
pub mod context;
pub mod execution;
pub mod join;
pub mod process_execution;
#[cfg(test)]
mod integration_tests;

pub use activity::{Activity, ActivityCounters, ActivityState};
pub use api::{publish_api, ActivityApi, ApiCommand};
pub use context::{
    ActivityFlags, ActivityInfo, ActivityScope, ActivityStatus, EventSink, ProcessContext,
    ProcessEvent,
};
pub use execution::{ActivityExecution, ExecutionState};
pub use join::{JoinOutcome, JoinSynchronizer};
pub use process_execution::{ProcessExecution, ProcessExecutionState, ProcessStatus, ShakeResult};
