// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human readable line and
//! [`StructuredLog`] to emit it at its fixed level with structured fields.
//!
//! # Organization
//!
//! * `activity` - lifecycle transitions, joins, outbound evaluation
//! * `execution` - execution controller and behaviour outcomes
//! * `process` - process scopes, sub-processes and loops
//! * `broker` - routing failures and consumer cancellation
//! * `config` - configuration loading and validation
//! * `runtime` - async runner lifecycle
//!
//! # Usage Pattern
//!
//! ```rust
//! use activity_engine::observability::messages::StructuredLog;
//! use activity_engine::observability::messages::process::ProcessExecutionStarted;
//!
//! let msg = ProcessExecutionStarted {
//!     process_id: "order_process",
//!     execution_id: "order_process_1f2e",
//!     start_count: 1,
//! };
//!
//! let _span = msg.span("execute").entered();
//! msg.log();
//! ```

use tracing::Span;

pub mod activity;
pub mod broker;
pub mod config;
pub mod execution;
pub mod process;
pub mod runtime;

/// Emit a message at its designated level with structured fields.
pub trait StructuredLog {
    /// Log the message with its fields attached.
    fn log(&self);

    /// Create a span carrying the message fields.
    fn span(&self, name: &str) -> Span;
}
