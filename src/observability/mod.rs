// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout the engine. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep field names consistent between log lines and spans
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::activity` - activity lifecycle transitions, joins and outbound evaluation
//! * `messages::execution` - execution controller and behaviour outcomes
//! * `messages::process` - process scopes, sub-processes and loops
//! * `messages::broker` - message fabric routing and consumer events
//! * `messages::config` - configuration loading and validation
//! * `messages::runtime` - async runner lifecycle
//!
//! # Usage
//!
//! ```rust
//! use activity_engine::observability::messages::StructuredLog;
//! use activity_engine::observability::messages::activity::ActivityStateChanged;
//!
//! let msg = ActivityStateChanged {
//!     activity_id: "task_1",
//!     execution_id: "task_1_a1b2c3",
//!     state: "enter",
//!     redelivered: false,
//! };
//!
//! msg.log();
//! tracing::debug!("{}", msg);
//! ```

pub mod messages;
