// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Async hosting of process executions.

mod runner;

pub use crate::config::RuntimeBuilder;
pub use runner::{ProcessOutcome, ProcessRunner};
