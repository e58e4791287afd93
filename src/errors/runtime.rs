// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::{ActivityError, ConfigError};
use thiserror::Error;

/// Errors surfaced by the async process runner
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("process runner is no longer accepting commands")]
    ChannelClosed,

    #[error("process runner task failed: {message}")]
    TaskFailed { message: String },

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
