// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for the activity lifecycle and its pluggable behaviours.

use crate::errors::{BrokerError, FlowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to callers of the activity, execution and process APIs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActivityError {
    #[error("activity <{activity_id}> is already running")]
    AlreadyRunning { activity_id: String },

    #[error("cannot recover running activity <{activity_id}>")]
    CannotRecoverRunning { activity_id: String },

    #[error("cannot resume running activity <{activity_id}>")]
    CannotResumeRunning { activity_id: String },

    #[error("activity <{activity_id}> execution requires execution id")]
    MissingExecutionId { activity_id: String },

    #[error("activity <{activity_id}> has no behaviour registered for type '{activity_type}'")]
    UnknownBehaviour {
        activity_id: String,
        activity_type: String,
    },

    #[error("activity <{activity_id}> not found")]
    ActivityNotFound { activity_id: String },

    /// An extension formatter rejected a lifecycle message
    #[error("activity <{activity_id}> failed to format '{routing_key}': {reason}")]
    FormatFailed {
        activity_id: String,
        routing_key: String,
        reason: String,
    },

    /// State snapshot could not be restored
    #[error("activity <{activity_id}> state is invalid: {reason}")]
    InvalidState { activity_id: String, reason: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Failure raised by a behaviour while executing a step.
///
/// The execution controller captures these and republishes them as
/// `execute.error`, so they never escape past the controller as `Err`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct BehaviourError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl BehaviourError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// `{message, code?}` as carried in the `error` key of message content.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }

    /// Rebuild an error from message content; plain strings become the message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new(message.as_str()),
            other => serde_json::from_value(other.clone())
                .unwrap_or_else(|_| Self::new(other.to_string())),
        }
    }
}

impl From<ActivityError> for BehaviourError {
    fn from(error: ActivityError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<BrokerError> for BehaviourError {
    fn from(error: BrokerError) -> Self {
        Self::new(error.to_string())
    }
}
