// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Control messages addressed to a running step.
//!
//! An API command is published on the `api` exchange as
//! `activity.<action>.<executionId>`, so only consumers subscribed to that
//! execution id receive it.

use crate::broker::{Broker, Content, MessageProperties};
use crate::config::consts::API_EXCHANGE;
use crate::errors::BrokerError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCommand {
    Stop,
    Discard,
    /// Resume a waiting step with a payload
    Signal(Value),
    /// Fail a waiting step
    Error(Value),
    Shake,
}

impl ApiCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Discard => "discard",
            Self::Signal(_) => "signal",
            Self::Error(_) => "error",
            Self::Shake => "shake",
        }
    }

    fn apply_to(&self, content: &mut Content) {
        match self {
            Self::Signal(message) => content.insert("message", message.clone()),
            Self::Error(error) => content.insert("error", error.clone()),
            _ => {}
        }
    }
}

impl fmt::Display for ApiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Publish `command` for the step described by `target`.
///
/// The routing key uses the target's `executionId`; a target without one
/// routes to `activity.<action>.` and reaches nobody.
pub fn publish_api(
    broker: &mut Broker,
    command: &ApiCommand,
    target: &Content,
) -> Result<(), BrokerError> {
    let mut content = target.clone();
    command.apply_to(&mut content);
    broker.publish(
        API_EXCHANGE,
        &format!(
            "activity.{}.{}",
            command.action(),
            target.execution_id().unwrap_or_default()
        ),
        content,
        MessageProperties::new()
            .transient()
            .message_type(command.action()),
    )
}

/// Snapshot of a postponed step: enough to address an API command to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityApi {
    pub routing_key: String,
    pub content: Content,
}

impl ActivityApi {
    pub fn new(routing_key: impl Into<String>, content: Content) -> Self {
        Self {
            routing_key: routing_key.into(),
            content,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.content.id()
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.content.execution_id()
    }

    pub fn activity_type(&self) -> Option<&str> {
        self.content.get_str("type")
    }
}
