// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message envelope carried by the fabric.
//!
//! A [`Message`] has three parts, mirroring an AMQP delivery:
//! * `fields` - routing information filled in by the broker (routing key, exchange,
//!   consumer tag, delivery tag, redelivered flag)
//! * `content` - a JSON object owned by the publisher
//! * `properties` - publisher options (persistence, mandatory routing, type, correlation)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object payload of a message.
///
/// Lifecycle handlers clone and extend content constantly, so the helpers here
/// favour builder-style `with` and in-place `merge`.
///
/// # Examples
///
/// ```
/// use activity_engine::broker::Content;
///
/// let content = Content::new()
///     .with("id", "task_1")
///     .with("executionId", "task_1_abc");
///
/// assert_eq!(content.execution_id(), Some("task_1_abc"));
/// assert!(!content.is_root_scope());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(pub Map<String, Value>);

impl Content {
    /// Create an empty content object
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Truthiness of a key; missing and `null` are false.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Builder form of [`Content::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Overwrite keys with the ones from `other`.
    pub fn merge(&mut self, other: &Content) {
        for (key, value) in other.0.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Clone of self with `other` merged on top.
    pub fn merged(&self, other: &Content) -> Content {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.get_str("executionId")
    }

    pub fn is_root_scope(&self) -> bool {
        self.get_bool("isRootScope")
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Content {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for Content {
    /// Non-object values are wrapped under a `value` key.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::new(),
            other => Self::new().with("value", other),
        }
    }
}

impl From<Content> for Value {
    fn from(content: Content) -> Self {
        content.into_value()
    }
}

/// Routing information assigned by the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageFields {
    pub routing_key: String,
    pub exchange: String,
    #[serde(default)]
    pub redelivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_tag: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Publisher supplied options.
///
/// Defaults to a persistent, non-mandatory message without type or correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub persistent: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self {
            persistent: true,
            mandatory: false,
            message_type: None,
            correlation_id: None,
            message_id: None,
        }
    }
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message is dropped from snapshots and never redelivered.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Publishing fails when no queue is bound to receive the message.
    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// A message as published, queued and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub fields: MessageFields,
    pub content: Content,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(
        exchange: &str,
        routing_key: &str,
        content: Content,
        properties: MessageProperties,
    ) -> Self {
        Self {
            fields: MessageFields {
                routing_key: routing_key.to_string(),
                exchange: exchange.to_string(),
                ..MessageFields::default()
            },
            content,
            properties,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.fields.routing_key
    }

    pub fn is_redelivered(&self) -> bool {
        self.fields.redelivered
    }

    pub fn message_type(&self) -> Option<&str> {
        self.properties.message_type.as_deref()
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.properties.correlation_id.clone()
    }

    /// Copy with content replaced, delivery bookkeeping kept.
    pub fn with_content(&self, content: Content) -> Self {
        Self {
            fields: self.fields.clone(),
            content,
            properties: self.properties.clone(),
        }
    }
}
