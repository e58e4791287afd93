// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Broker, Content, MessageProperties};
use crate::config::consts::EVENT_EXCHANGE;
use crate::config::FlowDefinition;
use crate::errors::BrokerError;
use crate::flows::Condition;
use crate::utils::unique_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SEQUENCE_FLOW_TYPE: &str = "sequence_flow";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub take: u64,
    pub discard: u64,
    pub looped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlowState {
    pub id: String,
    pub counters: FlowCounters,
}

/// Runtime side of an outbound edge.
///
/// Take and discard are announced as `flow.take` / `flow.discard` events on the
/// owning activity's event exchange; the process execution routes them to the
/// target's inbound queue.
#[derive(Debug, Clone)]
pub struct SequenceFlow {
    id: String,
    source_id: String,
    target_id: String,
    is_default: bool,
    condition: Option<Condition>,
    parent: Option<Value>,
    counters: FlowCounters,
}

impl SequenceFlow {
    pub fn new(definition: &FlowDefinition, parent: Option<Value>) -> Self {
        Self {
            id: definition.id.clone(),
            source_id: definition.source.clone(),
            target_id: definition.target.clone(),
            is_default: definition.is_default,
            condition: definition.condition.clone(),
            parent,
            counters: FlowCounters::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn counters(&self) -> FlowCounters {
        self.counters
    }

    /// Flow description with `overrides` as the base.
    pub fn create_message(&self, overrides: Content) -> Content {
        let mut content = overrides
            .with("id", self.id.as_str())
            .with("type", SEQUENCE_FLOW_TYPE)
            .with("sourceId", self.source_id.as_str())
            .with("targetId", self.target_id.as_str())
            .with("isSequenceFlow", true);
        if self.is_default {
            content.insert("isDefault", true);
        }
        if let Some(parent) = &self.parent {
            content.insert("parent", parent.clone());
        }
        content
    }

    pub fn take(&mut self, broker: &mut Broker, content: Content) -> Result<(), BrokerError> {
        self.counters.take += 1;
        self.publish_event(broker, "take", content)
    }

    /// Discard towards the target, or report `flow.looped` when the target was
    /// already discarded earlier in the same discard sequence.
    pub fn discard(&mut self, broker: &mut Broker, mut content: Content) -> Result<(), BrokerError> {
        if !content.contains_key("sequenceId") {
            content.insert("sequenceId", unique_id(&self.id));
        }
        let mut discard_sequence = discard_sequence_of(&content);

        if discard_sequence.iter().any(|id| id == &self.target_id) {
            self.counters.looped += 1;
            tracing::debug!(
                flow_id = %self.id,
                source_id = %self.source_id,
                target_id = %self.target_id,
                "<{}> discard loop detected <{}> -> <{}>. Stop.",
                self.id,
                self.source_id,
                self.target_id
            );
            content.insert("discardSequence", discard_sequence);
            return self.publish_event(broker, "looped", content);
        }

        discard_sequence.push(self.source_id.clone());
        content.insert("discardSequence", discard_sequence);
        self.counters.discard += 1;
        self.publish_event(broker, "discard", content)
    }

    /// Path discovery; the walk stops at a flow that was already visited.
    pub fn shake(&self, broker: &mut Broker, source: &Content) -> Result<(), BrokerError> {
        let mut content = source.clone();
        let mut sequence = match content.get("sequence") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let looped = source.id() == Some(self.target_id.as_str())
            || sequence
                .iter()
                .any(|s| s.get("id").and_then(Value::as_str) == Some(self.id.as_str()));

        sequence.push(serde_json::json!({
            "id": self.id,
            "type": SEQUENCE_FLOW_TYPE,
            "isSequenceFlow": true,
            "targetId": self.target_id,
        }));
        content.insert("sequence", sequence);
        content.insert("sourceId", self.source_id.as_str());
        content.insert("targetId", self.target_id.as_str());

        let key = if looped { "flow.shake.loop" } else { "flow.shake" };
        broker.publish(
            EVENT_EXCHANGE,
            key,
            content,
            MessageProperties::new().transient().message_type("shake"),
        )
    }

    pub fn get_state(&self) -> SequenceFlowState {
        SequenceFlowState {
            id: self.id.clone(),
            counters: self.counters,
        }
    }

    pub fn recover(&mut self, state: &SequenceFlowState) {
        self.counters = state.counters;
    }

    fn publish_event(
        &self,
        broker: &mut Broker,
        action: &str,
        content: Content,
    ) -> Result<(), BrokerError> {
        let content = self.create_message(content.with("action", action));
        broker.publish(
            EVENT_EXCHANGE,
            &format!("flow.{}", action),
            content,
            MessageProperties::new().message_type(action),
        )
    }
}

/// `discardSequence` of a content as owned strings; missing means empty.
pub fn discard_sequence_of(content: &Content) -> Vec<String> {
    match content.get("discardSequence") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
