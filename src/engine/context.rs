// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::BehaviourFactory;
use crate::broker::{Broker, ConsumeOptions, Content, MessageProperties};
use crate::config::consts::{activity_types, API_EXCHANGE, EVENT_EXCHANGE, EXECUTION_EXCHANGE};
use crate::config::{ActivityDefinition, BehaviourParams, Environment};
use crate::errors::{BehaviourError, BrokerError};
use crate::extensions::ExtensionsMapper;
use crate::traits::GraphProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle status of an activity run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Entered,
    Started,
    Executing,
    Executed,
    End,
    Discard,
    Discarded,
    Error,
    Formatting,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entered => "entered",
            Self::Started => "started",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::End => "end",
            Self::Discard => "discard",
            Self::Discarded => "discarded",
            Self::Error => "error",
            Self::Formatting => "formatting",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural flags copied onto every activity message when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFlags {
    pub is_start: bool,
    pub is_end: bool,
    pub is_sub_process: bool,
    pub is_multi_instance: bool,
    pub is_for_compensation: bool,
    pub is_transaction: bool,
    pub is_parallel_join: bool,
    pub attached_to: Option<String>,
}

impl ActivityFlags {
    fn write_to(&self, content: &mut Content) {
        let flags = [
            ("isEnd", self.is_end),
            ("isStart", self.is_start),
            ("isSubProcess", self.is_sub_process),
            ("isMultiInstance", self.is_multi_instance),
            ("isForCompensation", self.is_for_compensation),
            ("isTransaction", self.is_transaction),
            ("isParallelJoin", self.is_parallel_join),
        ];
        for (key, set) in flags {
            if set {
                content.insert(key, true);
            }
        }
        if let Some(host) = &self.attached_to {
            content.insert("attachedTo", host.as_str());
        }
    }
}

/// Static description of an activity, shared by the activity, its execution
/// and its behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInfo {
    pub id: String,
    pub activity_type: String,
    pub name: Option<String>,
    /// `{id, type, executionId, path?}` of the enclosing scope
    pub parent: Content,
    pub behaviour: BehaviourParams,
    pub flags: ActivityFlags,
}

impl ActivityInfo {
    pub fn from_definition(
        definition: &ActivityDefinition,
        graph: &dyn GraphProvider,
        parent: Content,
    ) -> Self {
        let inbound = graph.inbound_flows(&definition.id).len();
        let scope = graph.scope_of(&definition.id).unwrap_or(graph.process_id());
        let is_start = graph
            .start_activities(&crate::traits::StartFilter::by_id(&definition.id), scope)
            .iter()
            .any(|a| a.id == definition.id);

        let flags = ActivityFlags {
            is_start,
            is_end: graph.outbound_flows(&definition.id).is_empty(),
            is_sub_process: definition.activity_type == activity_types::SUB_PROCESS,
            is_multi_instance: definition.is_multi_instance(),
            is_for_compensation: definition.behaviour.is_for_compensation,
            is_transaction: definition.behaviour.is_transaction,
            is_parallel_join: definition.activity_type == activity_types::PARALLEL_GATEWAY
                && inbound > 1,
            attached_to: definition.behaviour.attached_to.clone(),
        };

        Self {
            id: definition.id.clone(),
            activity_type: definition.activity_type.clone(),
            name: definition.name.clone(),
            parent,
            behaviour: definition.behaviour.clone(),
            flags,
        }
    }

    /// Activity outside of any graph, for behaviour and extension tests.
    pub fn detached(id: &str, activity_type: &str) -> Self {
        Self {
            id: id.to_string(),
            activity_type: activity_type.to_string(),
            name: None,
            parent: Content::new(),
            behaviour: BehaviourParams::default(),
            flags: ActivityFlags::default(),
        }
    }

    /// Message content describing this activity on top of `overrides`.
    pub fn create_message(&self, status: Option<ActivityStatus>, overrides: Content) -> Content {
        let mut content = overrides
            .with("id", self.id.as_str())
            .with("type", self.activity_type.as_str());
        if let Some(name) = &self.name {
            content.insert("name", name.as_str());
        }
        if let Some(status) = status {
            content.insert("status", status.as_str());
        }
        if !self.parent.0.is_empty() {
            content.insert("parent", self.parent.clone().into_value());
        }
        self.flags.write_to(&mut content);
        content
    }
}

/// An `activity.*` or `flow.*` event forwarded out of a process execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessEvent {
    pub routing_key: String,
    pub content: Content,
    pub message_type: Option<String>,
}

pub type EventSink = UnboundedSender<ProcessEvent>;

/// Everything an activity needs from the process it belongs to.
///
/// Cloning is cheap; nested scopes clone the context with an isolated
/// environment through [`ProcessContext::with_environment`].
#[derive(Clone)]
pub struct ProcessContext {
    pub graph: Arc<dyn GraphProvider>,
    pub environment: Environment,
    pub behaviours: Arc<BehaviourFactory>,
    pub extensions: Arc<ExtensionsMapper>,
    pub events: Option<EventSink>,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("process_id", &self.graph.process_id())
            .field("environment", &self.environment)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl ProcessContext {
    pub fn new(graph: Arc<dyn GraphProvider>, environment: Environment) -> Self {
        Self {
            graph,
            environment,
            behaviours: Arc::new(BehaviourFactory::with_defaults()),
            extensions: Arc::new(ExtensionsMapper::new()),
            events: None,
        }
    }

    pub fn with_behaviours(mut self, behaviours: BehaviourFactory) -> Self {
        self.behaviours = Arc::new(behaviours);
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionsMapper) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_environment(&self, environment: Environment) -> Self {
        Self {
            environment,
            ..self.clone()
        }
    }

    pub(crate) fn emit(&self, event: ProcessEvent) {
        if let Some(sink) = &self.events {
            // receiver gone means nobody is listening anymore
            let _ = sink.send(event);
        }
    }
}

/// Borrowed view handed to behaviours while they run.
pub struct ActivityScope<'a> {
    pub broker: &'a mut Broker,
    pub activity: &'a ActivityInfo,
    pub context: &'a ProcessContext,
}

impl ActivityScope<'_> {
    pub fn environment(&self) -> &Environment {
        &self.context.environment
    }

    pub fn settings(&self) -> crate::config::Settings {
        self.context.environment.settings()
    }

    pub fn publish_execution(
        &mut self,
        routing_key: &str,
        content: Content,
    ) -> Result<(), BrokerError> {
        self.broker.publish(
            EXECUTION_EXCHANGE,
            routing_key,
            content,
            MessageProperties::new(),
        )
    }

    /// Report a step as completed, optionally with output.
    pub fn complete(&mut self, content: &Content, output: Option<Value>) -> Result<(), BrokerError> {
        let mut content = content.clone();
        if let Some(output) = output {
            content.insert("output", output);
        }
        self.publish_execution("execute.completed", content)
    }

    pub fn discard(&mut self, content: &Content) -> Result<(), BrokerError> {
        self.publish_execution("execute.discard", content.clone())
    }

    pub fn fail(&mut self, content: &Content, error: &BehaviourError) -> Result<(), BrokerError> {
        self.publish_execution(
            "execute.error",
            content.clone().with("error", error.to_value()),
        )
    }

    /// Publish `activity.<state>` on the event exchange.
    pub fn publish_event(&mut self, state: &str, content: Content) -> Result<(), BrokerError> {
        self.broker.publish(
            EVENT_EXCHANGE,
            &format!("activity.{}", state),
            content.with("state", state),
            MessageProperties::new().message_type(state),
        )
    }

    /// Listen for API commands addressed to `execution_id`.
    pub fn subscribe_api(&mut self, execution_id: &str, consumer_tag: &str) -> Result<(), BrokerError> {
        self.broker.subscribe_tmp(
            API_EXCHANGE,
            &format!("activity.*.{}", execution_id),
            ConsumeOptions::new(consumer_tag).no_ack(),
        )
    }

    pub fn cancel(&mut self, consumer_tag: &str) -> bool {
        self.broker.cancel(consumer_tag)
    }
}
