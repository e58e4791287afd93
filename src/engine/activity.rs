// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Activity lifecycle machine.
//!
//! An activity owns a [`Broker`] and runs its lifecycle as messages on it:
//!
//! ```text
//! inbound-q ──▶ run.enter ─▶ run.start ─▶ run.execute ─▶ run.end ─▶ run.leave ─▶ run.next
//!                   │                          │                       ▲
//!                   ▼                          ▼                       │
//!              run.discard ──▶ run.discarded ──┴──────▶ outbound ──────┘
//! ```
//!
//! Every public method publishes what it needs and then pumps the broker
//! until no consumer can receive anything more. Handlers never pump, they
//! only publish, so the delivery order is the broker's priority order.

use crate::broker::{Broker, BrokerState, ConsumeOptions, Content, Message, MessageProperties, QueueOptions};
use crate::config::consts::{
    ACTIVITY_API_PRIORITY, ACTIVITY_API_TAG, ACTIVITY_EXECUTION_TAG, ACTIVITY_RUN_TAG, API_EXCHANGE,
    EVENT_EXCHANGE, EXECUTE_QUEUE, EXECUTION_EXCHANGE, EXECUTION_QUEUE, FORMAT_EXCHANGE,
    FORMAT_RUN_QUEUE, INBOUND_QUEUE, JOIN_PREFETCH, RUN_EXCHANGE, RUN_ON_INBOUND_TAG, RUN_QUEUE,
};
use crate::config::{ActivityDefinition, BehaviourParams};
use crate::engine::api::{publish_api, ActivityApi, ApiCommand};
use crate::engine::execution::{ActivityExecution, ExecutionState};
use crate::engine::join::{JoinOutcome, JoinSynchronizer};
use crate::engine::process_execution::ProcessExecution;
use crate::engine::{ActivityInfo, ActivityScope, ActivityStatus, ProcessContext};
use crate::errors::{ActivityError, BehaviourError};
use crate::extensions::ActivityExtensions;
use crate::flows::{FlowAction, FlowDecision, OutboundEvaluator, SequenceFlow, SequenceFlowState};
use crate::observability::messages::activity::{
    ActivityResumed, ActivityStateChanged, ActivityStopped, JoinInboundPending,
    OutboundEvaluationFailed,
};
use crate::observability::messages::StructuredLog;
use crate::utils::unique_id;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub taken: u64,
    pub discarded: u64,
}

/// Serializable snapshot of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityState {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub counters: ActivityCounters,
    #[serde(default)]
    pub behaviour: BehaviourParams,
    #[serde(default)]
    pub flows: Vec<SequenceFlowState>,
    pub broker: BrokerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionState>,
}

pub struct Activity {
    info: ActivityInfo,
    context: ProcessContext,
    broker: Broker,
    status: Option<ActivityStatus>,
    stopped: bool,
    consuming: bool,
    execution_id: Option<String>,
    init_execution_id: Option<String>,
    counters: ActivityCounters,
    execution: Option<ActivityExecution>,
    state_message: Option<Message>,
    execute_message: Option<Message>,
    outbound: Vec<SequenceFlow>,
    evaluator: OutboundEvaluator,
    join: Option<JoinSynchronizer>,
    extensions: ActivityExtensions,
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.info.id)
            .field("type", &self.info.activity_type)
            .field("status", &self.status)
            .field("execution_id", &self.execution_id)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Activity {
    pub fn new(definition: &ActivityDefinition, parent: Content, context: ProcessContext) -> Self {
        let info = ActivityInfo::from_definition(definition, context.graph.as_ref(), parent.clone());
        let parent_value = (!parent.0.is_empty()).then(|| parent.into_value());
        let outbound: Vec<SequenceFlow> = context
            .graph
            .outbound_flows(&definition.id)
            .into_iter()
            .map(|flow| SequenceFlow::new(flow, parent_value.clone()))
            .collect();
        let evaluator = OutboundEvaluator::new(&definition.id, &outbound);
        let join = info
            .flags
            .is_parallel_join
            .then(|| JoinSynchronizer::new(context.graph.inbound_flows(&definition.id).len()));
        let extensions = context.extensions.get(&info);

        Self {
            broker: activity_broker(&definition.id),
            info,
            context,
            status: None,
            stopped: false,
            consuming: false,
            execution_id: None,
            init_execution_id: None,
            counters: ActivityCounters::default(),
            execution: None,
            state_message: None,
            execute_message: None,
            outbound,
            evaluator,
            join,
            extensions,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    pub fn status(&self) -> Option<ActivityStatus> {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.consuming && self.status.is_some()
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn counters(&self) -> ActivityCounters {
        self.counters
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn execution(&self) -> Option<&ActivityExecution> {
        self.execution.as_ref()
    }

    pub fn outbound(&self) -> &[SequenceFlow] {
        &self.outbound
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut Broker {
        &mut self.broker
    }

    /// Start listening for inbound signals.
    pub fn activate(&mut self) -> Result<(), ActivityError> {
        if self.info.flags.is_for_compensation {
            return Ok(());
        }
        self.consume_inbound()?;
        self.pump()
    }

    pub fn deactivate(&mut self) {
        self.broker.cancel(RUN_ON_INBOUND_TAG);
    }

    /// Announce the execution id the next run will use.
    pub fn init(&mut self, content: Content) -> Result<(), ActivityError> {
        let execution_id = self
            .init_execution_id
            .get_or_insert_with(|| unique_id(&self.info.id))
            .clone();
        let content = self.create_message(content.with("executionId", execution_id));
        self.publish_event("init", content, None)?;
        self.pump()
    }

    pub fn run(&mut self, content: Content) -> Result<(), ActivityError> {
        self.start_run(content)?;
        self.pump()
    }

    pub fn recover(&mut self, state: &ActivityState) -> Result<(), ActivityError> {
        if self.is_running() {
            return Err(ActivityError::CannotRecoverRunning {
                activity_id: self.info.id.clone(),
            });
        }

        self.stopped = state.stopped;
        self.status = state.status;
        self.execution_id = state.execution_id.clone();
        self.counters = state.counters;
        for flow_state in state.flows.iter() {
            if let Some(flow) = self.outbound.iter_mut().find(|f| f.id() == flow_state.id) {
                flow.recover(flow_state);
            }
        }

        if let Some(execution_state) = &state.execution {
            let mut execution = ActivityExecution::new(&self.info.id, self.batch_size());
            let mut scope = ActivityScope {
                broker: &mut self.broker,
                activity: &self.info,
                context: &self.context,
            };
            execution.recover(&mut scope, execution_state)?;
            self.execution = Some(execution);
        }

        self.broker.recover(&state.broker);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ActivityError> {
        if self.consuming {
            return Err(ActivityError::CannotResumeRunning {
                activity_id: self.info.id.clone(),
            });
        }
        if self.status.is_none() {
            return self.activate();
        }

        self.stopped = false;
        self.consume_api()?;
        let content = self.create_message(Content::new());
        self.broker.publish(
            RUN_EXCHANGE,
            "run.resume",
            content,
            MessageProperties::new().transient(),
        )?;
        self.consume_run_q()?;
        self.pump()
    }

    pub fn discard(&mut self, content: Content) -> Result<(), ActivityError> {
        if self.status.is_none() {
            self.run_discard(content)?;
            return self.pump();
        }

        if let Some(execution) = self.execution.as_mut().filter(|e| !e.completed()) {
            let mut scope = ActivityScope {
                broker: &mut self.broker,
                activity: &self.info,
                context: &self.context,
            };
            execution.discard(&mut scope)?;
            return self.pump();
        }

        self.deactivate_run_consumers();
        self.broker.purge(RUN_QUEUE);
        let content = self.state_content();
        self.broker
            .publish(RUN_EXCHANGE, "run.discard", content, MessageProperties::new())?;
        self.consume_run_q()?;
        self.pump()
    }

    pub fn stop(&mut self) -> Result<(), ActivityError> {
        if !self.consuming {
            return Ok(());
        }
        let target = self.api_target();
        publish_api(&mut self.broker, &ApiCommand::Stop, &target)?;
        self.pump()
    }

    /// Step mode: acknowledge the current state message and let the next one through.
    pub fn next(&mut self) -> Result<Option<Message>, ActivityError> {
        if !self.context.environment.settings().step {
            return Ok(None);
        }
        let Some(current) = self.state_message.clone() else {
            return Ok(None);
        };
        if matches!(
            self.status,
            Some(ActivityStatus::Executing | ActivityStatus::Formatting)
        ) {
            return Ok(None);
        }
        self.broker.ack(&current);
        self.pump()?;
        Ok(Some(current))
    }

    /// Walk the outbound paths without running anything.
    pub fn shake(&mut self) -> Result<(), ActivityError> {
        let content = self.create_message(Content::new());
        self.shake_outbound(&content)?;
        self.pump()
    }

    pub fn get_state(&self) -> ActivityState {
        ActivityState {
            id: self.info.id.clone(),
            activity_type: self.info.activity_type.clone(),
            status: self.status,
            execution_id: self.execution_id.clone(),
            stopped: self.stopped,
            counters: self.counters,
            behaviour: self.info.behaviour.clone(),
            flows: self.outbound.iter().map(SequenceFlow::get_state).collect(),
            broker: self.broker.get_state(),
            execution: self.execution.as_ref().map(ActivityExecution::get_state),
        }
    }

    /// Address of the current run.
    pub fn get_api(&self) -> ActivityApi {
        let routing_key = self
            .state_message
            .as_ref()
            .map(|m| m.routing_key().to_string())
            .unwrap_or_default();
        ActivityApi::new(routing_key, self.api_target())
    }

    /// Steps of this activity that wait for something.
    pub fn get_postponed(&self) -> Vec<ActivityApi> {
        if self.status.is_none() {
            return Vec::new();
        }
        match self.execution.as_ref().filter(|e| !e.completed()) {
            Some(execution) => execution.get_postponed(),
            None => vec![self.get_api()],
        }
    }

    /// Publish an API command for a step of this activity.
    pub fn send_api(&mut self, command: &ApiCommand, target: &Content) -> Result<(), ActivityError> {
        publish_api(&mut self.broker, command, target)?;
        self.pump()
    }

    /// Offer an API command to the nested executions of this activity.
    pub fn delegate_api(&mut self, command: &ApiCommand, target: &Content) -> Result<bool, ActivityError> {
        let Some(execution) = self.execution.as_mut() else {
            return Ok(false);
        };
        let mut scope = ActivityScope {
            broker: &mut self.broker,
            activity: &self.info,
            context: &self.context,
        };
        let delivered = execution.delegate_api(&mut scope, command, target)?;
        self.pump()?;
        Ok(delivered)
    }

    /// Event from an inbound trigger: a sequence flow, or the host of a boundary activity.
    pub fn on_inbound_event(&mut self, message: &Message) -> Result<(), ActivityError> {
        match message.routing_key() {
            "activity.enter" | "activity.discard" => {
                if message.content.id().is_some()
                    && message.content.id() == self.info.flags.attached_to.as_deref()
                {
                    self.queue_inbound(message)?;
                }
            }
            "flow.shake" => self.shake_outbound(&message.content)?,
            "flow.take" | "flow.discard" => self.queue_inbound(message)?,
            _ => {}
        }
        self.pump()
    }

    /// Deliver until no consumer can receive anything more.
    pub fn pump(&mut self) -> Result<(), ActivityError> {
        while let Some(message) = self.broker.next_delivery() {
            self.dispatch(message)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<(), ActivityError> {
        match message.fields.consumer_tag.as_deref() {
            Some(RUN_ON_INBOUND_TAG) if self.join.is_some() => self.on_join_inbound(message),
            Some(RUN_ON_INBOUND_TAG) => self.on_inbound(message),
            Some(ACTIVITY_RUN_TAG) => self.on_run_message(message),
            Some(ACTIVITY_API_TAG) => self.on_api_message(&message),
            Some(ACTIVITY_EXECUTION_TAG) => self.on_execution_message(message),
            _ => {
                let Some(execution) = self.execution.as_mut() else {
                    self.broker.ack(&message);
                    return Ok(());
                };
                let mut scope = ActivityScope {
                    broker: &mut self.broker,
                    activity: &self.info,
                    context: &self.context,
                };
                execution.handle_delivery(&mut scope, &message)
            }
        }
    }

    fn batch_size(&self) -> usize {
        self.context.environment.settings().batch_size
    }

    fn create_message(&self, overrides: Content) -> Content {
        self.info.create_message(self.status, overrides)
    }

    fn state_content(&self) -> Content {
        self.state_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| self.create_message(Content::new()))
    }

    fn api_target(&self) -> Content {
        if let Some(init) = self
            .execution
            .as_ref()
            .filter(|e| !e.completed())
            .and_then(ActivityExecution::execute_message)
        {
            return init.content.clone();
        }
        let mut content = self.state_content();
        if let Some(execution_id) = &self.execution_id {
            content.insert("executionId", execution_id.as_str());
        }
        content
    }

    fn queue_inbound(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.broker.queue_message(
            INBOUND_QUEUE,
            message.routing_key(),
            message.content.clone(),
            message.properties.clone(),
        )?;
        Ok(())
    }

    fn start_run(&mut self, content: Content) -> Result<(), ActivityError> {
        if self.is_running() {
            return Err(ActivityError::AlreadyRunning {
                activity_id: self.info.id.clone(),
            });
        }

        let execution_id = self
            .init_execution_id
            .take()
            .unwrap_or_else(|| unique_id(&self.info.id));
        self.execution_id = Some(execution_id.clone());
        self.consume_api()?;

        let content = self.create_message(content.with("executionId", execution_id));
        self.broker
            .publish(RUN_EXCHANGE, "run.enter", content.clone(), MessageProperties::new())?;
        self.broker
            .publish(RUN_EXCHANGE, "run.start", content, MessageProperties::new())?;
        self.consume_run_q()
    }

    fn run_discard(&mut self, content: Content) -> Result<(), ActivityError> {
        let execution_id = self
            .init_execution_id
            .take()
            .unwrap_or_else(|| unique_id(&self.info.id));
        self.execution_id = Some(execution_id.clone());
        self.consume_api()?;

        let content = self.create_message(content.with("executionId", execution_id));
        self.broker
            .publish(RUN_EXCHANGE, "run.discard", content, MessageProperties::new())?;
        self.consume_run_q()
    }

    /// Discard requested over the API while the run is between steps.
    fn discard_run(&mut self) -> Result<(), ActivityError> {
        let Some(status) = self.status else {
            return Ok(());
        };
        if self.execution.as_ref().is_some_and(|e| !e.completed()) {
            return Ok(());
        }
        if matches!(
            status,
            ActivityStatus::Executing | ActivityStatus::Error | ActivityStatus::Discarded
        ) {
            return Ok(());
        }

        self.deactivate_run_consumers();
        let content = self.state_content();
        let message = Message::new(RUN_EXCHANGE, "run.discard", content.clone(), MessageProperties::new());
        self.extensions.deactivate(&message);
        self.broker.purge(RUN_QUEUE);
        self.broker
            .publish(RUN_EXCHANGE, "run.discard", content, MessageProperties::new())?;
        self.consume_run_q()
    }

    fn shake_outbound(&mut self, source: &Content) -> Result<(), ActivityError> {
        let mut content = source.clone();
        let mut sequence = match content.get("sequence") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut step = json!({"id": self.info.id, "type": self.info.activity_type});
        if self.info.flags.is_sub_process {
            let nested = self.shake_nested()?;
            step["isSubProcess"] = Value::Bool(true);
            step["sequence"] = nested;
        }
        sequence.push(step);
        content.insert("sequence", sequence);

        let shake = MessageProperties::new().transient().message_type("shake");
        self.broker
            .publish(API_EXCHANGE, "activity.shake.start", content.clone(), shake.clone())?;

        if self.info.flags.is_end {
            self.broker
                .publish(EVENT_EXCHANGE, "activity.shake.end", content, shake)?;
            return Ok(());
        }

        for flow in self.outbound.iter() {
            flow.shake(&mut self.broker, &content)?;
        }
        Ok(())
    }

    fn shake_nested(&self) -> Result<Value, ActivityError> {
        let context = self
            .context
            .with_environment(self.context.environment.clone_isolated());
        let mut nested = ProcessExecution::nested(
            &self.info,
            &unique_id(&self.info.id),
            context,
        );
        let result = nested.shake(None)?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    fn consume_inbound(&mut self) -> Result<(), ActivityError> {
        if self.status.is_some() {
            return Ok(());
        }
        let options = ConsumeOptions::new(RUN_ON_INBOUND_TAG);
        let options = if self.join.is_some() {
            options.prefetch(JOIN_PREFETCH)
        } else {
            options
        };
        self.broker.assert_consumer(INBOUND_QUEUE, options)?;
        Ok(())
    }

    fn on_inbound(&mut self, message: Message) -> Result<(), ActivityError> {
        self.broker.ack(&message);
        self.broker.cancel(RUN_ON_INBOUND_TAG);

        let content = &message.content;
        let inbound = vec![content.clone().into_value()];
        match message.routing_key() {
            "flow.take" | "activity.enter" => {
                let mut run_content = Content::new().with("inbound", inbound);
                if let Some(payload) = content.get("message") {
                    run_content.insert("message", payload.clone());
                }
                self.start_run(run_content)
            }
            "flow.discard" | "activity.discard" => {
                let mut discard_content = Content::new().with("inbound", inbound);
                if let Some(sequence) = content.get("discardSequence") {
                    discard_content.insert("discardSequence", sequence.clone());
                }
                self.run_discard(discard_content)
            }
            _ => Ok(()),
        }
    }

    fn on_join_inbound(&mut self, message: Message) -> Result<(), ActivityError> {
        let source_id = message.content.id().unwrap_or_default().to_string();
        let action = message.content.get_str("action").unwrap_or_default().to_string();
        let Some(join) = self.join.as_mut() else {
            return Ok(());
        };

        match join.push(message) {
            JoinOutcome::Duplicate => Ok(()),
            JoinOutcome::Pending { remaining } => {
                JoinInboundPending {
                    activity_id: &self.info.id,
                    source_id: &source_id,
                    action: &action,
                    remaining,
                }
                .log();
                Ok(())
            }
            JoinOutcome::Run { inbound, messages } => {
                for buffered in messages.iter() {
                    self.broker.ack(buffered);
                }
                self.broker.cancel(RUN_ON_INBOUND_TAG);
                let inbound: Vec<Value> = inbound.into_iter().map(Content::into_value).collect();
                self.start_run(Content::new().with("inbound", inbound))
            }
            JoinOutcome::Discard {
                inbound,
                discard_sequence,
                messages,
            } => {
                for buffered in messages.iter() {
                    self.broker.ack(buffered);
                }
                self.broker.cancel(RUN_ON_INBOUND_TAG);
                let inbound: Vec<Value> = inbound.into_iter().map(Content::into_value).collect();
                self.run_discard(
                    Content::new()
                        .with("inbound", inbound)
                        .with("discardSequence", discard_sequence),
                )
            }
        }
    }

    fn consume_run_q(&mut self) -> Result<(), ActivityError> {
        if self.consuming {
            return Ok(());
        }
        self.consuming = true;
        self.broker
            .assert_consumer(RUN_QUEUE, ConsumeOptions::new(ACTIVITY_RUN_TAG).exclusive())?;
        Ok(())
    }

    fn consume_api(&mut self) -> Result<(), ActivityError> {
        let Some(execution_id) = self.execution_id.clone() else {
            return Ok(());
        };
        self.broker.cancel(ACTIVITY_API_TAG);
        self.broker.subscribe_tmp(
            API_EXCHANGE,
            &format!("activity.*.{}", execution_id),
            ConsumeOptions::new(ACTIVITY_API_TAG)
                .no_ack()
                .priority(ACTIVITY_API_PRIORITY),
        )?;
        Ok(())
    }

    fn deactivate_run_consumers(&mut self) {
        self.broker.cancel(ACTIVITY_API_TAG);
        self.broker.cancel(ACTIVITY_RUN_TAG);
        self.broker.cancel(ACTIVITY_EXECUTION_TAG);
        self.consuming = false;
    }

    fn on_api_message(&mut self, message: &Message) -> Result<(), ActivityError> {
        match message.message_type() {
            Some("discard") => self.discard_run(),
            Some("stop") => self.on_stop(Some(message)),
            Some("shake") => self.shake_outbound(&message.content),
            _ => Ok(()),
        }
    }

    fn on_stop(&mut self, message: Option<&Message>) -> Result<(), ActivityError> {
        let was_running = self.consuming;
        self.stopped = true;
        self.consuming = false;
        // cancelling the inbound consumer requeues whatever the join buffered
        if let Some(join) = self.join.as_mut() {
            join.clear();
        }
        for tag in [
            ACTIVITY_RUN_TAG,
            ACTIVITY_API_TAG,
            ACTIVITY_EXECUTION_TAG,
            RUN_ON_INBOUND_TAG,
        ] {
            self.broker.cancel(tag);
        }

        ActivityStopped {
            activity_id: &self.info.id,
            execution_id: self.execution_id.as_deref(),
            was_running,
        }
        .log();

        if was_running {
            let content = self.create_message(Content::new());
            let stop_message = match message {
                Some(message) => message.clone(),
                None => Message::new(RUN_EXCHANGE, "run.stop", content.clone(), MessageProperties::new()),
            };
            self.extensions.deactivate(&stop_message);
            self.publish_event("stop", content, None)?;
        }
        Ok(())
    }

    /// Queued formatting from the `format` exchange, then the extension formatters.
    fn format_message(&mut self, message: &Message) -> Result<Message, ActivityError> {
        let mut formatted = message.clone();
        while let Some(format) = self.broker.get(FORMAT_RUN_QUEUE) {
            formatted.content.merge(&format.content);
        }
        match self.extensions.format(&formatted) {
            Ok(Some(content)) => formatted.content = content,
            Ok(None) => {}
            Err(reason) => {
                return Err(ActivityError::FormatFailed {
                    activity_id: self.info.id.clone(),
                    routing_key: message.routing_key().to_string(),
                    reason,
                })
            }
        }
        Ok(formatted)
    }

    fn on_run_message(&mut self, message: Message) -> Result<(), ActivityError> {
        match message.routing_key() {
            "run.outbound.discard" | "run.outbound.take" | "run.next" => {
                return self.continue_run_message(message)
            }
            "run.resume" => return self.on_resume_message(&message),
            _ => {}
        }

        let previous = self.status;
        self.status = Some(ActivityStatus::Formatting);
        let formatted = self.format_message(&message);
        self.status = previous;
        self.continue_run_message(formatted?)
    }

    fn continue_run_message(&mut self, message: Message) -> Result<(), ActivityError> {
        let redelivered = message.is_redelivered();
        let mut content = message.content.clone();
        let correlation_id = message.correlation_id();
        let step = self.context.environment.settings().step;
        let routing_key = message.routing_key().to_string();
        self.state_message = Some(message.clone());

        ActivityStateChanged {
            activity_id: &self.info.id,
            execution_id: content.execution_id().unwrap_or_default(),
            state: routing_key.trim_start_matches("run."),
            redelivered,
        }
        .log();

        let props = || MessageProperties::new().correlation_id(correlation_id.clone());

        match routing_key.as_str() {
            "run.enter" => {
                self.status = Some(ActivityStatus::Entered);
                if !redelivered {
                    self.execution = None;
                }
                self.extensions.activate(&message);
                if !redelivered {
                    self.publish_event("enter", content, Some(props()))?;
                }
            }
            "run.discard" => {
                self.status = Some(ActivityStatus::Discard);
                self.execution = None;
                self.extensions.activate(&message);
                if !redelivered {
                    self.broker
                        .publish(RUN_EXCHANGE, "run.discarded", content.clone(), props())?;
                    self.publish_event("discard", content, None)?;
                }
            }
            "run.start" => {
                self.status = Some(ActivityStatus::Started);
                if !redelivered {
                    self.broker
                        .publish(RUN_EXCHANGE, "run.execute", content.clone(), props())?;
                    self.publish_event("start", content, Some(props()))?;
                }
            }
            "run.execute.passthrough" if !redelivered && self.execution.is_some() => {
                self.execute_message = Some(message.clone());
                let Some(execution) = self.execution.as_mut() else {
                    return Ok(());
                };
                let mut scope = ActivityScope {
                    broker: &mut self.broker,
                    activity: &self.info,
                    context: &self.context,
                };
                return execution.passthrough(&mut scope, &message);
            }
            "run.execute" | "run.execute.passthrough" => {
                return self.on_run_execute(message);
            }
            "run.end" => {
                if self.status == Some(ActivityStatus::End) {
                    if !step {
                        self.broker.ack(&message);
                    }
                    return Ok(());
                }
                self.counters.taken += 1;
                self.status = Some(ActivityStatus::End);
                if self.do_run_leave(&message, false)? {
                    self.publish_event("end", content, Some(props()))?;
                    if !step {
                        self.broker.ack(&message);
                    }
                }
                return Ok(());
            }
            "run.error" => {
                let error = match content.get("error") {
                    Some(error) if redelivered => BehaviourError::from_value(error).to_value(),
                    Some(error) => error.clone(),
                    None => Value::Null,
                };
                self.publish_event("error", content.with("error", error), Some(props()))?;
            }
            "run.discarded" => {
                self.counters.discarded += 1;
                self.status = Some(ActivityStatus::Discarded);
                content.remove("outbound");
                if !redelivered {
                    if self.do_run_leave(&message.with_content(content), true)? && !step {
                        self.broker.ack(&message);
                    }
                    return Ok(());
                }
            }
            "run.outbound.take" | "run.outbound.discard" => {
                self.broker.ack(&message);
                let flow_content = content
                    .get("flow")
                    .cloned()
                    .map(Content::from)
                    .unwrap_or_default();
                let flow_id = flow_content.id().unwrap_or_default().to_string();
                let Some(flow) = self.outbound.iter_mut().find(|f| f.id() == flow_id) else {
                    return Ok(());
                };
                if routing_key == "run.outbound.take" {
                    flow.take(&mut self.broker, flow_content)?;
                } else {
                    flow.discard(&mut self.broker, flow_content)?;
                }
                return Ok(());
            }
            "run.leave" => {
                self.status = None;
                self.extensions.deactivate(&message);
                if !redelivered {
                    self.broker.publish(
                        RUN_EXCHANGE,
                        "run.next",
                        content.clone(),
                        MessageProperties::new().transient(),
                    )?;
                    self.publish_event("leave", content, Some(props()))?;
                }
            }
            "run.next" => self.consume_inbound()?,
            _ => {}
        }

        if !step {
            self.broker.ack(&message);
        }
        Ok(())
    }

    fn on_run_execute(&mut self, message: Message) -> Result<(), ActivityError> {
        self.status = Some(ActivityStatus::Executing);
        self.execute_message = Some(message.clone());
        self.broker.assert_consumer(
            EXECUTION_QUEUE,
            ConsumeOptions::new(ACTIVITY_EXECUTION_TAG).exclusive(),
        )?;
        if self.execution.is_none() {
            self.execution = Some(ActivityExecution::new(&self.info.id, self.batch_size()));
        }

        let message = if message.is_redelivered() {
            self.extensions.activate(&message);
            self.status = Some(ActivityStatus::Formatting);
            let formatted = self.format_message(&message);
            self.status = Some(ActivityStatus::Executing);
            formatted?
        } else {
            message
        };

        let Some(execution) = self.execution.as_mut() else {
            return Ok(());
        };
        let mut scope = ActivityScope {
            broker: &mut self.broker,
            activity: &self.info,
            context: &self.context,
        };
        execution.execute(&mut scope, &message)
    }

    fn on_execution_message(&mut self, message: Message) -> Result<(), ActivityError> {
        let execute_content = self
            .execute_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let mut content = execute_content.merged(&message.content);
        if let Some(execution_id) = execute_content.execution_id() {
            content.insert("executionId", execution_id);
        }
        if !self.info.parent.0.is_empty() {
            content.insert("parent", self.info.parent.clone().into_value());
        }

        let routing_key = message.routing_key().to_string();
        let correlation = || MessageProperties::new().correlation_id(message.correlation_id());
        self.publish_event(&routing_key, content.clone(), Some(message.properties.clone()))?;

        match routing_key.as_str() {
            "execution.outbound.take" => {
                let outbound = self.do_outbound(&message.content, false)?;
                self.broker.ack(&message);
                self.broker.publish(
                    RUN_EXCHANGE,
                    "run.execute.passthrough",
                    content.with("outbound", outbound),
                    MessageProperties::new(),
                )?;
                self.ack_run_execute_message();
                return Ok(());
            }
            "execution.error" => {
                self.status = Some(ActivityStatus::Error);
                self.broker
                    .publish(RUN_EXCHANGE, "run.error", content.clone(), correlation())?;
                self.broker
                    .publish(RUN_EXCHANGE, "run.discarded", content, correlation())?;
            }
            "execution.discard" => {
                self.status = Some(ActivityStatus::Discarded);
                self.broker
                    .publish(RUN_EXCHANGE, "run.discarded", content, correlation())?;
            }
            _ => {
                self.status = Some(ActivityStatus::Executed);
                self.broker
                    .publish(RUN_EXCHANGE, "run.end", content, correlation())?;
            }
        }

        self.broker.ack(&message);
        self.ack_run_execute_message();
        Ok(())
    }

    fn ack_run_execute_message(&mut self) {
        if self.context.environment.settings().step {
            return;
        }
        if let Some(execute_message) = self.execute_message.take() {
            self.broker.ack(&execute_message);
        }
    }

    /// Take or discard the outbound flows, then leave. Returns false when the
    /// outbound evaluation failed; the failure is published as `activity.error`.
    fn do_run_leave(&mut self, message: &Message, discarded: bool) -> Result<bool, ActivityError> {
        let content = message.content.clone();
        let props = MessageProperties::new().correlation_id(message.correlation_id());
        if content.get_bool("ignoreOutbound") {
            self.broker.publish(RUN_EXCHANGE, "run.leave", content, props)?;
            return Ok(true);
        }

        match self.do_outbound(&content, discarded) {
            Ok(outbound) => {
                let mut leave = content;
                if !outbound.is_empty() {
                    leave.insert("outbound", outbound);
                }
                self.broker.publish(RUN_EXCHANGE, "run.leave", leave, props)?;
                Ok(true)
            }
            Err(ActivityError::Flow(error)) => {
                OutboundEvaluationFailed {
                    activity_id: &self.info.id,
                    error: &error,
                }
                .log();
                let error = BehaviourError::new(error.to_string()).with_code("outbound");
                self.publish_event("error", content.with("error", error.to_value()), Some(props))?;
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    fn do_outbound(&mut self, from: &Content, discarded: bool) -> Result<Vec<Value>, ActivityError> {
        if self.outbound.is_empty() {
            return Ok(Vec::new());
        }

        let mut discard_sequence: Option<Vec<Value>> = match from.get("discardSequence") {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        };
        if discarded && discard_sequence.is_none() && self.info.flags.attached_to.is_some() {
            let first_inbound = from
                .get("inbound")
                .and_then(|inbound| inbound.get(0))
                .and_then(|first| first.get("id"))
                .cloned();
            discard_sequence = first_inbound.map(|id| vec![id]);
        }

        let precomputed = match from.get("outbound") {
            Some(Value::Array(items)) if !items.is_empty() => Some(items),
            _ => None,
        };

        let decisions: Vec<FlowDecision> = if discarded {
            self.outbound
                .iter()
                .map(|f| FlowDecision::new(f.id(), FlowAction::Discard, f.is_default()))
                .collect()
        } else if let Some(precomputed) = precomputed {
            self.outbound
                .iter()
                .map(|flow| {
                    precomputed
                        .iter()
                        .rev()
                        .filter(|entry| entry.get("id").and_then(Value::as_str) == Some(flow.id()))
                        .find_map(|entry| FlowDecision::from_content(&Content::from(entry.clone())))
                        .map(|mut decision| {
                            decision.is_default = flow.is_default();
                            decision
                        })
                        .unwrap_or_else(|| {
                            FlowDecision::new(flow.id(), FlowAction::Discard, flow.is_default())
                        })
                })
                .collect()
        } else {
            self.evaluator.evaluate(
                from,
                &self.context.environment,
                from.get_bool("outboundTakeOne"),
            )?
        };

        let mut outbound = Vec::with_capacity(decisions.len());
        for decision in decisions.iter() {
            let action = decision.action.as_str();
            let mut flow = decision
                .to_content()
                .with("sequenceId", unique_id(&format!("{}_{}", decision.id, action)));
            if let Some(sequence) = &discard_sequence {
                flow.insert("discardSequence", sequence.clone());
            }
            self.broker.publish(
                RUN_EXCHANGE,
                &format!("run.outbound.{}", action),
                from.clone().with("flow", flow.into_value()),
                MessageProperties::new(),
            )?;
            outbound.push(decision.to_content().into_value());
        }
        Ok(outbound)
    }

    fn on_resume_message(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.broker.ack(message);

        let Some(state_message) = self.state_message.clone() else {
            return Ok(());
        };
        let routing_key = state_message.routing_key();
        if !matches!(
            routing_key,
            "run.enter" | "run.start" | "run.discarded" | "run.end" | "run.leave"
        ) {
            return Ok(());
        }
        if !state_message.is_redelivered() {
            return Ok(());
        }

        ActivityResumed {
            activity_id: &self.info.id,
            routing_key,
        }
        .log();
        self.broker.publish(
            RUN_EXCHANGE,
            routing_key,
            state_message.content.clone(),
            state_message.properties.clone(),
        )?;
        Ok(())
    }

    fn publish_event(
        &mut self,
        state: &str,
        content: Content,
        properties: Option<MessageProperties>,
    ) -> Result<(), ActivityError> {
        let properties = match properties {
            Some(properties) => properties,
            None => MessageProperties::new().persistent(state != "stop"),
        };
        self.broker.publish(
            EVENT_EXCHANGE,
            &format!("activity.{}", state),
            content.with("state", state),
            properties
                .message_type(state)
                .mandatory(state == "error"),
        )?;
        Ok(())
    }
}

fn activity_broker(id: &str) -> Broker {
    let mut broker = Broker::new(id);
    for exchange in [
        RUN_EXCHANGE,
        FORMAT_EXCHANGE,
        EXECUTION_EXCHANGE,
        API_EXCHANGE,
        EVENT_EXCHANGE,
    ] {
        broker.assert_exchange(exchange);
    }
    for queue in [
        INBOUND_QUEUE,
        RUN_QUEUE,
        FORMAT_RUN_QUEUE,
        EXECUTION_QUEUE,
        EXECUTE_QUEUE,
    ] {
        broker.assert_queue(queue, QueueOptions::durable());
    }
    // exchanges and queues were asserted above
    let _ = broker.bind_queue(RUN_QUEUE, RUN_EXCHANGE, "run.#", 0);
    let _ = broker.bind_queue(FORMAT_RUN_QUEUE, FORMAT_EXCHANGE, "run.#", 0);
    let _ = broker.bind_queue(EXECUTION_QUEUE, EXECUTION_EXCHANGE, "execution.#", 0);
    broker
}
