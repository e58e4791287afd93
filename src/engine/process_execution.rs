// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution of one process scope.
//!
//! A process execution owns the activities of a scope (the top-level process
//! or the inside of a sub-process) and wires them together: it polls every
//! child's event exchange, routes `flow.*` events to the target activity,
//! feeds host events to attached boundary activities, and completes once no
//! child is running anymore.
//!
//! Completion is published on the execution's own broker as
//! `execution.<completion>.<executionId>` and can be polled with
//! [`ProcessExecution::take_completion`].

use crate::broker::{Broker, Content, Message, MessageProperties};
use crate::config::consts::{
    activity_types, COMPLETION_QUEUE, EVENT_EXCHANGE, EXECUTION_EXCHANGE, SCOPE_EVENT_QUEUE,
};
use crate::config::EnvironmentState;
use crate::engine::activity::{Activity, ActivityState};
use crate::engine::api::{ActivityApi, ApiCommand};
use crate::engine::{ActivityInfo, ProcessContext, ProcessEvent};
use crate::errors::ActivityError;
use crate::observability::messages::process::{
    ProcessActivityError, ProcessExecutionCompleted, ProcessExecutionStarted,
};
use crate::observability::messages::StructuredLog;
use crate::traits::StartFilter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Top-level scope type used in parent descriptors.
pub const PROCESS_TYPE: &str = "process";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Idle,
    Executing,
    Completed,
    Discarded,
    Errored,
    Stopped,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Discarded => "discarded",
            Self::Errored => "errored",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Discarded | Self::Errored)
    }
}

/// Shake result: for every start activity, the sequences that reached an end
/// or looped back.
pub type ShakeResult = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExecutionState {
    pub id: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub execution_id: String,
    pub status: ProcessStatus,
    #[serde(default)]
    pub execute_content: Content,
    pub environment: EnvironmentState,
    #[serde(default)]
    pub children: Vec<ActivityState>,
}

pub struct ProcessExecution {
    id: String,
    process_type: String,
    execution_id: String,
    /// Descriptor handed to every child as its `parent`
    scope: Content,
    context: ProcessContext,
    broker: Broker,
    children: Vec<Activity>,
    status: ProcessStatus,
    execute_content: Content,
    shake_result: ShakeResult,
}

impl std::fmt::Debug for ProcessExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessExecution")
            .field("id", &self.id)
            .field("execution_id", &self.execution_id)
            .field("status", &self.status)
            .field("children", &self.children.len())
            .finish()
    }
}

impl ProcessExecution {
    /// Execution of the top-level process of `context.graph`.
    pub fn new(context: ProcessContext, execution_id: &str) -> Self {
        let id = context.graph.process_id().to_string();
        let scope = Content::new()
            .with("id", id.as_str())
            .with("type", PROCESS_TYPE)
            .with("executionId", execution_id);
        Self::with_scope(id, PROCESS_TYPE.to_string(), execution_id, scope, context)
    }

    /// Execution of the scope inside a sub-process activity.
    pub fn nested(activity: &ActivityInfo, execution_id: &str, context: ProcessContext) -> Self {
        let mut scope = Content::new()
            .with("id", activity.id.as_str())
            .with("type", activity.activity_type.as_str())
            .with("executionId", execution_id);
        if !activity.parent.0.is_empty() {
            let mut outer = activity.parent.clone();
            let outer_path = outer.remove("path");
            let mut path = vec![outer.into_value()];
            if let Some(Value::Array(items)) = outer_path {
                path.extend(items);
            }
            scope.insert("path", path);
        }
        Self::with_scope(
            activity.id.clone(),
            activity.activity_type.clone(),
            execution_id,
            scope,
            context,
        )
    }

    fn with_scope(
        id: String,
        process_type: String,
        execution_id: &str,
        scope: Content,
        context: ProcessContext,
    ) -> Self {
        let mut broker = Broker::new(&id);
        broker.assert_exchange(EVENT_EXCHANGE);
        broker.assert_exchange(EXECUTION_EXCHANGE);
        // exchange asserted above
        let _ = broker.observe(EXECUTION_EXCHANGE, "execution.#", COMPLETION_QUEUE);

        Self {
            id,
            process_type,
            execution_id: execution_id.to_string(),
            scope,
            context,
            broker,
            children: Vec::new(),
            status: ProcessStatus::Idle,
            execute_content: Content::new(),
            shake_result: ShakeResult::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Executing
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn broker_mut(&mut self) -> &mut Broker {
        &mut self.broker
    }

    pub fn children(&self) -> &[Activity] {
        &self.children
    }

    pub fn child(&self, id: &str) -> Option<&Activity> {
        self.children.iter().find(|c| c.id() == id)
    }

    /// Next completion message, if the execution finished or stopped.
    pub fn take_completion(&mut self) -> Option<Message> {
        self.broker.get(COMPLETION_QUEUE)
    }

    pub fn execute(&mut self, content: Content) -> Result<(), ActivityError> {
        if self.status == ProcessStatus::Executing {
            return Err(ActivityError::AlreadyRunning {
                activity_id: self.id.clone(),
            });
        }
        self.ensure_children()?;
        self.execute_content = content.with("executionId", self.execution_id.as_str());
        self.status = ProcessStatus::Executing;

        let starts: Vec<String> = self
            .context
            .graph
            .start_activities(&StartFilter::all(), &self.id)
            .into_iter()
            .map(|a| a.id.clone())
            .collect();

        ProcessExecutionStarted {
            process_id: &self.id,
            execution_id: &self.execution_id,
            start_count: starts.len(),
        }
        .log();

        for child in self.children.iter_mut() {
            child.activate()?;
        }
        for start in starts.iter() {
            if let Some(idx) = self.child_index(start) {
                self.children[idx].run(Content::new())?;
            }
        }
        self.pump()
    }

    /// Route every pending child event, then check for completion.
    pub fn pump(&mut self) -> Result<(), ActivityError> {
        loop {
            let mut routed = false;
            for idx in 0..self.children.len() {
                while let Some(message) = self.children[idx].broker_mut().get(SCOPE_EVENT_QUEUE) {
                    routed = true;
                    self.on_child_event(&message)?;
                }
            }
            if !routed {
                break;
            }
        }
        self.check_completed()
    }

    pub fn stop(&mut self) -> Result<(), ActivityError> {
        if self.status != ProcessStatus::Executing {
            return Ok(());
        }
        self.status = ProcessStatus::Stopped;
        for child in self.children.iter_mut() {
            child.stop()?;
        }
        self.pump()?;
        self.publish_completion("stopped", None)
    }

    pub fn discard(&mut self) -> Result<(), ActivityError> {
        if self.status != ProcessStatus::Executing {
            return Ok(());
        }
        self.status = ProcessStatus::Discarded;
        for child in self.children.iter_mut() {
            child.deactivate();
        }
        for child in self.children.iter_mut() {
            if child.status().is_some() {
                child.discard(Content::new())?;
            }
        }
        self.pump()?;
        self.publish_completion("discard", None)
    }

    pub fn get_state(&self) -> ProcessExecutionState {
        ProcessExecutionState {
            id: self.id.clone(),
            process_type: self.process_type.clone(),
            execution_id: self.execution_id.clone(),
            status: self.status,
            execute_content: self.execute_content.clone(),
            environment: self.context.environment.get_state(),
            children: self.children.iter().map(Activity::get_state).collect(),
        }
    }

    pub fn recover(&mut self, state: &ProcessExecutionState) -> Result<(), ActivityError> {
        if self.status == ProcessStatus::Executing {
            return Err(ActivityError::CannotRecoverRunning {
                activity_id: self.id.clone(),
            });
        }
        self.ensure_children()?;
        self.status = state.status;
        self.execute_content = state.execute_content.clone();
        self.context.environment.recover(&state.environment);
        for child_state in state.children.iter() {
            if let Some(idx) = self.child_index(&child_state.id) {
                self.children[idx].recover(child_state)?;
            }
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ActivityError> {
        if !matches!(
            self.status,
            ProcessStatus::Executing | ProcessStatus::Stopped
        ) {
            return Ok(());
        }
        self.ensure_children()?;
        self.status = ProcessStatus::Executing;
        for child in self.children.iter_mut() {
            if !child.is_running() {
                child.resume()?;
            }
        }
        self.pump()
    }

    /// Walk the scope from its start activities, or from `start_id`.
    pub fn shake(&mut self, start_id: Option<&str>) -> Result<ShakeResult, ActivityError> {
        self.ensure_children()?;
        self.shake_result.clear();
        let starts: Vec<String> = match start_id {
            Some(id) => vec![id.to_string()],
            None => self
                .context
                .graph
                .start_activities(&StartFilter::all(), &self.id)
                .into_iter()
                .map(|a| a.id.clone())
                .collect(),
        };
        for start in starts.iter() {
            let Some(idx) = self.child_index(start) else {
                return Err(ActivityError::ActivityNotFound {
                    activity_id: start.clone(),
                });
            };
            self.children[idx].shake()?;
            self.pump()?;
        }
        Ok(std::mem::take(&mut self.shake_result))
    }

    /// Steps waiting for something, nested ones included.
    pub fn get_postponed(&self) -> Vec<ActivityApi> {
        self.children
            .iter()
            .filter(|c| c.status().is_some())
            .flat_map(Activity::get_postponed)
            .collect()
    }

    /// Deliver an API command to the step described by `target`.
    ///
    /// Returns `Ok(false)` when no step of this scope, nested or not, matches.
    pub fn send_api(&mut self, command: &ApiCommand, target: &Content) -> Result<bool, ActivityError> {
        if target.execution_id() == Some(self.execution_id.as_str()) && target.id() == Some(self.id.as_str()) {
            match command {
                ApiCommand::Stop => self.stop()?,
                ApiCommand::Discard => self.discard()?,
                _ => return Ok(false),
            }
            return Ok(true);
        }

        let parent_execution_id = target
            .get("parent")
            .and_then(|p| p.get("executionId"))
            .and_then(Value::as_str);
        if parent_execution_id == Some(self.execution_id.as_str()) {
            if let Some(idx) = target.id().and_then(|id| self.child_index(id)) {
                self.children[idx].send_api(command, target)?;
                self.pump()?;
                return Ok(true);
            }
        }

        for idx in 0..self.children.len() {
            if self.children[idx].status().is_none() {
                continue;
            }
            if self.children[idx].delegate_api(command, target)? {
                self.pump()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Signal the latest postponed step of activity `activity_id`.
    pub fn signal(&mut self, activity_id: &str, message: Value) -> Result<bool, ActivityError> {
        let Some(api) = self
            .get_postponed()
            .into_iter()
            .rev()
            .find(|api| api.id() == Some(activity_id))
        else {
            return Ok(false);
        };
        self.send_api(&ApiCommand::Signal(message), &api.content)
    }

    fn ensure_children(&mut self) -> Result<(), ActivityError> {
        if !self.children.is_empty() {
            return Ok(());
        }
        let definitions: Vec<_> = self
            .context
            .graph
            .activities(&self.id)
            .into_iter()
            .cloned()
            .collect();
        for definition in definitions.iter() {
            let mut child = Activity::new(definition, self.scope.clone(), self.context.clone());
            child
                .broker_mut()
                .observe(EVENT_EXCHANGE, "#", SCOPE_EVENT_QUEUE)?;
            self.children.push(child);
        }
        Ok(())
    }

    fn child_index(&self, id: &str) -> Option<usize> {
        self.children.iter().position(|c| c.id() == id)
    }

    fn attached_to(&self, host_id: &str) -> Vec<usize> {
        self.context
            .graph
            .attached_activities(host_id)
            .into_iter()
            .filter_map(|a| self.child_index(&a.id))
            .collect()
    }

    fn on_child_event(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.relay_event(message)?;
        let content = &message.content;
        let source_id = content.id().unwrap_or_default().to_string();

        match message.routing_key() {
            "flow.shake" => self.route_to_target(message)?,
            "flow.shake.loop" | "activity.shake.end" => self.record_shake(content),
            _ if self.status != ProcessStatus::Executing => {}
            "flow.take" | "flow.discard" => self.route_to_target(message)?,
            "activity.enter" | "activity.discard" => {
                for idx in self.attached_to(&source_id) {
                    self.children[idx].on_inbound_event(message)?;
                }
            }
            "activity.end" => self.on_child_end(&source_id, content)?,
            "activity.leave" => {
                for idx in self.attached_to(&source_id) {
                    if self.children[idx].status().is_some() {
                        self.children[idx].discard(Content::new())?;
                    }
                }
            }
            "activity.error" => self.on_child_error(&source_id, content)?,
            _ => {}
        }
        Ok(())
    }

    fn route_to_target(&mut self, message: &Message) -> Result<(), ActivityError> {
        let Some(idx) = message
            .content
            .get_str("targetId")
            .and_then(|id| self.child_index(id))
        else {
            return Ok(());
        };
        self.children[idx].on_inbound_event(message)
    }

    fn record_shake(&mut self, content: &Content) {
        let Some(Value::Array(sequence)) = content.get("sequence") else {
            return;
        };
        let Some(start) = sequence
            .first()
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
        else {
            return;
        };
        self.shake_result
            .entry(start.to_string())
            .or_default()
            .push(Value::Array(sequence.clone()));
    }

    fn on_child_end(&mut self, source_id: &str, content: &Content) -> Result<(), ActivityError> {
        if let Some(output) = content.get("output") {
            self.context.environment.set_output(source_id, output.clone());
        }

        let Some(idx) = self.child_index(source_id) else {
            return Ok(());
        };
        let info = self.children[idx].info();
        let Some(host_id) = info.flags.attached_to.clone() else {
            return Ok(());
        };
        if !info.behaviour.cancels_activity() {
            return Ok(());
        }
        if let Some(host) = self.child_index(&host_id) {
            if self.children[host].status().is_some() {
                self.children[host].discard(Content::new())?;
            }
        }
        Ok(())
    }

    fn on_child_error(&mut self, source_id: &str, content: &Content) -> Result<(), ActivityError> {
        let error = content.get("error").cloned().unwrap_or(Value::Null);

        let catcher = self.attached_to(source_id).into_iter().find(|idx| {
            let child = &self.children[*idx];
            child.status().is_some()
                && child.info().activity_type == activity_types::BOUNDARY_EVENT
                && child.info().behaviour.catch_error
        });
        if let Some(idx) = catcher {
            let target = self.children[idx].get_api().content;
            return self.children[idx].send_api(
                &ApiCommand::Signal(json!({ "error": error })),
                &target,
            );
        }

        ProcessActivityError {
            process_id: &self.id,
            activity_id: source_id,
            error: &error.to_string(),
        }
        .log();
        self.status = ProcessStatus::Errored;
        for child in self.children.iter_mut() {
            child.stop()?;
        }
        self.publish_completion("error", Some(error))
    }

    fn check_completed(&mut self) -> Result<(), ActivityError> {
        if self.status != ProcessStatus::Executing {
            return Ok(());
        }
        if self.children.iter().any(|c| c.status().is_some()) {
            return Ok(());
        }
        self.status = ProcessStatus::Completed;
        self.publish_completion("completed", None)
    }

    fn publish_completion(&mut self, completion: &str, error: Option<Value>) -> Result<(), ActivityError> {
        let mut content = self
            .execute_content
            .clone()
            .with("output", Value::Object(self.context.environment.output()))
            .with("state", completion);
        if let Some(error) = error {
            content.insert("error", error);
        }

        ProcessExecutionCompleted {
            process_id: &self.id,
            execution_id: &self.execution_id,
            completion,
        }
        .log();

        let routing_key = format!("execution.{}.{}", completion, self.execution_id);
        self.context.emit(ProcessEvent {
            routing_key: routing_key.clone(),
            content: content.clone(),
            message_type: Some(completion.to_string()),
        });
        self.broker.publish(
            EXECUTION_EXCHANGE,
            &routing_key,
            content,
            MessageProperties::new().message_type(completion),
        )?;
        Ok(())
    }

    fn relay_event(&mut self, message: &Message) -> Result<(), ActivityError> {
        self.context.emit(ProcessEvent {
            routing_key: message.routing_key().to_string(),
            content: message.content.clone(),
            message_type: message.message_type().map(str::to_string),
        });
        self.broker.publish(
            EVENT_EXCHANGE,
            message.routing_key(),
            message.content.clone(),
            message.properties.clone().mandatory(false),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, GraphBuilder, ProcessGraph, Settings};
    use serde_json::Map;
    use std::sync::Arc;

    fn execution(graph: ProcessGraph) -> ProcessExecution {
        let context = ProcessContext::new(
            Arc::new(graph),
            Environment::new(Settings::default(), Map::new()),
        );
        let mut execution = ProcessExecution::new(context, "p_1");
        execution
            .broker_mut()
            .observe(EVENT_EXCHANGE, "#", "test-events")
            .unwrap();
        execution
    }

    fn events(execution: &mut ProcessExecution) -> Vec<String> {
        let mut keys = Vec::new();
        while let Some(message) = execution.broker_mut().get("test-events") {
            keys.push(format!(
                "{}:{}",
                message.routing_key(),
                message.content.id().unwrap_or_default()
            ));
        }
        keys
    }

    #[test]
    fn test_sequence_completes() {
        let graph = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity("task", "task")
            .activity("end", "end_event")
            .flow("f1", "start", "task")
            .flow("f2", "task", "end")
            .build();
        let mut execution = execution(graph);
        execution.execute(Content::new()).unwrap();

        assert_eq!(execution.status(), ProcessStatus::Completed);
        let completion = execution.take_completion().unwrap();
        assert_eq!(completion.routing_key(), "execution.completed.p_1");

        let keys = events(&mut execution);
        assert!(keys.contains(&"activity.leave:end".to_string()));
        assert_eq!(execution.child("task").unwrap().counters().taken, 1);
    }

    #[test]
    fn test_waits_for_user_task_then_completes_on_signal() {
        let graph = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity("review", "user_task")
            .activity("end", "end_event")
            .flow("f1", "start", "review")
            .flow("f2", "review", "end")
            .build();
        let mut execution = execution(graph);
        execution.execute(Content::new()).unwrap();
        assert!(execution.is_running());
        assert!(execution.take_completion().is_none());

        let postponed = execution.get_postponed();
        assert_eq!(postponed.len(), 1);
        assert_eq!(postponed[0].id(), Some("review"));

        assert!(execution.signal("review", json!({"approved": true})).unwrap());
        assert_eq!(execution.status(), ProcessStatus::Completed);
        let completion = execution.take_completion().unwrap();
        assert_eq!(
            completion.content.get("output").and_then(|o| o.get("review")),
            Some(&json!({"approved": true}))
        );
    }

    #[test]
    fn test_unhandled_error_fails_process() {
        let graph = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity_with(
                crate::config::ActivityDefinition::new("charge", "service_task").with_behaviour(
                    crate::config::BehaviourParams::default().with_extra("fail", "card declined"),
                ),
            )
            .activity("end", "end_event")
            .flow("f1", "start", "charge")
            .flow("f2", "charge", "end")
            .build();
        let mut execution = execution(graph);
        execution.execute(Content::new()).unwrap();

        assert_eq!(execution.status(), ProcessStatus::Errored);
        let completion = execution.take_completion().unwrap();
        assert_eq!(completion.message_type(), Some("error"));
        assert_eq!(
            completion.content.get("error").and_then(|e| e.get("message")),
            Some(&json!("card declined"))
        );
        assert_eq!(execution.child("end").unwrap().counters().taken, 0);
    }

    #[test]
    fn test_discard_running_process() {
        let graph = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity("review", "user_task")
            .flow("f1", "start", "review")
            .build();
        let mut execution = execution(graph);
        execution.execute(Content::new()).unwrap();

        execution.discard().unwrap();
        assert_eq!(execution.status(), ProcessStatus::Discarded);
        assert_eq!(execution.take_completion().unwrap().message_type(), Some("discard"));
        assert_eq!(execution.child("review").unwrap().counters().discarded, 1);
    }

    #[test]
    fn test_shake_reports_sequences_per_start() {
        let graph = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity("gateway", "exclusive_gateway")
            .activity("a", "task")
            .activity("end", "end_event")
            .flow("f1", "start", "gateway")
            .flow("f2", "gateway", "a")
            .flow("f3", "gateway", "end")
            .flow("f4", "a", "gateway")
            .build();
        let mut execution = execution(graph);
        let result = execution.shake(None).unwrap();

        // end through f3, back through a to the gateway, then end again or loop over f2
        let sequences = result.get("start").unwrap();
        assert_eq!(sequences.len(), 3);
        let looped = sequences
            .iter()
            .filter(|s| s.as_array().unwrap().iter().filter(|step| step["id"] == "gateway").count() == 2)
            .count();
        assert_eq!(looped, 2);
        assert_eq!(execution.status(), ProcessStatus::Idle);
        assert!(execution.children().iter().all(|c| c.status().is_none()));
    }
}
