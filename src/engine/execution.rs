// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution controller of one activity run.
//!
//! The controller sits between the activity and its behaviour. It tracks the
//! root step and every sub-step the behaviour starts (loop iterations,
//! nested executions) as postponed messages on `execute-q`, and turns their
//! outcomes into exactly one `execution.completed`, `execution.discard` or
//! `execution.error` for the activity.

use crate::broker::{ConsumeOptions, Content, Message, MessageProperties};
use crate::config::consts::{
    API_EXCHANGE, EXECUTE_PRIORITY, EXECUTE_QUEUE, EXECUTION_API_PRIORITY, EXECUTION_API_TAG,
    EXECUTION_EXCHANGE, ACTIVITY_EXECUTE_TAG,
};
use crate::engine::api::{publish_api, ActivityApi, ApiCommand};
use crate::engine::ActivityScope;
use crate::errors::{ActivityError, BehaviourError};
use crate::observability::messages::execution::{
    BehaviourFailed, ExecutionCompleted, ExecutionNotRunning, ExecutionStarted,
};
use crate::observability::messages::StructuredLog;
use crate::traits::ActivityBehaviour;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<Value>,
}

pub struct ActivityExecution {
    activity_id: String,
    batch_size: usize,
    behaviour: Option<Box<dyn ActivityBehaviour>>,
    postponed: Vec<Message>,
    execute_message: Option<Message>,
    completed: bool,
}

impl std::fmt::Debug for ActivityExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityExecution")
            .field("activity_id", &self.activity_id)
            .field("execution_id", &self.execution_id())
            .field("postponed", &self.postponed.len())
            .field("completed", &self.completed)
            .finish()
    }
}

impl ActivityExecution {
    pub fn new(activity_id: &str, batch_size: usize) -> Self {
        Self {
            activity_id: activity_id.to_string(),
            batch_size: batch_size.max(1),
            behaviour: None,
            postponed: Vec::new(),
            execute_message: None,
            completed: false,
        }
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execute_message
            .as_ref()
            .and_then(|m| m.content.execution_id())
    }

    /// Root execute message, as it was first received.
    pub fn execute_message(&self) -> Option<&Message> {
        self.execute_message.as_ref()
    }

    pub fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let execution_id = message
            .content
            .execution_id()
            .ok_or_else(|| ActivityError::MissingExecutionId {
                activity_id: self.activity_id.clone(),
            })?
            .to_string();

        let init = message.with_content(
            message
                .content
                .clone()
                .with("executionId", execution_id.as_str())
                .with("state", "start")
                .with("isRootScope", true),
        );
        let content = init.content.clone();
        self.execute_message = Some(init);

        let resumed = message.is_redelivered();
        ExecutionStarted {
            activity_id: &self.activity_id,
            execution_id: &execution_id,
            resumed,
        }
        .log();

        if resumed {
            self.postponed.clear();
            self.ensure_behaviour(scope)?;
            self.activate(scope)?;
            scope.broker.publish(
                EXECUTION_EXCHANGE,
                "execute.resume.execution",
                content,
                MessageProperties::new().transient(),
            )?;
            return Ok(());
        }

        // whatever is left belongs to an earlier run
        scope.broker.purge(EXECUTE_QUEUE);
        self.activate(scope)?;
        self.behaviour = Some(
            scope
                .context
                .behaviours
                .create(scope.activity, scope.context)?,
        );
        scope
            .broker
            .publish(EXECUTION_EXCHANGE, "execute.start", content, MessageProperties::new())?;
        Ok(())
    }

    fn ensure_behaviour(&mut self, scope: &ActivityScope<'_>) -> Result<(), ActivityError> {
        if self.behaviour.is_none() {
            self.behaviour = Some(
                scope
                    .context
                    .behaviours
                    .create(scope.activity, scope.context)?,
            );
        }
        Ok(())
    }

    pub fn activate(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), ActivityError> {
        if self.completed {
            return Ok(());
        }
        scope
            .broker
            .bind_queue(EXECUTE_QUEUE, EXECUTION_EXCHANGE, "execute.#", EXECUTE_PRIORITY)?;
        scope.broker.assert_consumer(
            EXECUTE_QUEUE,
            ConsumeOptions::new(ACTIVITY_EXECUTE_TAG)
                .exclusive()
                .prefetch(self.batch_size * 2)
                .priority(EXECUTE_PRIORITY),
        )?;
        let execution_id = self.execution_id().unwrap_or_default().to_string();
        scope.broker.subscribe_tmp(
            API_EXCHANGE,
            &format!("activity.*.{}", execution_id),
            ConsumeOptions::new(EXECUTION_API_TAG)
                .no_ack()
                .priority(EXECUTION_API_PRIORITY),
        )?;
        Ok(())
    }

    pub fn deactivate(&mut self, scope: &mut ActivityScope<'_>) {
        scope.broker.cancel(EXECUTION_API_TAG);
        scope.broker.cancel(ACTIVITY_EXECUTE_TAG);
        scope
            .broker
            .unbind_queue(EXECUTE_QUEUE, EXECUTION_EXCHANGE, "execute.#");
    }

    /// Ask the root step to discard itself.
    pub fn discard(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), ActivityError> {
        if self.completed {
            return Ok(());
        }
        let Some(init) = &self.execute_message else {
            ExecutionNotRunning {
                activity_id: &self.activity_id,
            }
            .log();
            return Ok(());
        };
        publish_api(scope.broker, &ApiCommand::Discard, &init.content)?;
        Ok(())
    }

    pub fn stop(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), ActivityError> {
        if let Some(init) = &self.execute_message {
            publish_api(scope.broker, &ApiCommand::Stop, &init.content)?;
        }
        Ok(())
    }

    /// Hand a message to the running behaviour, starting it if there is none.
    pub fn passthrough(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        if self.behaviour.is_none() {
            return self.execute(scope, message);
        }
        self.source_execute(scope, message)
    }

    /// Let a nested execution take an API command.
    pub fn delegate_api(
        &mut self,
        scope: &mut ActivityScope<'_>,
        command: &ApiCommand,
        target: &Content,
    ) -> Result<bool, ActivityError> {
        if self.completed {
            return Ok(false);
        }
        let Some(behaviour) = self.behaviour.as_mut() else {
            return Ok(false);
        };
        match behaviour.delegate_api(scope, command, target) {
            Ok(delivered) => Ok(delivered),
            Err(error) => {
                let content = self
                    .execute_message
                    .as_ref()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                self.publish_behaviour_error(scope, content, &error)?;
                Ok(true)
            }
        }
    }

    /// Postponed steps, including the ones waiting inside nested executions.
    pub fn get_postponed(&self) -> Vec<ActivityApi> {
        let mut apis: Vec<ActivityApi> = self
            .postponed
            .iter()
            .map(|m| ActivityApi::new(m.routing_key(), m.content.clone()))
            .collect();
        if let Some(behaviour) = &self.behaviour {
            apis.extend(behaviour.get_postponed());
        }
        apis
    }

    pub fn get_state(&self) -> ExecutionState {
        ExecutionState {
            completed: self.completed,
            behaviour: self.behaviour.as_ref().and_then(|b| b.get_state()),
        }
    }

    pub fn recover(
        &mut self,
        scope: &mut ActivityScope<'_>,
        state: &ExecutionState,
    ) -> Result<(), ActivityError> {
        self.postponed.clear();
        self.completed = state.completed;

        let mut behaviour = scope
            .context
            .behaviours
            .create(scope.activity, scope.context)?;
        if let Some(behaviour_state) = &state.behaviour {
            behaviour
                .recover(scope, behaviour_state)
                .map_err(|e| ActivityError::InvalidState {
                    activity_id: self.activity_id.clone(),
                    reason: e.message,
                })?;
        }
        self.behaviour = Some(behaviour);
        Ok(())
    }

    /// Dispatch a delivery for one of the execution's consumers.
    pub fn handle_delivery(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        match message.fields.consumer_tag.as_deref() {
            Some(ACTIVITY_EXECUTE_TAG) => self.on_execute_message(scope, message),
            Some(EXECUTION_API_TAG) => self.on_parent_api_message(scope, message),
            _ => {
                let Some(behaviour) = self.behaviour.as_mut() else {
                    scope.broker.ack(message);
                    return Ok(());
                };
                if let Err(error) = behaviour.on_message(scope, message) {
                    self.publish_behaviour_error(scope, message.content.clone(), &error)?;
                }
                Ok(())
            }
        }
    }

    fn source_execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let Some(behaviour) = self.behaviour.as_mut() else {
            return Ok(());
        };
        if let Err(error) = behaviour.execute(scope, message) {
            self.publish_behaviour_error(scope, message.content.clone(), &error)?;
        }
        Ok(())
    }

    fn publish_behaviour_error(
        &self,
        scope: &mut ActivityScope<'_>,
        content: Content,
        error: &BehaviourError,
    ) -> Result<(), ActivityError> {
        BehaviourFailed {
            activity_id: &self.activity_id,
            execution_id: content.execution_id().unwrap_or_default(),
            error,
        }
        .log();
        scope.broker.publish(
            EXECUTION_EXCHANGE,
            "execute.error",
            content.with("error", error.to_value()),
            MessageProperties::new(),
        )?;
        Ok(())
    }

    fn on_execute_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let redelivered = message.is_redelivered();
        if redelivered && !message.properties.persistent {
            scope.broker.ack(message);
            return Ok(());
        }

        match message.routing_key() {
            "execute.resume.execution" => {
                scope.broker.ack(message);
                if self.postponed.is_empty() {
                    if let Some(init) = &self.execute_message {
                        scope.broker.publish(
                            EXECUTION_EXCHANGE,
                            "execute.start",
                            init.content.clone(),
                            MessageProperties::new(),
                        )?;
                    }
                }
                Ok(())
            }
            "execute.error" | "execute.discard" => self.on_execution_discarded(scope, message),
            key @ ("execute.cancel" | "execute.completed") => {
                if redelivered {
                    scope.broker.ack(message);
                    scope.broker.publish(
                        EXECUTION_EXCHANGE,
                        key,
                        execute_message_of(message).content,
                        MessageProperties::new(),
                    )?;
                    return Ok(());
                }
                self.on_execution_completed(scope, message)
            }
            "execute.start" => {
                if !self.on_state_change(scope, message) {
                    return Ok(());
                }
                self.source_execute(scope, &execute_message_of(message))
            }
            "execute.outbound.take" => {
                if !redelivered {
                    scope.broker.publish(
                        EXECUTION_EXCHANGE,
                        "execution.outbound.take",
                        message.content.clone(),
                        MessageProperties::new().message_type("outbound"),
                    )?;
                }
                scope.broker.ack(message);
                Ok(())
            }
            _ => {
                if !self.on_state_change(scope, message) {
                    return Ok(());
                }
                if redelivered {
                    return self.source_execute(scope, &execute_message_of(message));
                }
                Ok(())
            }
        }
    }

    /// Track the latest message per execution id. Returns false when the
    /// message asked to be ignored because the step is already executing.
    fn on_state_change(&mut self, scope: &mut ActivityScope<'_>, message: &Message) -> bool {
        let execution_id = message.content.execution_id();
        let existing = self
            .postponed
            .iter()
            .position(|m| m.content.execution_id() == execution_id);

        match existing {
            Some(_) if message.content.get_bool("ignoreIfExecuting") => {
                scope.broker.ack(message);
                false
            }
            Some(idx) => {
                let previous = std::mem::replace(&mut self.postponed[idx], message.clone());
                scope.broker.ack(&previous);
                true
            }
            None => {
                self.postponed.push(message.clone());
                true
            }
        }
    }

    fn ack_postponed(&mut self, scope: &mut ActivityScope<'_>, message: &Message) -> Option<Message> {
        let execution_id = message.content.execution_id();
        let idx = self
            .postponed
            .iter()
            .position(|m| m.content.execution_id() == execution_id)?;
        let postponed = self.postponed.remove(idx);
        scope.broker.ack(&postponed);
        Some(postponed)
    }

    fn on_execution_completed(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let Some(postponed) = self.ack_postponed(scope, message) else {
            scope.broker.ack(message);
            return Ok(());
        };

        if !message.content.is_root_scope() {
            ExecutionCompleted {
                activity_id: &self.activity_id,
                execution_id: message.content.execution_id().unwrap_or_default(),
                completion: "completed",
                is_root_scope: false,
            }
            .log();
            if !message.content.get_bool("keep") {
                scope.broker.ack(message);
            }
            if let [root] = self.postponed.as_slice() {
                if root.content.is_root_scope() && !root.content.get_bool("preventComplete") {
                    let content = root.content.clone();
                    scope.broker.publish(
                        EXECUTION_EXCHANGE,
                        "execute.completed",
                        content,
                        MessageProperties::new(),
                    )?;
                }
            }
            return Ok(());
        }

        self.completed = true;
        scope.broker.ack_all_up_to(message);
        self.deactivate(scope);
        self.discard_sub_steps(scope)?;

        let content = postponed.content.merged(&message.content);
        self.publish_execution_completed(scope, "completed", content, message.correlation_id())
    }

    fn on_execution_discarded(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let postponed = self.ack_postponed(scope, message);
        let is_root_scope = message.content.is_root_scope();
        if !is_root_scope && postponed.is_none() {
            return Ok(());
        }

        let error = message.content.get("error").cloned();
        let correlation_id = message.correlation_id();
        if error.is_none() && !is_root_scope {
            scope.broker.ack(message);
            if let [root] = self.postponed.as_slice() {
                if root.content.is_root_scope() {
                    let content = root.content.clone();
                    scope.broker.publish(
                        EXECUTION_EXCHANGE,
                        "execute.discard",
                        content,
                        MessageProperties::new().correlation_id(correlation_id),
                    )?;
                }
            }
            return Ok(());
        }

        scope.broker.ack_all_up_to(message);
        self.deactivate(scope);
        self.discard_sub_steps(scope)?;

        match error {
            Some(error) => self.publish_execution_completed(
                scope,
                "error",
                message.content.clone().with("error", error),
                correlation_id,
            ),
            None => self.publish_execution_completed(
                scope,
                "discard",
                message.content.clone(),
                correlation_id,
            ),
        }
    }

    /// Steps still postponed when the root step finished.
    fn discard_sub_steps(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), ActivityError> {
        let sub_steps = std::mem::take(&mut self.postponed);
        for step in sub_steps.iter() {
            publish_api(scope.broker, &ApiCommand::Discard, &step.content)?;
        }
        if let Some(behaviour) = self.behaviour.as_mut() {
            if let Err(error) = behaviour.discard(scope) {
                BehaviourFailed {
                    activity_id: &self.activity_id,
                    execution_id: self.execute_message.as_ref().and_then(|m| m.content.execution_id()).unwrap_or_default(),
                    error: &error,
                }
                .log();
            }
        }
        Ok(())
    }

    fn publish_execution_completed(
        &mut self,
        scope: &mut ActivityScope<'_>,
        completion: &str,
        content: Content,
        correlation_id: Option<String>,
    ) -> Result<(), ActivityError> {
        self.completed = true;
        ExecutionCompleted {
            activity_id: &self.activity_id,
            execution_id: content.execution_id().unwrap_or_default(),
            completion,
            is_root_scope: true,
        }
        .log();
        scope.broker.publish(
            EXECUTION_EXCHANGE,
            &format!("execution.{}", completion),
            content.with("state", completion),
            MessageProperties::new()
                .message_type(completion)
                .correlation_id(correlation_id),
        )?;
        Ok(())
    }

    fn on_parent_api_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), ActivityError> {
        let init_content = self
            .execute_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match message.message_type() {
            Some("error") => {
                let error = message.content.get("error").cloned().unwrap_or(Value::Null);
                scope.broker.queue_message(
                    EXECUTE_QUEUE,
                    "execute.error",
                    init_content.with("error", error),
                    MessageProperties::new(),
                )?;
            }
            Some("discard") => {
                scope.broker.queue_message(
                    EXECUTE_QUEUE,
                    "execute.discard",
                    init_content,
                    MessageProperties::new(),
                )?;
            }
            Some("stop") => self.on_stop(scope, message)?,
            _ => {}
        }
        Ok(())
    }

    fn on_stop(&mut self, scope: &mut ActivityScope<'_>, message: &Message) -> Result<(), ActivityError> {
        let stopped_id = message.content.execution_id();
        for step in self.postponed.iter() {
            if step.content.execution_id() != stopped_id {
                publish_api(scope.broker, &ApiCommand::Stop, &step.content)?;
            }
        }
        if let Some(behaviour) = self.behaviour.as_mut() {
            if let Err(error) = behaviour.stop(scope) {
                BehaviourFailed {
                    activity_id: &self.activity_id,
                    execution_id: stopped_id.unwrap_or_default(),
                    error: &error,
                }
                .log();
            }
        }

        scope.broker.cancel(ACTIVITY_EXECUTE_TAG);
        scope.broker.cancel(EXECUTION_API_TAG);
        Ok(())
    }
}

/// Message as handed to the behaviour: flagged when recovered, without the
/// `ignoreIfExecuting` hint.
fn execute_message_of(message: &Message) -> Message {
    let mut content = message.content.clone();
    if message.is_redelivered() {
        content.insert("isRecovered", true);
    }
    content.remove("ignoreIfExecuting");
    message.with_content(content)
}
