// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sub-process: a nested process scope per execution id.
//!
//! Every step the sub-process executes (the root, or each loop iteration)
//! gets its own [`ProcessExecution`] over an isolated copy of the
//! environment. Nested executions run synchronously inside the call that
//! drives them; their completions are relayed to the activity's execution
//! exchange afterwards, a stopped nested execution is kept for a resume.

use crate::behaviours::LoopCharacteristics;
use crate::broker::{Content, Message};
use crate::config::Environment;
use crate::engine::{
    ActivityApi, ActivityInfo, ActivityScope, ApiCommand, ProcessContext, ProcessExecution,
    ProcessExecutionState,
};
use crate::errors::BehaviourError;
use crate::observability::messages::process::SubProcessRelayed;
use crate::observability::messages::StructuredLog;
use crate::traits::ActivityBehaviour;
use serde_json::{json, Map, Value};

#[derive(Debug)]
pub struct SubProcessBehaviour {
    activity_id: String,
    loop_characteristics: Option<LoopCharacteristics>,
    executions: Vec<ProcessExecution>,
}

impl SubProcessBehaviour {
    pub fn new(activity: &ActivityInfo) -> Self {
        Self {
            activity_id: activity.id.clone(),
            loop_characteristics: LoopCharacteristics::from_activity(activity),
            executions: Vec::new(),
        }
    }

    pub fn executions(&self) -> &[ProcessExecution] {
        &self.executions
    }

    fn position(&self, execution_id: &str) -> Option<usize> {
        self.executions
            .iter()
            .position(|e| e.execution_id() == execution_id)
    }

    fn nested_context(scope: &ActivityScope<'_>) -> ProcessContext {
        let outer = scope.environment();
        scope
            .context
            .with_environment(Environment::new(outer.settings(), outer.variables()))
    }

    /// Forward nested completions as step outcomes.
    fn relay(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        for execution in self.executions.iter_mut() {
            while let Some(completion) = execution.take_completion() {
                let completion_type = completion.message_type().unwrap_or_default().to_string();
                let routing_key = match completion_type.as_str() {
                    "completed" => "execute.completed",
                    "discard" => "execute.discard",
                    "error" => "execute.error",
                    _ => continue,
                };
                SubProcessRelayed {
                    activity_id: &self.activity_id,
                    execution_id: execution.execution_id(),
                    completion: &completion_type,
                }
                .log();
                let mut content = completion.content;
                content.remove("state");
                scope.publish_execution(routing_key, content)?;
            }
        }
        self.executions.retain(|e| !e.status().is_finished());
        Ok(())
    }

    /// Drop whatever the nested executions reported without relaying it.
    fn drain(&mut self) {
        for execution in self.executions.iter_mut() {
            while execution.take_completion().is_some() {}
        }
    }
}

impl ActivityBehaviour for SubProcessBehaviour {
    fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let content = &message.content;
        if content.is_root_scope() {
            if let Some(lc) = self.loop_characteristics.as_mut() {
                return lc.execute(scope, message);
            }
        }

        let execution_id = content
            .execution_id()
            .ok_or_else(|| BehaviourError::new("sub-process step without execution id"))?
            .to_string();
        let recovered = message.is_redelivered() || content.get_bool("isRecovered");

        match self.position(&execution_id) {
            Some(idx) if recovered => self.executions[idx].resume()?,
            Some(_) => return Ok(()),
            None => {
                let mut execution =
                    ProcessExecution::nested(scope.activity, &execution_id, Self::nested_context(scope));
                let mut start = content.clone();
                start.remove("isRecovered");
                execution.execute(start)?;
                self.executions.push(execution);
            }
        }
        self.relay(scope)
    }

    fn on_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        match self.loop_characteristics.as_mut() {
            Some(lc) if lc.owns(message) => lc.on_message(scope, message),
            _ => Ok(()),
        }
    }

    fn delegate_api(
        &mut self,
        scope: &mut ActivityScope<'_>,
        command: &ApiCommand,
        target: &Content,
    ) -> Result<bool, BehaviourError> {
        if target.id() == Some(self.activity_id.as_str()) {
            return Ok(false);
        }
        let Some(parent) = target.get("parent") else {
            return Ok(false);
        };

        // closest scope first, then outwards along the path
        let mut scopes: Vec<&str> = parent
            .get("executionId")
            .and_then(Value::as_str)
            .into_iter()
            .collect();
        if let Some(Value::Array(path)) = parent.get("path") {
            scopes.extend(path.iter().filter_map(|p| p.get("executionId").and_then(Value::as_str)));
        }

        let Some(idx) = scopes.iter().find_map(|id| self.position(id)) else {
            return Ok(false);
        };
        let delivered = self.executions[idx].send_api(command, target)?;
        self.relay(scope)?;
        Ok(delivered)
    }

    fn stop(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            lc.cancel(scope);
        }
        for execution in self.executions.iter_mut() {
            execution.stop()?;
        }
        self.drain();
        Ok(())
    }

    fn discard(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            lc.cancel(scope);
        }
        for execution in self.executions.iter_mut() {
            execution.discard()?;
        }
        self.drain();
        self.executions.clear();
        Ok(())
    }

    fn get_postponed(&self) -> Vec<ActivityApi> {
        self.executions
            .iter()
            .flat_map(ProcessExecution::get_postponed)
            .collect()
    }

    fn get_state(&self) -> Option<Value> {
        let mut state = Map::new();
        if !self.executions.is_empty() {
            let executions: Vec<ProcessExecutionState> =
                self.executions.iter().map(ProcessExecution::get_state).collect();
            state.insert("executions".to_string(), serde_json::to_value(executions).ok()?);
        }
        if let Some(lc) = self.loop_characteristics.as_ref().and_then(|lc| lc.get_state()) {
            state.insert("loop".to_string(), lc);
        }
        (!state.is_empty()).then(|| json!(state))
    }

    fn recover(
        &mut self,
        scope: &mut ActivityScope<'_>,
        state: &Value,
    ) -> Result<(), BehaviourError> {
        if let (Some(lc), Some(loop_state)) =
            (self.loop_characteristics.as_mut(), state.get("loop"))
        {
            lc.recover(loop_state)?;
        }

        let Some(executions) = state.get("executions") else {
            return Ok(());
        };
        let executions: Vec<ProcessExecutionState> = serde_json::from_value(executions.clone())
            .map_err(|e| BehaviourError::new(format!("invalid sub-process state: {}", e)))?;

        self.executions.clear();
        for execution_state in executions.iter() {
            let mut execution = ProcessExecution::nested(
                scope.activity,
                &execution_state.execution_id,
                Self::nested_context(scope),
            );
            execution.recover(execution_state)?;
            self.executions.push(execution);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviours::testing::message;
    use crate::broker::{Broker, MessageProperties};
    use crate::config::consts::{API_EXCHANGE, EVENT_EXCHANGE, EXECUTION_EXCHANGE};
    use crate::config::{GraphBuilder, Settings};
    use crate::engine::ProcessStatus;
    use crate::traits::GraphProvider;
    use std::sync::Arc;

    struct Fixture {
        info: ActivityInfo,
        context: ProcessContext,
        broker: Broker,
    }

    impl Fixture {
        fn new() -> Self {
            let graph = GraphBuilder::new("p")
                .sub_process("sub", |inner| {
                    inner
                        .activity("inner_start", "start_event")
                        .activity("approve", "user_task")
                        .flow("if1", "inner_start", "approve")
                })
                .build();
            let definition = graph.activity_by_id("sub").cloned().unwrap();
            let parent = Content::new()
                .with("id", "p")
                .with("type", "process")
                .with("executionId", "p_1");
            let info = ActivityInfo::from_definition(&definition, &graph, parent);
            let context = ProcessContext::new(
                Arc::new(graph),
                Environment::new(Settings::default(), Map::new()),
            );
            let mut broker = Broker::new("sub");
            for exchange in [EXECUTION_EXCHANGE, EVENT_EXCHANGE, API_EXCHANGE] {
                broker.assert_exchange(exchange);
            }
            broker.observe(EXECUTION_EXCHANGE, "#", "spy-q").unwrap();
            Self {
                info,
                context,
                broker,
            }
        }

        fn scope(&mut self) -> ActivityScope<'_> {
            ActivityScope {
                broker: &mut self.broker,
                activity: &self.info,
                context: &self.context,
            }
        }

        fn published(&mut self) -> Vec<String> {
            let mut keys = Vec::new();
            while let Some(message) = self.broker.get("spy-q") {
                keys.push(message.routing_key().to_string());
            }
            keys
        }
    }

    fn root() -> Content {
        Content::new()
            .with("id", "sub")
            .with("executionId", "sub_1")
            .with("isRootScope", true)
    }

    #[test]
    fn test_nested_wait_is_postponed_and_signal_completes() {
        let mut fixture = Fixture::new();
        let mut sub = SubProcessBehaviour::new(&fixture.info);
        sub.execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        assert!(fixture.published().is_empty());
        let postponed = sub.get_postponed();
        assert_eq!(postponed.len(), 1);
        assert_eq!(postponed[0].id(), Some("approve"));

        let target = postponed[0].content.clone();
        let delivered = sub
            .delegate_api(&mut fixture.scope(), &ApiCommand::Signal(json!("ok")), &target)
            .unwrap();
        assert!(delivered);
        assert_eq!(fixture.published(), vec!["execute.completed"]);
        assert!(sub.executions().is_empty());
    }

    #[test]
    fn test_api_for_unknown_scope_is_not_delivered() {
        let mut fixture = Fixture::new();
        let mut sub = SubProcessBehaviour::new(&fixture.info);
        sub.execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        let stranger = Content::new()
            .with("id", "approve")
            .with("executionId", "approve_x")
            .with("parent", json!({"id": "other", "executionId": "other_1"}));
        assert!(!sub
            .delegate_api(&mut fixture.scope(), &ApiCommand::Signal(json!(1)), &stranger)
            .unwrap());
    }

    #[test]
    fn test_api_aimed_at_sub_process_itself_stays_out_of_nested_scope() {
        let mut fixture = Fixture::new();
        let mut sub = SubProcessBehaviour::new(&fixture.info);
        sub.execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        let nested_parent = sub.get_postponed()[0].content.get("parent").cloned().unwrap();
        let own = root().with("parent", nested_parent);
        assert!(!sub
            .delegate_api(&mut fixture.scope(), &ApiCommand::Signal(json!("own")), &own)
            .unwrap());
        assert!(fixture.published().is_empty());
        assert_eq!(sub.get_postponed().len(), 1);
    }

    #[test]
    fn test_stop_keeps_nested_execution_for_recovery() {
        let mut fixture = Fixture::new();
        let mut sub = SubProcessBehaviour::new(&fixture.info);
        sub.execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        sub.stop(&mut fixture.scope()).unwrap();
        assert_eq!(sub.executions()[0].status(), ProcessStatus::Stopped);
        assert!(fixture.published().is_empty());

        let state = sub.get_state().unwrap();
        let mut recovered = SubProcessBehaviour::new(&fixture.info);
        recovered.recover(&mut fixture.scope(), &state).unwrap();
        let redelivered = Message::new(
            EXECUTION_EXCHANGE,
            "execute.start",
            root().with("isRecovered", true),
            MessageProperties::new(),
        );
        recovered.execute(&mut fixture.scope(), &redelivered).unwrap();
        assert_eq!(recovered.executions()[0].status(), ProcessStatus::Executing);
        assert_eq!(recovered.get_postponed().len(), 1);
    }

    #[test]
    fn test_discard_clears_nested_without_relaying() {
        let mut fixture = Fixture::new();
        let mut sub = SubProcessBehaviour::new(&fixture.info);
        sub.execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        sub.discard(&mut fixture.scope()).unwrap();
        assert!(sub.executions().is_empty());
        assert!(fixture.published().is_empty());
    }
}
