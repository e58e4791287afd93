// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Multi-instance loops.
//!
//! The root execute message of a looped activity is handed to
//! [`LoopCharacteristics::execute`]. Iterations are published as non-root
//! `execute.start` messages with execution id `<root>_<index>`, so the
//! execution controller tracks each one as a postponed step and the
//! behaviour executes them like any other step. The loop listens on the
//! execution exchange ahead of the controller, records iteration outputs and
//! completes the root once every iteration is done.

use crate::broker::{ConsumeOptions, Content, Message};
use crate::config::consts::{EXECUTION_EXCHANGE, LOOP_PRIORITY};
use crate::config::LoopCharacteristicsDefinition;
use crate::engine::{ActivityInfo, ActivityScope};
use crate::errors::BehaviourError;
use crate::observability::messages::process::LoopIterationStarted;
use crate::observability::messages::StructuredLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_ELEMENT_VARIABLE: &str = "item";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub root: Content,
    pub cardinality: usize,
    pub next_index: usize,
    pub running: usize,
    pub completed: usize,
    pub outputs: Vec<Value>,
}

impl LoopState {
    fn root_execution_id(&self) -> &str {
        self.root.execution_id().unwrap_or_default()
    }

    fn iteration_id(&self, index: usize) -> String {
        format!("{}_{}", self.root_execution_id(), index)
    }
}

#[derive(Debug, Clone)]
pub struct LoopCharacteristics {
    activity_id: String,
    definition: LoopCharacteristicsDefinition,
    state: Option<LoopState>,
}

impl LoopCharacteristics {
    /// Loop of a multi-instance activity, `None` for everything else.
    pub fn from_activity(activity: &ActivityInfo) -> Option<Self> {
        let definition = activity.behaviour.loop_characteristics.clone()?;
        Some(Self {
            activity_id: activity.id.clone(),
            definition,
            state: None,
        })
    }

    pub fn is_sequential(&self) -> bool {
        self.definition.is_sequential
    }

    pub fn state(&self) -> Option<&LoopState> {
        self.state.as_ref()
    }

    fn consumer_tag(&self) -> Option<String> {
        self.state
            .as_ref()
            .map(|s| format!("_loop-{}", s.root_execution_id()))
    }

    /// True when the delivery is for the loop's own subscription.
    pub fn owns(&self, message: &Message) -> bool {
        self.consumer_tag().is_some()
            && message.fields.consumer_tag == self.consumer_tag()
    }

    /// Collection item an iteration runs for.
    pub fn iteration_item(&self, content: &Content) -> Option<Value> {
        let name = self
            .definition
            .element_variable
            .as_deref()
            .unwrap_or(DEFAULT_ELEMENT_VARIABLE);
        content.get(name).cloned()
    }

    /// Start looping for a root execute message.
    pub fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let content = &message.content;
        let execution_id = content
            .execution_id()
            .ok_or_else(|| BehaviourError::new("loop requires an execution id"))?
            .to_string();

        let recovered = message.is_redelivered() || content.get_bool("isRecovered");
        if recovered
            && self
                .state
                .as_ref()
                .is_some_and(|s| s.root_execution_id() == execution_id)
        {
            return self.subscribe(scope);
        }

        let cardinality = self.cardinality(scope)?;
        let mut root = content.clone();
        root.remove("isRecovered");
        root.remove("preventComplete");

        if cardinality == 0 {
            return Ok(scope.complete(&root, Some(Value::Array(Vec::new())))?);
        }

        self.state = Some(LoopState {
            root: root.clone(),
            cardinality,
            next_index: 0,
            running: 0,
            completed: 0,
            outputs: vec![Value::Null; cardinality],
        });
        self.subscribe(scope)?;
        scope.publish_execution(
            "execute.iteration.next",
            root.with("preventComplete", true),
        )?;
        self.start_next(scope)
    }

    /// Iteration bookkeeping for deliveries on the loop subscription.
    pub fn on_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let content = &message.content;
        let index = content
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize);
        let is_iteration = !content.is_root_scope()
            && index.is_some_and(|i| {
                i < state.cardinality && content.execution_id() == Some(state.iteration_id(i).as_str())
            });

        match message.routing_key() {
            "execute.completed" if is_iteration => {
                let Some(index) = index else {
                    return Ok(());
                };
                state.outputs[index] = content.get("output").cloned().unwrap_or(Value::Null);
                state.completed += 1;
                state.running = state.running.saturating_sub(1);

                if state.completed < state.cardinality {
                    return self.start_next(scope);
                }
                let root = state.root.clone();
                let outputs = std::mem::take(&mut state.outputs);
                self.cancel(scope);
                self.state = None;
                scope.complete(&root, Some(Value::Array(outputs)))?;
            }
            "execute.error" | "execute.discard" if is_iteration || content.is_root_scope() => {
                self.cancel(scope);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn cancel(&mut self, scope: &mut ActivityScope<'_>) {
        if let Some(tag) = self.consumer_tag() {
            scope.cancel(&tag);
        }
    }

    pub fn get_state(&self) -> Option<Value> {
        self.state
            .as_ref()
            .and_then(|s| serde_json::to_value(s).ok())
    }

    pub fn recover(&mut self, state: &Value) -> Result<(), BehaviourError> {
        let state: LoopState = serde_json::from_value(state.clone())
            .map_err(|e| BehaviourError::new(format!("invalid loop state: {}", e)))?;
        self.state = Some(state);
        Ok(())
    }

    fn subscribe(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        let Some(tag) = self.consumer_tag() else {
            return Ok(());
        };
        scope.broker.subscribe_tmp(
            EXECUTION_EXCHANGE,
            "execute.#",
            ConsumeOptions::new(tag).no_ack().priority(LOOP_PRIORITY),
        )?;
        Ok(())
    }

    fn cardinality(&self, scope: &ActivityScope<'_>) -> Result<usize, BehaviourError> {
        if let Some(collection) = &self.definition.collection {
            return match scope.environment().variable(collection) {
                Some(Value::Array(items)) => Ok(items.len()),
                _ => Err(BehaviourError::new(format!(
                    "loop collection '{}' is not an array",
                    collection
                ))
                .with_code("loop")),
            };
        }
        self.definition.loop_cardinality.ok_or_else(|| {
            BehaviourError::new("loop requires a cardinality or a collection").with_code("loop")
        })
    }

    fn start_next(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        let batch_size = if self.is_sequential() {
            1
        } else {
            scope.settings().batch_size.max(1)
        };
        loop {
            let Some(state) = self.state.as_ref() else {
                return Ok(());
            };
            if state.next_index >= state.cardinality || state.running >= batch_size {
                return Ok(());
            }
            let index = state.next_index;
            self.start_iteration(scope, index)?;
        }
    }

    fn start_iteration(
        &mut self,
        scope: &mut ActivityScope<'_>,
        index: usize,
    ) -> Result<(), BehaviourError> {
        let item = match &self.definition.collection {
            Some(collection) => scope
                .environment()
                .variable(collection)
                .and_then(|items| items.get(index).cloned()),
            None => None,
        };
        let element_variable = self
            .definition
            .element_variable
            .clone()
            .unwrap_or_else(|| DEFAULT_ELEMENT_VARIABLE.to_string());

        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let execution_id = state.iteration_id(index);
        let mut content = state.root.clone();
        content.remove("isRootScope");
        content.remove("preventComplete");
        content.insert("executionId", execution_id.as_str());
        content.insert("isMultiInstance", true);
        content.insert("index", index);
        content.insert("loopCardinality", state.cardinality);
        if let Some(item) = item {
            content.insert(element_variable, item);
        }
        state.next_index += 1;
        state.running += 1;

        LoopIterationStarted {
            activity_id: &self.activity_id,
            execution_id: &execution_id,
            index,
            cardinality: state.cardinality,
        }
        .log();
        scope.publish_execution("execute.start", content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviours::testing::{message, ScopeFixture};
    use crate::config::consts::activity_types;
    use serde_json::{json, Map};

    fn looped(definition: LoopCharacteristicsDefinition, variables: Map<String, Value>) -> ScopeFixture {
        let mut info = ActivityInfo::detached("x", activity_types::TASK);
        info.behaviour.loop_characteristics = Some(definition);
        ScopeFixture::with_variables(info, variables)
    }

    fn root() -> Content {
        Content::new()
            .with("id", "x")
            .with("executionId", "x_1")
            .with("isRootScope", true)
    }

    fn iteration_completed(index: usize, output: Value) -> Content {
        Content::new()
            .with("id", "x")
            .with("executionId", format!("x_1_{}", index))
            .with("index", index)
            .with("output", output)
    }

    fn deliver(fixture: &mut ScopeFixture, characteristics: &mut LoopCharacteristics) {
        while let Some(delivery) = fixture.next_delivery() {
            if characteristics.owns(&delivery) {
                characteristics
                    .on_message(&mut fixture.scope(), &delivery)
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_plain_activity_has_no_loop() {
        let info = ActivityInfo::detached("x", activity_types::TASK);
        assert!(LoopCharacteristics::from_activity(&info).is_none());
    }

    #[test]
    fn test_missing_cardinality_fails_with_loop_code() {
        let mut fixture = looped(LoopCharacteristicsDefinition::default(), Map::new());
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();

        let err = characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("loop"));
        assert!(characteristics.state().is_none());
    }

    #[test]
    fn test_collection_must_be_an_array() {
        let mut variables = Map::new();
        variables.insert("lines".into(), json!("widget"));
        let definition = LoopCharacteristicsDefinition {
            collection: Some("lines".into()),
            ..Default::default()
        };
        let mut fixture = looped(definition, variables);
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();

        let err = characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("loop"));
    }

    #[test]
    fn test_sequential_loop_starts_one_iteration_at_a_time() {
        let definition = LoopCharacteristicsDefinition {
            is_sequential: true,
            loop_cardinality: Some(3),
            ..Default::default()
        };
        let mut fixture = looped(definition, Map::new());
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();
        assert!(characteristics.is_sequential());

        characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        let started = fixture.published("execute.start");
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].content.execution_id(), Some("x_1_0"));
        assert_eq!(started[0].content.get("index"), Some(&json!(0)));
        assert!(!started[0].content.is_root_scope());
        assert_eq!(fixture.published("execute.iteration.next").len(), 1);

        fixture
            .scope()
            .publish_execution("execute.completed", iteration_completed(0, json!("first")))
            .unwrap();
        deliver(&mut fixture, &mut characteristics);

        let started = fixture.published("execute.start");
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].content.execution_id(), Some("x_1_1"));
        assert_eq!(characteristics.state().map(|s| s.completed), Some(1));
    }

    #[test]
    fn test_parallel_collection_completes_root_with_ordered_outputs() {
        let mut variables = Map::new();
        variables.insert("lines".into(), json!(["widget", "gadget"]));
        let definition = LoopCharacteristicsDefinition {
            collection: Some("lines".into()),
            element_variable: Some("line".into()),
            ..Default::default()
        };
        let mut fixture = looped(definition, variables);
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();

        characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        let started = fixture.published("execute.start");
        assert_eq!(started.len(), 2);
        assert_eq!(characteristics.iteration_item(&started[1].content), Some(json!("gadget")));

        for (index, output) in [(1, "packed gadget"), (0, "packed widget")] {
            fixture
                .scope()
                .publish_execution("execute.completed", iteration_completed(index, json!(output)))
                .unwrap();
        }
        deliver(&mut fixture, &mut characteristics);

        let completed: Vec<Message> = fixture
            .published("execute.completed")
            .into_iter()
            .filter(|m| m.content.is_root_scope())
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].content.execution_id(), Some("x_1"));
        assert_eq!(
            completed[0].content.get("output"),
            Some(&json!(["packed widget", "packed gadget"]))
        );
        assert!(characteristics.state().is_none());
    }

    #[test]
    fn test_empty_collection_completes_immediately() {
        let mut variables = Map::new();
        variables.insert("lines".into(), json!([]));
        let definition = LoopCharacteristicsDefinition {
            collection: Some("lines".into()),
            ..Default::default()
        };
        let mut fixture = looped(definition, variables);
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();

        characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();

        let completed = fixture.published("execute.completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].content.get("output"), Some(&json!([])));
        assert!(fixture.published("execute.start").is_empty());
    }

    #[test]
    fn test_recovered_state_resumes_iteration_count() {
        let definition = LoopCharacteristicsDefinition {
            is_sequential: true,
            loop_cardinality: Some(2),
            ..Default::default()
        };
        let mut fixture = looped(definition, Map::new());
        let mut characteristics = LoopCharacteristics::from_activity(&fixture.info).unwrap();
        characteristics
            .execute(&mut fixture.scope(), &message("execute.start", root()))
            .unwrap();
        let state = characteristics.get_state().unwrap();

        let mut recovered = LoopCharacteristics::from_activity(&fixture.info).unwrap();
        recovered.recover(&state).unwrap();

        assert_eq!(recovered.state(), characteristics.state());
        assert!(recovered.recover(&json!("garbage")).is_err());
    }
}
