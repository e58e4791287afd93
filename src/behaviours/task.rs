// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::LoopCharacteristics;
use crate::broker::Message;
use crate::engine::{ActivityInfo, ActivityScope};
use crate::errors::BehaviourError;
use crate::traits::ActivityBehaviour;
use serde_json::{json, Map, Value};

/// Task, service task and script task.
///
/// Completes as soon as it executes. Behaviour parameters steer the result:
/// `output` becomes the step output and `fail` (a message or
/// `{message, code}`) makes the step fail instead. Iterations of a looped
/// task without an explicit `output` return their collection item.
#[derive(Debug, Clone)]
pub struct TaskBehaviour {
    extra: Map<String, Value>,
    loop_characteristics: Option<LoopCharacteristics>,
}

impl TaskBehaviour {
    pub fn new(activity: &ActivityInfo) -> Self {
        Self {
            extra: activity.behaviour.extra.clone(),
            loop_characteristics: LoopCharacteristics::from_activity(activity),
        }
    }
}

impl ActivityBehaviour for TaskBehaviour {
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

        if let Some(reason) = self.extra.get("fail") {
            return Err(BehaviourError::from_value(reason));
        }

        let output = self.extra.get("output").cloned().or_else(|| {
            self.loop_characteristics
                .as_ref()
                .and_then(|lc| lc.iteration_item(content))
        });
        scope.complete(content, output)?;
        Ok(())
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

    fn stop(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            lc.cancel(scope);
        }
        Ok(())
    }

    fn discard(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        self.stop(scope)
    }

    fn get_state(&self) -> Option<Value> {
        let lc = self.loop_characteristics.as_ref()?.get_state()?;
        Some(json!({ "loop": lc }))
    }

    fn recover(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        state: &Value,
    ) -> Result<(), BehaviourError> {
        match (self.loop_characteristics.as_mut(), state.get("loop")) {
            (Some(lc), Some(loop_state)) => lc.recover(loop_state),
            _ => Ok(()),
        }
    }
}
