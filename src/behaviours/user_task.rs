// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::{LoopCharacteristics, SignalWait};
use crate::broker::Message;
use crate::engine::{ActivityInfo, ActivityScope};
use crate::errors::BehaviourError;
use crate::traits::ActivityBehaviour;
use serde_json::{json, Map, Value};

/// Waits for a `signal` addressed to its execution id and completes with the
/// signal payload as output.
#[derive(Debug, Clone)]
pub struct UserTaskBehaviour {
    wait: SignalWait,
    loop_characteristics: Option<LoopCharacteristics>,
}

impl UserTaskBehaviour {
    pub fn new(activity: &ActivityInfo) -> Self {
        Self {
            wait: SignalWait::new(),
            loop_characteristics: LoopCharacteristics::from_activity(activity),
        }
    }
}

impl ActivityBehaviour for UserTaskBehaviour {
    fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        if message.content.is_root_scope() {
            if let Some(lc) = self.loop_characteristics.as_mut() {
                return lc.execute(scope, message);
            }
        }
        self.wait.wait(scope, message)
    }

    fn on_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            if lc.owns(message) {
                return lc.on_message(scope, message);
            }
        }
        if self.wait.owns(message) {
            return self.wait.on_api_message(scope, message);
        }
        Ok(())
    }

    fn stop(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            lc.cancel(scope);
        }
        self.wait.suspend(scope);
        Ok(())
    }

    fn discard(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        if let Some(lc) = self.loop_characteristics.as_mut() {
            lc.cancel(scope);
        }
        self.wait.cancel_all(scope);
        Ok(())
    }

    fn get_state(&self) -> Option<Value> {
        let mut state = Map::new();
        if let Some(waiting) = self.wait.get_state() {
            state.insert("waiting".to_string(), waiting);
        }
        if let Some(lc) = self.loop_characteristics.as_ref().and_then(|lc| lc.get_state()) {
            state.insert("loop".to_string(), lc);
        }
        (!state.is_empty()).then(|| json!(state))
    }

    fn recover(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        state: &Value,
    ) -> Result<(), BehaviourError> {
        if let Some(waiting) = state.get("waiting") {
            self.wait.recover(waiting)?;
        }
        if let (Some(lc), Some(loop_state)) =
            (self.loop_characteristics.as_mut(), state.get("loop"))
        {
            lc.recover(loop_state)?;
        }
        Ok(())
    }
}
