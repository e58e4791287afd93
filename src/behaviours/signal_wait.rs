// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Content, Message};
use crate::engine::ActivityScope;
use crate::errors::BehaviourError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Steps parked until an API command arrives for their execution id.
#[derive(Debug, Clone, Default)]
pub struct SignalWait {
    waiting: BTreeMap<String, Content>,
}

fn api_tag(execution_id: &str) -> String {
    format!("_api-{}", execution_id)
}

impl SignalWait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Park a step and announce it with a `wait` event.
    ///
    /// Recovered steps only resubscribe; their wait was announced before.
    pub fn wait(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let content = &message.content;
        let execution_id = content
            .execution_id()
            .ok_or_else(|| BehaviourError::new("cannot wait without an execution id"))?
            .to_string();

        let mut parked = content.clone();
        parked.remove("isRecovered");
        self.waiting.insert(execution_id.clone(), parked.clone());
        scope.subscribe_api(&execution_id, &api_tag(&execution_id))?;

        if message.is_redelivered() || content.get_bool("isRecovered") {
            return Ok(());
        }
        scope.publish_event("wait", parked)?;
        Ok(())
    }

    /// True when the delivery was for one of the parked steps.
    pub fn owns(&self, message: &Message) -> bool {
        let Some(tag) = message.fields.consumer_tag.as_deref() else {
            return false;
        };
        self.waiting.keys().any(|id| api_tag(id) == tag)
    }

    pub fn on_api_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let Some(execution_id) = message.content.execution_id().map(str::to_string) else {
            return Ok(());
        };
        let Some(parked) = self.waiting.get(&execution_id).cloned() else {
            return Ok(());
        };

        match message.message_type() {
            Some("signal") => {
                self.release(scope, &execution_id);
                let payload = message.content.get("message").cloned().unwrap_or(Value::Null);
                scope.complete(&parked, Some(payload))?;
            }
            // the execution controller answers root discard and error itself
            Some("discard") => {
                self.release(scope, &execution_id);
                if !parked.is_root_scope() {
                    scope.discard(&parked)?;
                }
            }
            Some("error") => {
                self.release(scope, &execution_id);
                if !parked.is_root_scope() {
                    let error = message.content.get("error").cloned().unwrap_or(Value::Null);
                    scope.fail(&parked, &BehaviourError::from_value(&error))?;
                }
            }
            Some("stop") => self.release(scope, &execution_id),
            _ => {}
        }
        Ok(())
    }

    /// Drop every subscription, keeping nothing parked.
    pub fn cancel_all(&mut self, scope: &mut ActivityScope<'_>) {
        for execution_id in self.waiting.keys() {
            scope.cancel(&api_tag(execution_id));
        }
        self.waiting.clear();
    }

    /// Drop the subscriptions but remember the parked steps for a resume.
    pub fn suspend(&mut self, scope: &mut ActivityScope<'_>) {
        for execution_id in self.waiting.keys() {
            scope.cancel(&api_tag(execution_id));
        }
    }

    pub fn get_state(&self) -> Option<Value> {
        if self.waiting.is_empty() {
            return None;
        }
        serde_json::to_value(&self.waiting).ok()
    }

    pub fn recover(&mut self, state: &Value) -> Result<(), BehaviourError> {
        self.waiting = serde_json::from_value(state.clone())
            .map_err(|e| BehaviourError::new(format!("invalid wait state: {}", e)))?;
        Ok(())
    }

    fn release(&mut self, scope: &mut ActivityScope<'_>, execution_id: &str) {
        scope.cancel(&api_tag(execution_id));
        self.waiting.remove(execution_id);
    }
}
