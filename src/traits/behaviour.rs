// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Content, Message};
use crate::engine::{ActivityApi, ActivityScope, ApiCommand};
use crate::errors::BehaviourError;
use serde_json::Value;

/// The type-specific part of an activity.
///
/// A behaviour is created once per activity execution by the
/// [`BehaviourFactory`](crate::behaviours::BehaviourFactory). It receives the
/// root execute message and every sub-step message it started, and reports
/// back by publishing `execute.completed`, `execute.discard` or
/// `execute.error` on the activity's `execution` exchange through the scope.
///
/// Errors returned from any method are captured by the execution controller
/// and republished as `execute.error`.
pub trait ActivityBehaviour: Send {
    fn execute(&mut self, scope: &mut ActivityScope<'_>, message: &Message)
        -> Result<(), BehaviourError>;

    /// Delivery for a consumer the behaviour registered itself.
    fn on_message(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        _message: &Message,
    ) -> Result<(), BehaviourError> {
        Ok(())
    }

    /// Route an API command to a step owned by a nested execution.
    ///
    /// Returns `Ok(true)` when the target was found.
    fn delegate_api(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        _command: &ApiCommand,
        _target: &Content,
    ) -> Result<bool, BehaviourError> {
        Ok(false)
    }

    fn stop(&mut self, _scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        Ok(())
    }

    fn discard(&mut self, _scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        Ok(())
    }

    /// Steps waiting inside nested executions.
    fn get_postponed(&self) -> Vec<ActivityApi> {
        Vec::new()
    }

    fn get_state(&self) -> Option<Value> {
        None
    }

    fn recover(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        _state: &Value,
    ) -> Result<(), BehaviourError> {
        Ok(())
    }
}
