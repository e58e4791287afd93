// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::SignalWait;
use crate::broker::Message;
use crate::engine::ActivityScope;
use crate::errors::BehaviourError;
use crate::traits::ActivityBehaviour;
use serde_json::Value;

/// Start and end events pass straight through.
#[derive(Debug, Clone, Default)]
pub struct EventBehaviour;

impl ActivityBehaviour for EventBehaviour {
    fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        scope.complete(&message.content, None)?;
        Ok(())
    }
}

/// Boundary event attached to a host activity.
///
/// Runs when its host enters and waits for a signal. The process signals an
/// error-catching boundary with `{"error": ..}` when its host fails. On
/// completion an interrupting boundary (`cancel_activity`, the default) has
/// its host discarded by the process.
#[derive(Debug, Clone, Default)]
pub struct BoundaryEventBehaviour {
    wait: SignalWait,
}

impl BoundaryEventBehaviour {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityBehaviour for BoundaryEventBehaviour {
    fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        self.wait.wait(scope, message)
    }

    fn on_message(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        if self.wait.owns(message) {
            return self.wait.on_api_message(scope, message);
        }
        Ok(())
    }

    fn stop(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        self.wait.suspend(scope);
        Ok(())
    }

    fn discard(&mut self, scope: &mut ActivityScope<'_>) -> Result<(), BehaviourError> {
        self.wait.cancel_all(scope);
        Ok(())
    }

    fn get_state(&self) -> Option<Value> {
        self.wait.get_state()
    }

    fn recover(
        &mut self,
        _scope: &mut ActivityScope<'_>,
        state: &Value,
    ) -> Result<(), BehaviourError> {
        self.wait.recover(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviours::testing::{message, ScopeFixture};
    use crate::broker::Content;
    use crate::config::consts::activity_types;
    use crate::engine::{publish_api, ActivityInfo, ApiCommand};
    use serde_json::json;

    #[test]
    fn test_event_completes_immediately() {
        let mut fixture = ScopeFixture::new(ActivityInfo::detached("start", activity_types::START_EVENT));
        let content = Content::new().with("executionId", "start_1").with("isRootScope", true);

        EventBehaviour
            .execute(&mut fixture.scope(), &message("execute.start", content))
            .unwrap();

        let completed = fixture.published("execute.completed");
        assert_eq!(completed.len(), 1);
        assert!(completed[0].content.get("output").is_none());
    }

    #[test]
    fn test_boundary_discard_releases_wait() {
        let mut fixture =
            ScopeFixture::new(ActivityInfo::detached("timeout", activity_types::BOUNDARY_EVENT));
        let mut boundary = BoundaryEventBehaviour::new();
        let content = Content::new().with("executionId", "timeout_1").with("isRootScope", true);
        boundary
            .execute(&mut fixture.scope(), &message("execute.start", content.clone()))
            .unwrap();
        assert!(boundary.get_state().is_some());

        publish_api(&mut fixture.broker, &ApiCommand::Discard, &content).unwrap();
        while let Some(delivery) = fixture.next_delivery() {
            boundary.on_message(&mut fixture.scope(), &delivery).unwrap();
        }

        assert!(boundary.get_state().is_none());
        // root discard is answered by the execution controller
        assert!(fixture.published("execute.discard").is_empty());
    }

    #[test]
    fn test_boundary_signal_completes_with_payload() {
        let mut fixture =
            ScopeFixture::new(ActivityInfo::detached("catch", activity_types::BOUNDARY_EVENT));
        let mut boundary = BoundaryEventBehaviour::new();
        let content = Content::new().with("executionId", "catch_1").with("isRootScope", true);
        boundary
            .execute(&mut fixture.scope(), &message("execute.start", content.clone()))
            .unwrap();

        publish_api(
            &mut fixture.broker,
            &ApiCommand::Signal(json!({"error": {"message": "boom"}})),
            &content,
        )
        .unwrap();
        while let Some(delivery) = fixture.next_delivery() {
            boundary.on_message(&mut fixture.scope(), &delivery).unwrap();
        }

        let completed = fixture.published("execute.completed");
        assert_eq!(
            completed[0].content.get("output"),
            Some(&json!({"error": {"message": "boom"}}))
        );
    }
}
