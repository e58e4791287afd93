// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::{ActivityDefinition, FlowDefinition};

/// Narrows the result of [`GraphProvider::start_activities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartFilter {
    /// Only this activity, if it is a start activity of the scope
    pub id: Option<String>,
}

impl StartFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
        }
    }
}

/// Read-only lookups over a loaded process graph.
///
/// Scopes are identified by the process id for the top level and by the
/// sub-process activity id for nested scopes.
pub trait GraphProvider: Send + Sync {
    fn process_id(&self) -> &str;

    fn activity_by_id(&self, id: &str) -> Option<&ActivityDefinition>;

    /// Scope the activity or flow lives in
    fn scope_of(&self, id: &str) -> Option<&str>;

    /// Activities of a scope in definition order
    fn activities(&self, scope_id: &str) -> Vec<&ActivityDefinition>;

    fn inbound_flows(&self, activity_id: &str) -> Vec<&FlowDefinition>;

    fn outbound_flows(&self, activity_id: &str) -> Vec<&FlowDefinition>;

    /// Activities that start a scope: no inbound flows, not attached, not event triggered,
    /// not for compensation.
    fn start_activities(&self, filter: &StartFilter, scope_id: &str) -> Vec<&ActivityDefinition>;

    /// Boundary activities attached to `host_id`
    fn attached_activities(&self, host_id: &str) -> Vec<&ActivityDefinition>;
}
