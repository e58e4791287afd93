// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::activity_types;
use crate::config::{ActivityDefinition, FlowDefinition, ProcessDefinition};
use crate::flows::Condition;
use crate::traits::{GraphProvider, StartFilter};
use std::collections::HashMap;

/// Flattened, indexed view of a process definition and all its nested scopes.
#[derive(Debug, Clone)]
pub struct ProcessGraph {
    process_id: String,
    activities: Vec<(String, ActivityDefinition)>,
    flows: Vec<(String, FlowDefinition)>,
    activity_index: HashMap<String, usize>,
    flow_scopes: HashMap<String, usize>,
}

impl ProcessGraph {
    pub fn from_definition(definition: &ProcessDefinition) -> Self {
        let mut graph = Self {
            process_id: definition.id.clone(),
            activities: Vec::new(),
            flows: Vec::new(),
            activity_index: HashMap::new(),
            flow_scopes: HashMap::new(),
        };
        graph.add_scope(&definition.id, &definition.activities, &definition.flows);
        graph
    }

    fn add_scope(
        &mut self,
        scope_id: &str,
        activities: &[ActivityDefinition],
        flows: &[FlowDefinition],
    ) {
        for activity in activities {
            // first definition wins; duplicates are reported by validation
            self.activity_index
                .entry(activity.id.clone())
                .or_insert(self.activities.len());
            self.activities.push((scope_id.to_string(), activity.clone()));
        }
        for flow in flows {
            self.flow_scopes
                .entry(flow.id.clone())
                .or_insert(self.flows.len());
            self.flows.push((scope_id.to_string(), flow.clone()));
        }
        for activity in activities {
            if !activity.activities.is_empty() || !activity.flows.is_empty() {
                self.add_scope(&activity.id, &activity.activities, &activity.flows);
            }
        }
    }

    pub fn activity_count(&self) -> usize {
        self.activities.len()
    }

    fn is_start(&self, activity: &ActivityDefinition) -> bool {
        let params = &activity.behaviour;
        params.attached_to.is_none()
            && !params.triggered_by_event
            && !params.is_for_compensation
            && self.inbound_flows(&activity.id).is_empty()
    }
}

impl GraphProvider for ProcessGraph {
    fn process_id(&self) -> &str {
        &self.process_id
    }

    fn activity_by_id(&self, id: &str) -> Option<&ActivityDefinition> {
        self.activity_index
            .get(id)
            .map(|&idx| &self.activities[idx].1)
    }

    fn scope_of(&self, id: &str) -> Option<&str> {
        if let Some(&idx) = self.activity_index.get(id) {
            return Some(&self.activities[idx].0);
        }
        self.flow_scopes.get(id).map(|&idx| self.flows[idx].0.as_str())
    }

    fn activities(&self, scope_id: &str) -> Vec<&ActivityDefinition> {
        self.activities
            .iter()
            .filter(|(scope, _)| scope == scope_id)
            .map(|(_, activity)| activity)
            .collect()
    }

    fn inbound_flows(&self, activity_id: &str) -> Vec<&FlowDefinition> {
        self.flows
            .iter()
            .map(|(_, flow)| flow)
            .filter(|flow| flow.target == activity_id)
            .collect()
    }

    fn outbound_flows(&self, activity_id: &str) -> Vec<&FlowDefinition> {
        self.flows
            .iter()
            .map(|(_, flow)| flow)
            .filter(|flow| flow.source == activity_id)
            .collect()
    }

    fn start_activities(&self, filter: &StartFilter, scope_id: &str) -> Vec<&ActivityDefinition> {
        self.activities(scope_id)
            .into_iter()
            .filter(|activity| match &filter.id {
                Some(id) => &activity.id == id,
                None => true,
            })
            .filter(|activity| self.is_start(activity))
            .collect()
    }

    fn attached_activities(&self, host_id: &str) -> Vec<&ActivityDefinition> {
        self.activities
            .iter()
            .map(|(_, activity)| activity)
            .filter(|activity| activity.behaviour.attached_to.as_deref() == Some(host_id))
            .collect()
    }
}

/// Programmatic process definition builder.
///
/// # Examples
///
/// ```
/// use activity_engine::config::GraphBuilder;
/// use activity_engine::traits::GraphProvider;
///
/// let graph = GraphBuilder::new("p")
///     .activity("start", "start_event")
///     .activity("task", "task")
///     .flow("f1", "start", "task")
///     .build();
///
/// assert_eq!(graph.outbound_flows("start").len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    definition: ProcessDefinition,
}

impl GraphBuilder {
    pub fn new(process_id: &str) -> Self {
        Self {
            definition: ProcessDefinition::new(process_id),
        }
    }

    pub fn activity(self, id: &str, activity_type: &str) -> Self {
        self.activity_with(ActivityDefinition::new(id, activity_type))
    }

    pub fn activity_with(mut self, activity: ActivityDefinition) -> Self {
        self.definition.activities.push(activity);
        self
    }

    /// Add a sub-process whose scope is filled in by `build`.
    pub fn sub_process<F>(self, id: &str, build: F) -> Self
    where
        F: FnOnce(GraphBuilder) -> GraphBuilder,
    {
        self.sub_process_with(ActivityDefinition::new(id, activity_types::SUB_PROCESS), build)
    }

    pub fn sub_process_with<F>(mut self, mut activity: ActivityDefinition, build: F) -> Self
    where
        F: FnOnce(GraphBuilder) -> GraphBuilder,
    {
        let scope = build(GraphBuilder::new(&activity.id)).definition;
        activity.activities = scope.activities;
        activity.flows = scope.flows;
        self.definition.activities.push(activity);
        self
    }

    pub fn flow(self, id: &str, source: &str, target: &str) -> Self {
        self.flow_with(FlowDefinition::new(id, source, target))
    }

    pub fn default_flow(self, id: &str, source: &str, target: &str) -> Self {
        self.flow_with(FlowDefinition::new(id, source, target).as_default())
    }

    pub fn conditional_flow(self, id: &str, source: &str, target: &str, expression: &str) -> Self {
        self.flow_with(
            FlowDefinition::new(id, source, target)
                .with_condition(Condition::Expression(expression.to_string())),
        )
    }

    pub fn flow_with(mut self, flow: FlowDefinition) -> Self {
        self.definition.flows.push(flow);
        self
    }

    pub fn definition(self) -> ProcessDefinition {
        self.definition
    }

    pub fn build(self) -> ProcessGraph {
        ProcessGraph::from_definition(&self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviourParams;

    fn graph() -> ProcessGraph {
        GraphBuilder::new("main")
            .activity("start", "start_event")
            .activity("task", "task")
            .activity_with(
                ActivityDefinition::new("timer", "boundary_event")
                    .with_behaviour(BehaviourParams::attached_to("task")),
            )
            .sub_process("sub", |scope| {
                scope
                    .activity("sub_start", "start_event")
                    .activity("sub_task", "task")
                    .flow("sf1", "sub_start", "sub_task")
            })
            .activity("end", "end_event")
            .flow("f1", "start", "task")
            .flow("f2", "task", "sub")
            .flow("f3", "sub", "end")
            .flow("f4", "timer", "end")
            .build()
    }

    #[test]
    fn test_nested_scopes_are_indexed() {
        let graph = graph();
        assert_eq!(graph.activity_count(), 7);
        assert_eq!(graph.scope_of("sub_task"), Some("sub"));
        assert_eq!(graph.scope_of("sf1"), Some("sub"));
        assert_eq!(graph.scope_of("task"), Some("main"));
        assert_eq!(graph.activities("sub").len(), 2);
    }

    #[test]
    fn test_start_activities_skip_attached_and_inbound() {
        let graph = graph();
        let starts: Vec<&str> = graph
            .start_activities(&StartFilter::all(), "main")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(starts, vec!["start"]);

        let nested: Vec<&str> = graph
            .start_activities(&StartFilter::all(), "sub")
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(nested, vec!["sub_start"]);
        assert!(graph
            .start_activities(&StartFilter::by_id("task"), "main")
            .is_empty());
    }

    #[test]
    fn test_flow_lookups() {
        let graph = graph();
        assert_eq!(graph.inbound_flows("end").len(), 2);
        assert_eq!(graph.outbound_flows("task")[0].id, "f2");
        assert_eq!(graph.attached_activities("task")[0].id, "timer");
        assert!(graph.activity_by_id("nope").is_none());
    }
}
