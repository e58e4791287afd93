// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structural validation of process definitions.
//!
//! Checks run over every scope of the definition and accumulate all errors:
//!
//! 1. **Uniqueness**: activity and flow ids are unique across the whole definition
//! 2. **Types**: every activity type has a registered behaviour
//! 3. **Flow endpoints**: source and target exist and live in the flow's own scope
//! 4. **Defaults**: at most one default flow leaves an activity
//! 5. **Attachments**: boundary activities reference an existing host

use crate::behaviours::BehaviourFactory;
use crate::config::{ActivityDefinition, FlowDefinition, ProcessDefinition};
use crate::errors::ValidationError;
use std::collections::{HashMap, HashSet};

/// Validate a process definition against the behaviours available in `factory`.
///
/// # Examples
///
/// ```
/// use activity_engine::behaviours::BehaviourFactory;
/// use activity_engine::config::{validate_process, GraphBuilder};
///
/// let definition = GraphBuilder::new("p")
///     .activity("a", "task")
///     .flow("f1", "a", "missing")
///     .definition();
///
/// let errors = validate_process(&definition, &BehaviourFactory::with_defaults()).unwrap_err();
/// assert_eq!(errors.len(), 1);
/// ```
pub fn validate_process(
    definition: &ProcessDefinition,
    factory: &BehaviourFactory,
) -> Result<(), Vec<ValidationError>> {
    let mut scopes: Vec<Scope> = Vec::new();
    collect_scopes(&definition.id, &definition.activities, &definition.flows, &mut scopes);

    let mut errors = Vec::new();
    validate_unique_ids(&scopes, &mut errors);
    validate_activity_types(&scopes, factory, &mut errors);
    validate_flow_endpoints(&scopes, &mut errors);
    validate_default_flows(&scopes, &mut errors);
    validate_attachments(&scopes, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct Scope<'a> {
    id: &'a str,
    activities: &'a [ActivityDefinition],
    flows: &'a [FlowDefinition],
}

fn collect_scopes<'a>(
    id: &'a str,
    activities: &'a [ActivityDefinition],
    flows: &'a [FlowDefinition],
    scopes: &mut Vec<Scope<'a>>,
) {
    scopes.push(Scope {
        id,
        activities,
        flows,
    });
    for activity in activities {
        if !activity.activities.is_empty() || !activity.flows.is_empty() {
            collect_scopes(&activity.id, &activity.activities, &activity.flows, scopes);
        }
    }
}

fn validate_unique_ids(scopes: &[Scope], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for scope in scopes {
        let ids = scope
            .activities
            .iter()
            .map(|a| &a.id)
            .chain(scope.flows.iter().map(|f| &f.id));
        for id in ids {
            if !seen.insert(id) {
                errors.push(ValidationError::DuplicateId {
                    element_id: id.clone(),
                });
            }
        }
    }
}

fn validate_activity_types(
    scopes: &[Scope],
    factory: &BehaviourFactory,
    errors: &mut Vec<ValidationError>,
) {
    for activity in scopes.iter().flat_map(|s| s.activities.iter()) {
        if !factory.is_type_available(&activity.activity_type) {
            errors.push(ValidationError::UnknownActivityType {
                activity_id: activity.id.clone(),
                activity_type: activity.activity_type.clone(),
            });
        }
    }
}

fn validate_flow_endpoints(scopes: &[Scope], errors: &mut Vec<ValidationError>) {
    let mut activity_scope: HashMap<&str, &str> = HashMap::new();
    for scope in scopes {
        for activity in scope.activities {
            activity_scope.entry(&activity.id).or_insert(scope.id);
        }
    }

    for scope in scopes {
        for flow in scope.flows {
            for endpoint in [&flow.source, &flow.target] {
                match activity_scope.get(endpoint.as_str()) {
                    None => errors.push(ValidationError::UnresolvedFlowEndpoint {
                        flow_id: flow.id.clone(),
                        missing_activity: endpoint.clone(),
                    }),
                    Some(found) if *found != scope.id => {
                        errors.push(ValidationError::CrossScopeFlow {
                            flow_id: flow.id.clone(),
                            source_scope: scope.id.to_string(),
                            target_scope: found.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

fn validate_default_flows(scopes: &[Scope], errors: &mut Vec<ValidationError>) {
    for scope in scopes {
        let mut defaults: Vec<(&str, Vec<String>)> = Vec::new();
        for flow in scope.flows.iter().filter(|f| f.is_default) {
            match defaults.iter_mut().find(|(source, _)| *source == flow.source) {
                Some((_, ids)) => ids.push(flow.id.clone()),
                None => defaults.push((flow.source.as_str(), vec![flow.id.clone()])),
            }
        }
        for (source, flow_ids) in defaults {
            if flow_ids.len() > 1 {
                errors.push(ValidationError::MultipleDefaultFlows {
                    activity_id: source.to_string(),
                    flow_ids,
                });
            }
        }
    }
}

fn validate_attachments(scopes: &[Scope], errors: &mut Vec<ValidationError>) {
    for scope in scopes {
        for activity in scope.activities {
            if let Some(host) = &activity.behaviour.attached_to {
                if !scope.activities.iter().any(|a| &a.id == host) {
                    errors.push(ValidationError::UnresolvedAttachment {
                        activity_id: activity.id.clone(),
                        attached_to: host.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BehaviourParams, GraphBuilder};

    fn validate(definition: &ProcessDefinition) -> Result<(), Vec<ValidationError>> {
        validate_process(definition, &BehaviourFactory::with_defaults())
    }

    #[test]
    fn test_valid_definition() {
        let definition = GraphBuilder::new("p")
            .activity("start", "start_event")
            .activity("gw", "exclusive_gateway")
            .activity("a", "task")
            .activity("b", "task")
            .flow("f0", "start", "gw")
            .conditional_flow("f1", "gw", "a", "${variables.go}")
            .default_flow("f2", "gw", "b")
            .definition();
        assert!(validate(&definition).is_ok());
    }

    #[test]
    fn test_duplicate_ids_across_scopes() {
        let definition = GraphBuilder::new("p")
            .activity("a", "task")
            .sub_process("sub", |s| s.activity("a", "task"))
            .definition();
        let errors = validate(&definition).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateId {
                element_id: "a".into()
            }]
        );
    }

    #[test]
    fn test_cross_scope_flow_rejected() {
        let definition = GraphBuilder::new("p")
            .activity("a", "task")
            .sub_process("sub", |s| s.activity("inner", "task"))
            .flow("f1", "a", "inner")
            .definition();
        let errors = validate(&definition).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::CrossScopeFlow { ref flow_id, .. } if flow_id == "f1"
        ));
    }

    #[test]
    fn test_multiple_defaults_rejected() {
        let definition = GraphBuilder::new("p")
            .activity("gw", "exclusive_gateway")
            .activity("a", "task")
            .activity("b", "task")
            .default_flow("f1", "gw", "a")
            .default_flow("f2", "gw", "b")
            .definition();
        let errors = validate(&definition).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::MultipleDefaultFlows {
                activity_id: "gw".into(),
                flow_ids: vec!["f1".into(), "f2".into()],
            }]
        );
    }

    #[test]
    fn test_unresolved_attachment_and_unknown_type() {
        let definition = GraphBuilder::new("p")
            .activity_with(
                ActivityDefinition::new("timer", "boundary_event")
                    .with_behaviour(BehaviourParams::attached_to("ghost")),
            )
            .activity("x", "no_such_type")
            .definition();
        let errors = validate(&definition).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ValidationError::UnresolvedAttachment {
            activity_id: "timer".into(),
            attached_to: "ghost".into(),
        }));
    }
}
