// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Outbound flow evaluation.
//!
//! Flows are evaluated one at a time in definition order with the default flow
//! moved last:
//!
//! * a default flow, or a flow without condition, is taken without evaluation
//! * a conditional flow is taken when its condition result is truthy
//! * once a flow was taken and `discard_rest_at_take` is set, every remaining
//!   flow is discarded without evaluation
//! * once a flow was taken, a default flow that comes next is discarded
//!
//! Having flows but taking none of them is a gateway deadlock and fails the
//! evaluation with [`FlowError::NoConditionalFlowTaken`].

use crate::broker::Content;
use crate::config::Environment;
use crate::errors::FlowError;
use crate::flows::condition::{is_truthy, ConditionScope};
use crate::flows::{Condition, SequenceFlow};
use crate::observability::messages::activity::FlowEvaluated;
use crate::observability::messages::StructuredLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowAction {
    Take,
    Discard,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowAction::Take => "take",
            FlowAction::Discard => "discard",
        }
    }

    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "take" => Some(FlowAction::Take),
            "discard" => Some(FlowAction::Discard),
            _ => None,
        }
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one outbound flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDecision {
    pub id: String,
    pub action: FlowAction,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<String>,
    /// Message payload of the triggering content, re-attached when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FlowDecision {
    pub fn new(id: &str, action: FlowAction, is_default: bool) -> Self {
        Self {
            id: id.to_string(),
            action,
            is_default,
            result: None,
            evaluation_id: None,
            message: None,
        }
    }

    pub fn to_content(&self) -> Content {
        serde_json::to_value(self)
            .map(Content::from)
            .unwrap_or_default()
    }

    pub fn from_content(content: &Content) -> Option<Self> {
        serde_json::from_value(content.clone().into_value()).ok()
    }
}

#[derive(Debug, Clone)]
struct OutboundFlow {
    id: String,
    is_default: bool,
    condition: Option<Condition>,
}

/// Stateless evaluator over one activity's outbound flows.
///
/// # Examples
///
/// ```
/// use activity_engine::broker::Content;
/// use activity_engine::config::{Environment, FlowDefinition};
/// use activity_engine::flows::{Condition, FlowAction, OutboundEvaluator, SequenceFlow};
///
/// let flows = vec![
///     SequenceFlow::new(
///         &FlowDefinition::new("f1", "a", "b").with_condition(Condition::Expression("false".into())),
///         None,
///     ),
///     SequenceFlow::new(&FlowDefinition::new("f2", "a", "c").as_default(), None),
/// ];
/// let evaluator = OutboundEvaluator::new("a", &flows);
///
/// let decisions = evaluator
///     .evaluate(&Content::new(), &Environment::default(), false)
///     .unwrap();
///
/// assert_eq!(decisions[0].action, FlowAction::Discard);
/// assert_eq!(decisions[1].action, FlowAction::Take);
/// assert!(decisions[1].is_default);
/// ```
#[derive(Debug, Clone)]
pub struct OutboundEvaluator {
    activity_id: String,
    flows: Vec<OutboundFlow>,
}

impl OutboundEvaluator {
    pub fn new(activity_id: &str, flows: &[SequenceFlow]) -> Self {
        let mut ordered: Vec<OutboundFlow> = flows
            .iter()
            .map(|flow| OutboundFlow {
                id: flow.id().to_string(),
                is_default: flow.is_default(),
                condition: flow.condition().cloned(),
            })
            .collect();
        if let Some(idx) = ordered.iter().position(|f| f.is_default) {
            let default_flow = ordered.remove(idx);
            ordered.push(default_flow);
        }
        Self {
            activity_id: activity_id.to_string(),
            flows: ordered,
        }
    }

    /// Evaluation order, default flow last
    pub fn flow_ids(&self) -> Vec<&str> {
        self.flows.iter().map(|f| f.id.as_str()).collect()
    }

    pub fn evaluate(
        &self,
        from: &Content,
        environment: &Environment,
        discard_rest_at_take: bool,
    ) -> Result<Vec<FlowDecision>, FlowError> {
        if self.flows.is_empty() {
            return Ok(Vec::new());
        }

        let evaluation_id = from.execution_id().map(str::to_string);
        let scope = ConditionScope {
            content: from,
            environment,
        };

        let mut decisions: Vec<FlowDecision> = Vec::with_capacity(self.flows.len());
        let mut taken = 0usize;
        let mut remaining = self.flows.iter();
        let mut next = remaining.next();

        while let Some(flow) = next {
            let decision = self.evaluate_flow(flow, &scope, evaluation_id.as_deref())?;
            if decision.action == FlowAction::Take {
                taken += 1;
            }
            decisions.push(decision);

            next = remaining.next();
            let Some(upcoming) = next else {
                break;
            };
            if taken > 0 && discard_rest_at_take {
                decisions.push(FlowDecision::new(&upcoming.id, FlowAction::Discard, upcoming.is_default));
                decisions.extend(
                    remaining
                        .by_ref()
                        .map(|f| FlowDecision::new(&f.id, FlowAction::Discard, f.is_default)),
                );
                break;
            }
            if taken > 0 && upcoming.is_default {
                decisions.push(FlowDecision::new(&upcoming.id, FlowAction::Discard, true));
                break;
            }
        }

        if taken == 0 {
            return Err(FlowError::NoConditionalFlowTaken {
                activity_id: self.activity_id.clone(),
            });
        }

        if let Some(message) = from.get("message") {
            for decision in decisions.iter_mut() {
                decision.message = Some(message.clone());
            }
        }
        Ok(decisions)
    }

    fn evaluate_flow(
        &self,
        flow: &OutboundFlow,
        scope: &ConditionScope,
        evaluation_id: Option<&str>,
    ) -> Result<FlowDecision, FlowError> {
        let condition = match (&flow.condition, flow.is_default) {
            (Some(condition), false) => condition,
            _ => return Ok(FlowDecision::new(&flow.id, FlowAction::Take, flow.is_default)),
        };

        let result = condition.evaluate(&flow.id, scope)?;
        let truthy = is_truthy(&result);
        FlowEvaluated {
            activity_id: &self.activity_id,
            evaluation_id: evaluation_id.unwrap_or(""),
            flow_id: &flow.id,
            result: truthy,
        }
        .log();

        let action = if truthy {
            FlowAction::Take
        } else {
            FlowAction::Discard
        };
        let mut decision = FlowDecision::new(&flow.id, action, false);
        decision.result = Some(result);
        decision.evaluation_id = evaluation_id.map(str::to_string);
        Ok(decision)
    }
}
