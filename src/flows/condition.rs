// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sequence flow conditions.
//!
//! A condition is either an expression string or a structured flag test:
//!
//! ```yaml
//! condition: "true"
//! condition: "${variables.approved}"
//! condition: "!${content.output.rejected}"
//! condition: "${variables.amount} >= 100"
//! condition: { flag: variables.approved, op: "==", value: true }
//! ```
//!
//! Paths are dotted and rooted at `content` (the triggering message),
//! `variables`, `output` or `settings`. A bare name is looked up in `variables`.

use crate::broker::Content;
use crate::config::{walk, Environment};
use crate::errors::FlowError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Expression(String),
    Flag(FlagCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagCondition {
    pub flag: String,
    #[serde(default)]
    pub op: Comparison,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Neq),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Lte),
            ">=" => Some(Self::Gte),
            _ => None,
        }
    }

    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => loose_eq(left, right),
            Self::Neq => !loose_eq(left, right),
            Self::Lt => compare(left, right) == Some(Ordering::Less),
            Self::Gt => compare(left, right) == Some(Ordering::Greater),
            Self::Lte => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
            Self::Gte => matches!(
                compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Truthiness of a resolved value; missing values resolve to `null`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// What a condition can see.
pub struct ConditionScope<'a> {
    pub content: &'a Content,
    pub environment: &'a Environment,
}

impl ConditionScope<'_> {
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let path = path.strip_prefix("environment.").unwrap_or(path);
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (path, None),
        };
        match root {
            "content" => walk(
                self.content.clone().into_value(),
                rest.into_iter().flat_map(|r| r.split('.')),
            ),
            "variables" | "output" | "settings" => self.environment.resolve(path),
            _ => self.environment.resolve(&format!("variables.{}", path)),
        }
    }
}

fn single_operand() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(!)?\s*\$\{\s*([^}]+?)\s*\}$").ok())
        .as_ref()
}

fn comparison() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$\{\s*([^}]+?)\s*\}\s*(==|!=|<=|>=|<|>)\s*(.+)$").ok())
        .as_ref()
}

impl Condition {
    /// Evaluate to a raw result; the flow is taken when the result [is truthy](is_truthy).
    pub fn evaluate(&self, flow_id: &str, scope: &ConditionScope) -> Result<Value, FlowError> {
        match self {
            Condition::Flag(flag) => {
                let current = scope.resolve(&flag.flag).unwrap_or(Value::Null);
                Ok(Value::Bool(flag.op.apply(&current, &flag.value)))
            }
            Condition::Expression(expression) => evaluate_expression(flow_id, expression, scope),
        }
    }
}

fn evaluate_expression(
    flow_id: &str,
    expression: &str,
    scope: &ConditionScope,
) -> Result<Value, FlowError> {
    let expression = expression.trim();
    let invalid = |reason: &str| FlowError::InvalidCondition {
        flow_id: flow_id.to_string(),
        expression: expression.to_string(),
        reason: reason.to_string(),
    };

    match expression {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    if let Some(captures) = single_operand().and_then(|re| re.captures(expression)) {
        let value = scope.resolve(&captures[2]).unwrap_or(Value::Null);
        return Ok(if captures.get(1).is_some() {
            Value::Bool(!is_truthy(&value))
        } else {
            value
        });
    }

    if let Some(captures) = comparison().and_then(|re| re.captures(expression)) {
        let left = scope.resolve(&captures[1]).unwrap_or(Value::Null);
        let op = Comparison::parse(&captures[2]).ok_or_else(|| invalid("unknown operator"))?;
        let right = parse_operand(captures[3].trim(), scope)
            .ok_or_else(|| invalid("right operand is neither a reference nor a literal"))?;
        return Ok(Value::Bool(op.apply(&left, &right)));
    }

    Err(invalid("unsupported expression"))
}

fn parse_operand(operand: &str, scope: &ConditionScope) -> Option<Value> {
    if let Some(captures) = single_operand().and_then(|re| re.captures(operand)) {
        if captures.get(1).is_none() {
            return Some(scope.resolve(&captures[2]).unwrap_or(Value::Null));
        }
    }
    if let Ok(literal) = serde_json::from_str::<Value>(operand) {
        return Some(literal);
    }
    operand
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| Value::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;

    fn env() -> Environment {
        Environment::new(
            Settings::default(),
            json!({"amount": 120, "approved": true, "name": "x", "empty": ""})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
    }

    fn eval(expression: &str, content: &Content) -> Result<Value, FlowError> {
        let env = env();
        let scope = ConditionScope {
            content,
            environment: &env,
        };
        Condition::Expression(expression.to_string()).evaluate("f1", &scope)
    }

    #[test]
    fn test_literals() {
        let content = Content::new();
        assert_eq!(eval("true", &content).unwrap(), json!(true));
        assert_eq!(eval(" false ", &content).unwrap(), json!(false));
    }

    #[test]
    fn test_references_return_raw_values() {
        let content = Content::from(json!({"output": {"decision": "yes"}}));
        assert_eq!(eval("${content.output.decision}", &content).unwrap(), json!("yes"));
        assert_eq!(eval("${approved}", &content).unwrap(), json!(true));
        assert_eq!(eval("${variables.missing}", &content).unwrap(), Value::Null);
        assert_eq!(eval("!${variables.empty}", &content).unwrap(), json!(true));
    }

    #[test]
    fn test_comparisons() {
        let content = Content::from(json!({"score": 3}));
        assert_eq!(eval("${variables.amount} > 100", &content).unwrap(), json!(true));
        assert_eq!(eval("${variables.amount} <= 100", &content).unwrap(), json!(false));
        assert_eq!(eval("${variables.name} == 'x'", &content).unwrap(), json!(true));
        assert_eq!(eval("${variables.name} != \"x\"", &content).unwrap(), json!(false));
        assert_eq!(
            eval("${content.score} < ${variables.amount}", &content).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_invalid_expression() {
        let result = eval("amount > 1", &Content::new());
        assert!(matches!(result, Err(FlowError::InvalidCondition { .. })));
        let result = eval("${amount} > nonsense", &Content::new());
        assert!(matches!(result, Err(FlowError::InvalidCondition { .. })));
    }

    #[test]
    fn test_flag_condition() {
        let env = env();
        let content = Content::new();
        let scope = ConditionScope {
            content: &content,
            environment: &env,
        };
        let condition = Condition::Flag(FlagCondition {
            flag: "variables.amount".into(),
            op: Comparison::Gt,
            value: json!(200),
        });
        assert_eq!(condition.evaluate("f1", &scope).unwrap(), json!(false));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!(0.5)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(!is_truthy(&Value::Null));
    }
}
