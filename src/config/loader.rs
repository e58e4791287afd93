// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::BehaviourFactory;
use crate::config::consts::DEFAULT_BATCH_SIZE;
use crate::config::validate_process;
use crate::errors::ConfigError;
use crate::flows::Condition;
use crate::observability::messages::config::{ConfigLoaded, GraphValidationFailed};
use crate::observability::messages::StructuredLog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Top-level configuration: engine settings, initial variables and the process graph.
///
/// # Example
/// ```yaml
/// settings:
///   step: false
///   batch_size: 50
/// variables:
///   amount: 120
/// process:
///   id: approval
///   activities:
///     - id: start
///       type: start_event
///     - id: decide
///       type: exclusive_gateway
///     - id: manual
///       type: user_task
///     - id: auto
///       type: task
///   flows:
///     - { id: f0, source: start, target: decide }
///     - { id: f1, source: decide, target: manual, condition: "${variables.amount} > 100" }
///     - { id: f2, source: decide, target: auto, default: true }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub process: ProcessDefinition,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Engine settings shared through the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Run messages are held until `next()` acknowledges them
    #[serde(default)]
    pub step: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            step: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// One process scope. Sub-processes nest their own scope inside an activity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityDefinition>,
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

impl ProcessDefinition {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            activities: Vec::new(),
            flows: Vec::new(),
        }
    }
}

/// Immutable description of a single activity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActivityDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub behaviour: BehaviourParams,
    /// Nested activities of a sub-process
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<ActivityDefinition>,
    /// Nested flows of a sub-process
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<FlowDefinition>,
}

impl ActivityDefinition {
    pub fn new(id: &str, activity_type: &str) -> Self {
        Self {
            id: id.to_string(),
            activity_type: activity_type.to_string(),
            name: None,
            behaviour: BehaviourParams::default(),
            activities: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_behaviour(mut self, behaviour: BehaviourParams) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn is_multi_instance(&self) -> bool {
        self.behaviour.loop_characteristics.is_some()
    }
}

/// Behaviour parameters; unknown keys are kept in `extra` and carried into messages.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BehaviourParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_characteristics: Option<LoopCharacteristicsDefinition>,
    /// Host activity of a boundary event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
    /// Interrupting boundary event; defaults to true when attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_activity: Option<bool>,
    #[serde(default)]
    pub is_for_compensation: bool,
    #[serde(default)]
    pub triggered_by_event: bool,
    #[serde(default)]
    pub is_transaction: bool,
    /// Boundary event that catches errors thrown by its host
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub catch_error: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BehaviourParams {
    pub fn attached_to(host: &str) -> Self {
        Self {
            attached_to: Some(host.to_string()),
            ..Self::default()
        }
    }

    pub fn with_loop(mut self, characteristics: LoopCharacteristicsDefinition) -> Self {
        self.loop_characteristics = Some(characteristics);
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn cancels_activity(&self) -> bool {
        self.cancel_activity.unwrap_or(true)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Multi-instance settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoopCharacteristicsDefinition {
    #[serde(default)]
    pub is_sequential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_cardinality: Option<usize>,
    /// Environment variable holding an array to iterate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Name under which the current collection item is exposed to the iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_variable: Option<String>,
}

/// Edge between two activities of the same scope.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlowDefinition {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, rename = "default")]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl FlowDefinition {
    pub fn new(id: &str, source: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            is_default: false,
            condition: None,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Load a config from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = Config::from_yaml_str(&content)?;

    ConfigLoaded {
        path: &path.display().to_string(),
        process_id: &cfg.process.id,
        activity_count: cfg.process.activities.len(),
        flow_count: cfg.process.flows.len(),
    }
    .log();
    Ok(cfg)
}

/// Load a config and validate its process graph against the default behaviours.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let cfg = load_config(path)?;

    if let Err(errors) = validate_process(&cfg.process, &BehaviourFactory::with_defaults()) {
        for error in errors.iter() {
            GraphValidationFailed { error }.log();
        }
        return Err(ConfigError::Invalid(errors));
    }

    Ok(cfg)
}
