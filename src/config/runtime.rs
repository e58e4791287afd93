// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::BehaviourFactory;
use crate::broker::Content;
use crate::config::{validate_process, Config, Environment, ProcessGraph};
use crate::engine::{ProcessContext, ProcessEvent};
use crate::errors::{ConfigError, RuntimeError};
use crate::extensions::ExtensionsMapper;
use crate::runtime::ProcessRunner;
use crate::utils::unique_id;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Process runtime builder - turns a configuration into a runnable process.
///
/// The builder owns the behaviour registry and extension hooks, validates the
/// configured process against that registry and wires graph, environment,
/// behaviours and extensions into a [`ProcessContext`].
///
/// # Examples
///
/// ```
/// use activity_engine::config::{Config, RuntimeBuilder};
///
/// let config = Config::from_yaml_str(r#"
/// variables:
///   amount: 10
/// process:
///   id: hello
///   activities:
///     - { id: start, type: start_event }
///     - { id: end, type: end_event }
///   flows:
///     - { id: f1, source: start, target: end }
/// "#).unwrap();
///
/// let context = RuntimeBuilder::from_config(&config).unwrap();
/// assert_eq!(context.graph.process_id(), "hello");
/// assert_eq!(context.environment.variable("amount"), Some(serde_json::json!(10)));
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    behaviours: BehaviourFactory,
    extensions: ExtensionsMapper,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            behaviours: BehaviourFactory::with_defaults(),
            extensions: ExtensionsMapper::new(),
        }
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a process context with the built-in behaviours.
    pub fn from_config(cfg: &Config) -> Result<ProcessContext, ConfigError> {
        Self::new().build(cfg)
    }

    pub fn with_behaviours(mut self, behaviours: BehaviourFactory) -> Self {
        self.behaviours = behaviours;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionsMapper) -> Self {
        self.extensions = extensions;
        self
    }

    /// Validate `cfg` against the registered behaviours and build its context.
    pub fn build(&self, cfg: &Config) -> Result<ProcessContext, ConfigError> {
        validate_process(&cfg.process, &self.behaviours).map_err(ConfigError::Invalid)?;

        let graph = ProcessGraph::from_definition(&cfg.process);
        let environment = Environment::new(cfg.settings, cfg.variables.clone());
        Ok(ProcessContext::new(Arc::new(graph), environment)
            .with_behaviours(self.behaviours.clone())
            .with_extensions(self.extensions.clone()))
    }

    /// Build the context and start the process on a [`ProcessRunner`].
    ///
    /// The execution id is minted from the process id.
    pub fn spawn(
        &self,
        cfg: &Config,
        input: Content,
    ) -> Result<(ProcessRunner, UnboundedReceiver<ProcessEvent>), RuntimeError> {
        let context = self.build(cfg)?;
        let execution_id = unique_id(&cfg.process.id);
        Ok(ProcessRunner::spawn(context, &execution_id, input))
    }
}
