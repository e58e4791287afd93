// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod environment;
mod graph;
mod loader;
mod runtime;
mod validation;

#[cfg(test)]
mod integration_tests;
pub mod consts;

pub use environment::{Environment, EnvironmentState};
pub use graph::{GraphBuilder, ProcessGraph};
pub use loader::{
    load_and_validate_config, load_config, ActivityDefinition, BehaviourParams, Config,
    FlowDefinition, LoopCharacteristicsDefinition, ProcessDefinition, Settings,
};
pub use runtime::RuntimeBuilder;
pub use validation::validate_process;

pub(crate) use environment::walk;
