// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod activity;
mod broker;
mod config;
mod flow;
mod runtime;

pub use activity::{ActivityError, BehaviourError};
pub use broker::BrokerError;
pub use config::{ConfigError, ValidationError};
pub use flow::FlowError;
pub use runtime::RuntimeError;
