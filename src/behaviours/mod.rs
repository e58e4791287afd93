// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Built-in activity behaviours and the registry that creates them.

mod events;
mod factory;
mod gateways;
mod loop_characteristics;
mod signal_wait;
mod sub_process;
mod task;
mod user_task;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{BoundaryEventBehaviour, EventBehaviour};
pub use factory::{BehaviourConstructor, BehaviourFactory};
pub use gateways::{GatewayBehaviour, GatewayKind};
pub use loop_characteristics::{LoopCharacteristics, LoopState};
pub use signal_wait::SignalWait;
pub use sub_process::SubProcessBehaviour;
pub use task::TaskBehaviour;
pub use user_task::UserTaskBehaviour;
