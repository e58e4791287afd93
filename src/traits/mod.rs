// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod behaviour;
pub mod extension;
pub mod graph;

pub use behaviour::ActivityBehaviour;
pub use extension::Extension;
pub use graph::{GraphProvider, StartFilter};
