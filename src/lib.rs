// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod behaviours;    // built-in activity behaviours
pub mod broker;        // in-memory topic message fabric
pub mod config;        // config + runtime builder
pub mod engine;        // activity lifecycle and process scopes
pub mod errors;        // error handling
pub mod extensions;
pub mod flows;         // sequence flows and outbound evaluation
pub mod observability;
pub mod runtime;       // async process runner
pub mod traits;        // behaviour, extension and graph seams
pub mod utils;
