// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for outbound flow evaluation.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// Gateway deadlock: flows exist but none was taken
    #[error("<{activity_id}> no conditional flow taken")]
    NoConditionalFlowTaken { activity_id: String },

    /// A condition expression could not be parsed or resolved
    #[error("flow <{flow_id}> condition '{expression}' is invalid: {reason}")]
    InvalidCondition {
        flow_id: String,
        expression: String,
        reason: String,
    },
}
