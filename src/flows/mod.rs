// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sequence flows and outbound evaluation.

pub mod condition;
mod outbound;
mod sequence_flow;

pub use condition::{Comparison, Condition, ConditionScope, FlagCondition};
pub use outbound::{FlowAction, FlowDecision, OutboundEvaluator};
pub use sequence_flow::{
    discard_sequence_of, FlowCounters, SequenceFlow, SequenceFlowState, SEQUENCE_FLOW_TYPE,
};
