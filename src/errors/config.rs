// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use thiserror::Error;

/// Errors that can occur during process graph validation
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Two elements in the same definition share an id
    DuplicateId {
        /// The duplicated element id
        element_id: String,
    },
    /// A flow references an activity that doesn't exist
    UnresolvedFlowEndpoint {
        /// The flow with the dangling reference
        flow_id: String,
        /// The activity id that couldn't be resolved
        missing_activity: String,
    },
    /// A flow connects activities that live in different scopes
    CrossScopeFlow {
        flow_id: String,
        source_scope: String,
        target_scope: String,
    },
    /// More than one default flow leaves the same activity
    MultipleDefaultFlows {
        /// The activity with several default flows
        activity_id: String,
        /// The offending flow ids
        flow_ids: Vec<String>,
    },
    /// Activity type has no registered behaviour
    UnknownActivityType {
        activity_id: String,
        activity_type: String,
    },
    /// A boundary activity is attached to an activity that doesn't exist
    UnresolvedAttachment {
        activity_id: String,
        attached_to: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateId { element_id } => {
                write!(f, "Duplicate element ID: '{}'", element_id)
            }
            ValidationError::UnresolvedFlowEndpoint {
                flow_id,
                missing_activity,
            } => {
                write!(
                    f,
                    "Flow '{}' references activity '{}' which does not exist",
                    flow_id, missing_activity
                )
            }
            ValidationError::CrossScopeFlow {
                flow_id,
                source_scope,
                target_scope,
            } => {
                write!(
                    f,
                    "Flow '{}' crosses scopes: source in '{}', target in '{}'",
                    flow_id, source_scope, target_scope
                )
            }
            ValidationError::MultipleDefaultFlows {
                activity_id,
                flow_ids,
            } => {
                write!(
                    f,
                    "Activity '{}' has more than one default flow: [{}]",
                    activity_id,
                    flow_ids.join(", ")
                )
            }
            ValidationError::UnknownActivityType {
                activity_id,
                activity_type,
            } => {
                write!(
                    f,
                    "Activity '{}' has type '{}' which has no registered behaviour",
                    activity_id, activity_type
                )
            }
            ValidationError::UnresolvedAttachment {
                activity_id,
                attached_to,
            } => {
                write!(
                    f,
                    "Activity '{}' is attached to '{}' which does not exist",
                    activity_id, attached_to
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors while loading configuration from disk
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config is invalid: {}", format_validation(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
