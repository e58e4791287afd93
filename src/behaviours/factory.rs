// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::behaviours::{
    BoundaryEventBehaviour, EventBehaviour, GatewayBehaviour, GatewayKind, SubProcessBehaviour,
    TaskBehaviour, UserTaskBehaviour,
};
use crate::config::consts::activity_types;
use crate::engine::{ActivityInfo, ProcessContext};
use crate::errors::ActivityError;
use crate::traits::ActivityBehaviour;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type BehaviourConstructor =
    Arc<dyn Fn(&ActivityInfo, &ProcessContext) -> Box<dyn ActivityBehaviour> + Send + Sync>;

/// Registry of behaviour constructors keyed by activity type.
///
/// [`BehaviourFactory::with_defaults`] registers the built-in types:
/// - `task`, `service_task`, `script_task` -> [`TaskBehaviour`]
/// - `user_task` -> [`UserTaskBehaviour`]
/// - `start_event`, `end_event` -> [`EventBehaviour`]
/// - `boundary_event` -> [`BoundaryEventBehaviour`]
/// - `exclusive_gateway`, `inclusive_gateway`, `parallel_gateway` -> [`GatewayBehaviour`]
/// - `sub_process` -> [`SubProcessBehaviour`]
///
/// Registering an existing type replaces its constructor.
#[derive(Clone, Default)]
pub struct BehaviourFactory {
    constructors: BTreeMap<String, BehaviourConstructor>,
}

impl fmt::Debug for BehaviourFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviourFactory")
            .field("types", &self.list_available_types())
            .finish()
    }
}

impl BehaviourFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        for task in [
            activity_types::TASK,
            activity_types::SERVICE_TASK,
            activity_types::SCRIPT_TASK,
        ] {
            factory.register(task, |info, _| Box::new(TaskBehaviour::new(info)));
        }
        factory.register(activity_types::USER_TASK, |info, _| {
            Box::new(UserTaskBehaviour::new(info))
        });
        for event in [activity_types::START_EVENT, activity_types::END_EVENT] {
            factory.register(event, |_, _| Box::new(EventBehaviour));
        }
        factory.register(activity_types::BOUNDARY_EVENT, |_, _| {
            Box::new(BoundaryEventBehaviour::new())
        });
        factory.register(activity_types::EXCLUSIVE_GATEWAY, |_, _| {
            Box::new(GatewayBehaviour::new(GatewayKind::Exclusive))
        });
        factory.register(activity_types::INCLUSIVE_GATEWAY, |_, _| {
            Box::new(GatewayBehaviour::new(GatewayKind::Inclusive))
        });
        factory.register(activity_types::PARALLEL_GATEWAY, |_, _| {
            Box::new(GatewayBehaviour::new(GatewayKind::Parallel))
        });
        factory.register(activity_types::SUB_PROCESS, |info, _| {
            Box::new(SubProcessBehaviour::new(info))
        });
        factory
    }

    pub fn register<F>(&mut self, activity_type: &str, constructor: F)
    where
        F: Fn(&ActivityInfo, &ProcessContext) -> Box<dyn ActivityBehaviour> + Send + Sync + 'static,
    {
        self.constructors
            .insert(activity_type.to_string(), Arc::new(constructor));
    }

    /// Create the behaviour for one activity execution.
    pub fn create(
        &self,
        activity: &ActivityInfo,
        context: &ProcessContext,
    ) -> Result<Box<dyn ActivityBehaviour>, ActivityError> {
        let constructor = self.constructors.get(&activity.activity_type).ok_or_else(|| {
            ActivityError::UnknownBehaviour {
                activity_id: activity.id.clone(),
                activity_type: activity.activity_type.clone(),
            }
        })?;
        Ok(constructor(activity, context))
    }

    pub fn list_available_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn is_type_available(&self, activity_type: &str) -> bool {
        self.constructors.contains_key(activity_type)
    }
}
