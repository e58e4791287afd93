// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::Settings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Serializable environment content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub settings: Settings,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub output: Map<String, Value>,
}

/// Settings, variables and output shared by every activity of one process scope.
///
/// Clones share the same storage; nested scopes get their own copy through
/// [`Environment::clone_isolated`].
///
/// # Examples
///
/// ```
/// use activity_engine::config::{Environment, Settings};
/// use serde_json::json;
///
/// let env = Environment::new(Settings::default(), Default::default());
/// env.set_variable("amount", json!(10));
///
/// let nested = env.clone_isolated();
/// nested.set_variable("amount", json!(20));
///
/// assert_eq!(env.resolve("variables.amount"), Some(json!(10)));
/// assert_eq!(nested.resolve("variables.amount"), Some(json!(20)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Environment {
    inner: Arc<RwLock<EnvironmentState>>,
}

impl Environment {
    pub fn new(settings: Settings, variables: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EnvironmentState {
                settings,
                variables,
                output: Map::new(),
            })),
        }
    }

    // A poisoned lock only means a panicking writer; the map itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, EnvironmentState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EnvironmentState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> Settings {
        self.read().settings
    }

    pub fn variables(&self) -> Map<String, Value> {
        self.read().variables.clone()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.read().variables.get(name).cloned()
    }

    pub fn set_variable(&self, name: &str, value: Value) {
        self.write().variables.insert(name.to_string(), value);
    }

    pub fn output(&self) -> Map<String, Value> {
        self.read().output.clone()
    }

    pub fn set_output(&self, key: &str, value: Value) {
        self.write().output.insert(key.to_string(), value);
    }

    /// Resolve a dotted path rooted at `variables`, `output` or `settings`.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let state = self.read();
        let start = match root {
            "variables" => Value::Object(state.variables.clone()),
            "output" => Value::Object(state.output.clone()),
            "settings" => serde_json::to_value(state.settings).ok()?,
            _ => return None,
        };
        drop(state);
        walk(start, segments)
    }

    /// Independent copy for a nested scope
    pub fn clone_isolated(&self) -> Self {
        Self {
            inner: Arc::new(RwLock::new(self.read().clone())),
        }
    }

    pub fn get_state(&self) -> EnvironmentState {
        self.read().clone()
    }

    pub fn recover(&self, state: &EnvironmentState) {
        *self.write() = state.clone();
    }
}

/// Follow object keys and array indexes.
pub(crate) fn walk<'a>(start: Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = start;
    for segment in segments {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let idx: usize = segment.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(current)
}
