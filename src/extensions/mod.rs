// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Extension hooks attached to activities.
//!
//! An [`ExtensionsMapper`] holds extension factories. Every activity asks the
//! mapper for its own [`ActivityExtensions`] once, at construction; a factory
//! may decline an activity by returning `None`.

use crate::broker::{Content, Message};
use crate::engine::ActivityInfo;
use crate::traits::Extension;
use std::fmt;
use std::sync::Arc;

pub type ExtensionFactory = Arc<dyn Fn(&ActivityInfo) -> Option<Box<dyn Extension>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExtensionsMapper {
    factories: Vec<ExtensionFactory>,
}

impl fmt::Debug for ExtensionsMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionsMapper")
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl ExtensionsMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn(&ActivityInfo) -> Option<Box<dyn Extension>> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the extensions for one activity.
    pub fn get(&self, activity: &ActivityInfo) -> ActivityExtensions {
        ActivityExtensions {
            extensions: self
                .factories
                .iter()
                .filter_map(|factory| factory(activity))
                .collect(),
        }
    }
}

/// The extensions of one activity; calls fan out in registration order.
#[derive(Default)]
pub struct ActivityExtensions {
    extensions: Vec<Box<dyn Extension>>,
}

impl fmt::Debug for ActivityExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityExtensions")
            .field("count", &self.extensions.len())
            .finish()
    }
}

impl ActivityExtensions {
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn activate(&mut self, message: &Message) {
        for extension in self.extensions.iter_mut() {
            extension.activate(message);
        }
    }

    pub fn deactivate(&mut self, message: &Message) {
        for extension in self.extensions.iter_mut() {
            extension.deactivate(message);
        }
    }

    /// Chain the formatters; each one sees the content produced by the previous.
    pub fn format(&mut self, message: &Message) -> Result<Option<Content>, String> {
        let mut current: Option<Message> = None;
        for extension in self.extensions.iter_mut() {
            let input = current.as_ref().unwrap_or(message);
            if let Some(content) = extension.format(input)? {
                current = Some(input.with_content(content));
            }
        }
        Ok(current.map(|m| m.content))
    }
}
