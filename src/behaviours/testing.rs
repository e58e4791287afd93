// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bare broker and context for driving a behaviour without an activity.

use crate::broker::{Broker, Content, Message, MessageProperties};
use crate::config::consts::{API_EXCHANGE, EVENT_EXCHANGE, EXECUTION_EXCHANGE};
use crate::config::{Environment, GraphBuilder, Settings};
use crate::engine::{ActivityInfo, ActivityScope, ProcessContext};
use serde_json::{Map, Value};
use std::sync::Arc;

const SPY_QUEUE: &str = "spy-q";

pub struct ScopeFixture {
    pub info: ActivityInfo,
    pub broker: Broker,
    pub context: ProcessContext,
    seen: Vec<Message>,
}

impl ScopeFixture {
    pub fn new(info: ActivityInfo) -> Self {
        Self::with_variables(info, Map::new())
    }

    pub fn with_variables(info: ActivityInfo, variables: Map<String, Value>) -> Self {
        let graph = GraphBuilder::new("p").build();
        let context = ProcessContext::new(
            Arc::new(graph),
            Environment::new(Settings::default(), variables),
        );
        let mut broker = Broker::new(&info.id);
        for exchange in [EXECUTION_EXCHANGE, EVENT_EXCHANGE, API_EXCHANGE] {
            broker.assert_exchange(exchange);
        }
        broker.observe(EXECUTION_EXCHANGE, "#", SPY_QUEUE).unwrap();
        broker.observe(EVENT_EXCHANGE, "#", SPY_QUEUE).unwrap();
        Self {
            info,
            broker,
            context,
            seen: Vec::new(),
        }
    }

    pub fn scope(&mut self) -> ActivityScope<'_> {
        ActivityScope {
            broker: &mut self.broker,
            activity: &self.info,
            context: &self.context,
        }
    }

    /// Everything published so far with `routing_key`.
    pub fn published(&mut self, routing_key: &str) -> Vec<Message> {
        while let Some(message) = self.broker.get(SPY_QUEUE) {
            self.seen.push(message);
        }
        self.seen
            .iter()
            .filter(|m| m.routing_key() == routing_key)
            .cloned()
            .collect()
    }

    pub fn next_delivery(&mut self) -> Option<Message> {
        self.broker.next_delivery()
    }
}

pub fn message(routing_key: &str, content: Content) -> Message {
    Message::new(EXECUTION_EXCHANGE, routing_key, content, MessageProperties::new())
}
