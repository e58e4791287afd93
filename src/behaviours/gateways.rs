// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::Message;
use crate::engine::ActivityScope;
use crate::errors::BehaviourError;
use crate::traits::ActivityBehaviour;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    /// First flow whose condition holds, else the default flow
    Exclusive,
    /// Every flow whose condition holds, else the default flow
    Inclusive,
    /// Every flow; joins wait for all inbound flows
    Parallel,
}

#[derive(Debug, Clone)]
pub struct GatewayBehaviour {
    kind: GatewayKind,
}

impl GatewayBehaviour {
    pub fn new(kind: GatewayKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> GatewayKind {
        self.kind
    }
}

impl ActivityBehaviour for GatewayBehaviour {
    fn execute(
        &mut self,
        scope: &mut ActivityScope<'_>,
        message: &Message,
    ) -> Result<(), BehaviourError> {
        let content = match self.kind {
            GatewayKind::Exclusive => message.content.clone().with("outboundTakeOne", true),
            GatewayKind::Inclusive | GatewayKind::Parallel => message.content.clone(),
        };
        scope.complete(&content, None)?;
        Ok(())
    }
}
