// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised synchronously by the message fabric.

use thiserror::Error;

/// Errors that can occur while publishing, binding or consuming
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// Publish or bind against an exchange that was never asserted
    #[error("broker '{broker}': exchange '{exchange}' not found")]
    ExchangeNotFound { broker: String, exchange: String },

    /// Bind or consume against a queue that was never asserted
    #[error("broker '{broker}': queue '{queue}' not found")]
    QueueNotFound { broker: String, queue: String },

    /// A second consumer on a queue held by an exclusive consumer
    #[error("broker '{broker}': queue '{queue}' is exclusively consumed by '{holder}', cannot add '{consumer_tag}'")]
    ExclusiveConsumer {
        broker: String,
        queue: String,
        holder: String,
        consumer_tag: String,
    },

    /// A mandatory message matched no binding
    #[error("broker '{broker}': mandatory message '{routing_key}' on exchange '{exchange}' was not routed")]
    Unroutable {
        broker: String,
        exchange: String,
        routing_key: String,
    },
}
