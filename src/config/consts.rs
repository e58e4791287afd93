// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Default number of concurrent execution steps a controller accepts (prefetch is twice this)
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Prefetch for the join consumer; large enough to buffer every inbound signal
pub const JOIN_PREFETCH: usize = 1000;

/// Priority of the activity API subscription
pub const ACTIVITY_API_PRIORITY: i32 = 100;
/// Priority of the execute queue binding and consumer
pub const EXECUTE_PRIORITY: i32 = 100;
/// Priority of the execution API subscription, above the execute queue
pub const EXECUTION_API_PRIORITY: i32 = 200;
/// Priority of loop iteration tracking, above everything else on the execution exchange
pub const LOOP_PRIORITY: i32 = 300;

// Exchanges
pub const RUN_EXCHANGE: &str = "run";
pub const FORMAT_EXCHANGE: &str = "format";
pub const EXECUTION_EXCHANGE: &str = "execution";
pub const API_EXCHANGE: &str = "api";
pub const EVENT_EXCHANGE: &str = "event";

// Queues
pub const INBOUND_QUEUE: &str = "inbound-q";
pub const RUN_QUEUE: &str = "run-q";
pub const FORMAT_RUN_QUEUE: &str = "format-run-q";
pub const EXECUTION_QUEUE: &str = "execution-q";
pub const EXECUTE_QUEUE: &str = "execute-q";
/// Polled by a process execution for its children's events
pub const SCOPE_EVENT_QUEUE: &str = "scope-event-q";
/// Polled by the owner of a process execution for its completion
pub const COMPLETION_QUEUE: &str = "completion-q";

// Consumer tags
pub const RUN_ON_INBOUND_TAG: &str = "_run-on-inbound";
pub const ACTIVITY_RUN_TAG: &str = "_activity-run";
pub const ACTIVITY_API_TAG: &str = "_activity-api";
pub const ACTIVITY_EXECUTION_TAG: &str = "_activity-execution";
pub const ACTIVITY_EXECUTE_TAG: &str = "_activity-execute";
pub const EXECUTION_API_TAG: &str = "_activity-api-execution";

/// Activity types known to the default behaviour factory
pub mod activity_types {
    pub const TASK: &str = "task";
    pub const SERVICE_TASK: &str = "service_task";
    pub const SCRIPT_TASK: &str = "script_task";
    pub const USER_TASK: &str = "user_task";
    pub const START_EVENT: &str = "start_event";
    pub const END_EVENT: &str = "end_event";
    pub const BOUNDARY_EVENT: &str = "boundary_event";
    pub const EXCLUSIVE_GATEWAY: &str = "exclusive_gateway";
    pub const INCLUSIVE_GATEWAY: &str = "inclusive_gateway";
    pub const PARALLEL_GATEWAY: &str = "parallel_gateway";
    pub const SUB_PROCESS: &str = "sub_process";
}
