// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Whole-process scenarios: routing between activities, joins, loops,
//! boundary events, sub-processes and snapshot round trips.

use crate::broker::Content;
use crate::config::{
    ActivityDefinition, BehaviourParams, Environment, GraphBuilder, LoopCharacteristicsDefinition,
    ProcessGraph, Settings,
};
use crate::engine::{
    ProcessContext, ProcessEvent, ProcessExecution, ProcessExecutionState, ProcessStatus,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const EXECUTION_ID: &str = "p_1";

fn context(graph: ProcessGraph, variables: Value) -> ProcessContext {
    let variables: Map<String, Value> = match variables {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ProcessContext::new(
        Arc::new(graph),
        Environment::new(Settings::default(), variables),
    )
}

fn start(graph: &ProcessGraph, variables: Value) -> ProcessExecution {
    let mut execution = ProcessExecution::new(context(graph.clone(), variables), EXECUTION_ID);
    execution.execute(Content::new()).unwrap();
    execution
}

/// Snapshot through JSON, then recover and resume in a fresh execution.
fn round_trip(execution: &ProcessExecution, graph: &ProcessGraph) -> ProcessExecution {
    let serialized = serde_json::to_string(&execution.get_state()).unwrap();
    let state: ProcessExecutionState = serde_json::from_str(&serialized).unwrap();

    let mut recovered = ProcessExecution::new(context(graph.clone(), json!({})), EXECUTION_ID);
    recovered.recover(&state).unwrap();
    recovered.resume().unwrap();
    recovered
}

/// Terminal events as `(type, id)`; process completions lose their execution id.
fn terminal_events(events: &mut UnboundedReceiver<ProcessEvent>) -> Vec<(String, String)> {
    let mut terminal = Vec::new();
    while let Ok(event) = events.try_recv() {
        let kind = match event.routing_key.as_str() {
            key @ ("activity.end" | "activity.leave" | "activity.discard") => key.to_string(),
            key if key.starts_with("execution.") => key.split('.').take(2).collect::<Vec<_>>().join("."),
            _ => continue,
        };
        terminal.push((kind, event.content.id().unwrap_or_default().to_string()));
    }
    terminal
}

fn start_recorded(
    graph: &ProcessGraph,
    variables: Value,
    sink: &UnboundedSender<ProcessEvent>,
) -> ProcessExecution {
    let context = context(graph.clone(), variables).with_event_sink(sink.clone());
    let mut execution = ProcessExecution::new(context, EXECUTION_ID);
    execution.execute(Content::new()).unwrap();
    execution
}

/// Terminal events of a run that signals `steps` in order, with a snapshot
/// round trip before the signal at `snapshot_before` when given.
fn recorded_run(
    graph: &ProcessGraph,
    variables: Value,
    steps: &[&str],
    snapshot_before: Option<usize>,
) -> Vec<(String, String)> {
    let (sink, mut events) = unbounded_channel();
    let mut execution = start_recorded(graph, variables, &sink);

    for (index, step) in steps.iter().enumerate() {
        if snapshot_before == Some(index) {
            let serialized = serde_json::to_string(&execution.get_state()).unwrap();
            let state: ProcessExecutionState = serde_json::from_str(&serialized).unwrap();
            let context = context(graph.clone(), json!({})).with_event_sink(sink.clone());
            execution = ProcessExecution::new(context, EXECUTION_ID);
            execution.recover(&state).unwrap();
            execution.resume().unwrap();
        }
        assert!(execution.signal(step, json!(step)).unwrap());
    }
    assert_eq!(execution.status(), ProcessStatus::Completed);
    terminal_events(&mut events)
}

fn taken(execution: &ProcessExecution, id: &str) -> u64 {
    execution.child(id).unwrap().counters().taken
}

fn discarded(execution: &ProcessExecution, id: &str) -> u64 {
    execution.child(id).unwrap().counters().discarded
}

fn output_of(execution: &ProcessExecution, id: &str) -> Option<Value> {
    execution.context().environment.output().get(id).cloned()
}

fn exclusive_choice() -> ProcessGraph {
    GraphBuilder::new("approval")
        .activity("start", "start_event")
        .activity("decide", "exclusive_gateway")
        .activity("manual", "user_task")
        .activity("auto", "task")
        .activity("end", "end_event")
        .flow("f0", "start", "decide")
        .conditional_flow("f1", "decide", "manual", "${variables.amount} > 100")
        .default_flow("f2", "decide", "auto")
        .flow("f3", "manual", "end")
        .flow("f4", "auto", "end")
        .build()
}

#[test]
fn test_exclusive_choice_falls_back_to_default_flow() {
    let graph = exclusive_choice();
    let execution = start(&graph, json!({"amount": 50}));

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(taken(&execution, "auto"), 1);
    assert_eq!(taken(&execution, "manual"), 0);
    assert_eq!(discarded(&execution, "manual"), 1);
    assert_eq!(taken(&execution, "end"), 1);
}

#[test]
fn test_exclusive_choice_survives_snapshot_while_waiting() {
    let graph = exclusive_choice();
    let execution = start(&graph, json!({"amount": 150}));
    assert!(execution.is_running());
    assert_eq!(discarded(&execution, "auto"), 1);

    let mut recovered = round_trip(&execution, &graph);
    assert!(recovered.is_running());
    let postponed = recovered.get_postponed();
    assert_eq!(postponed.len(), 1);
    assert_eq!(postponed[0].id(), Some("manual"));

    assert!(recovered.signal("manual", json!({"approved": true})).unwrap());
    assert_eq!(recovered.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&recovered, "manual"), Some(json!({"approved": true})));
    assert_eq!(taken(&recovered, "end"), 1);
    assert_eq!(taken(&recovered, "auto"), 0);
}

fn parallel_join() -> ProcessGraph {
    GraphBuilder::new("fulfilment")
        .activity("start", "start_event")
        .activity("fork", "parallel_gateway")
        .activity("pick", "user_task")
        .activity("pack", "user_task")
        .activity("invoice", "task")
        .activity("join", "parallel_gateway")
        .activity("end", "end_event")
        .flow("f0", "start", "fork")
        .flow("f1", "fork", "pick")
        .flow("f2", "fork", "pack")
        .flow("f3", "fork", "invoice")
        .flow("f4", "pick", "join")
        .flow("f5", "pack", "join")
        .flow("f6", "invoice", "join")
        .flow("f7", "join", "end")
        .build()
}

#[test]
fn test_parallel_join_waits_for_every_branch_across_snapshot() {
    let graph = parallel_join();
    let mut execution = start(&graph, json!({}));
    assert_eq!(taken(&execution, "invoice"), 1);
    assert_eq!(execution.get_postponed().len(), 2);

    assert!(execution.signal("pick", json!("picked")).unwrap());
    assert!(execution.is_running());
    assert_eq!(taken(&execution, "join"), 0);

    let mut recovered = round_trip(&execution, &graph);
    let postponed = recovered.get_postponed();
    assert_eq!(postponed.len(), 1);
    assert_eq!(postponed[0].id(), Some("pack"));

    assert!(recovered.signal("pack", json!("packed")).unwrap());
    assert_eq!(recovered.status(), ProcessStatus::Completed);
    assert_eq!(taken(&recovered, "join"), 1);
    assert_eq!(taken(&recovered, "end"), 1);
}

#[test]
fn test_join_runs_when_one_inbound_taken_and_rest_discarded() {
    let graph = GraphBuilder::new("routing")
        .activity("start", "start_event")
        .activity("fork", "inclusive_gateway")
        .activity("a", "task")
        .activity("b", "task")
        .activity("c", "task")
        .activity("join", "parallel_gateway")
        .activity("end", "end_event")
        .flow("f0", "start", "fork")
        .conditional_flow("f1", "fork", "a", "${variables.express}")
        .conditional_flow("f2", "fork", "b", "!${variables.express}")
        .conditional_flow("f3", "fork", "c", "${variables.amount} > 1000")
        .flow("f4", "a", "join")
        .flow("f5", "b", "join")
        .flow("f6", "c", "join")
        .flow("f7", "join", "end")
        .build();
    let execution = start(&graph, json!({"express": true, "amount": 10}));

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(taken(&execution, "a"), 1);
    assert_eq!(discarded(&execution, "b"), 1);
    assert_eq!(discarded(&execution, "c"), 1);
    assert_eq!(taken(&execution, "join"), 1);
    assert_eq!(discarded(&execution, "join"), 0);
    assert_eq!(taken(&execution, "end"), 1);
}

fn nested() -> ProcessGraph {
    GraphBuilder::new("onboarding")
        .activity("start", "start_event")
        .sub_process("checks", |scope| {
            scope
                .activity("checks_start", "start_event")
                .activity("approve", "user_task")
                .flow("cf1", "checks_start", "approve")
        })
        .activity("end", "end_event")
        .flow("f1", "start", "checks")
        .flow("f2", "checks", "end")
        .build()
}

#[test]
fn test_nested_sub_process_step_survives_snapshot() {
    let graph = nested();
    let execution = start(&graph, json!({}));
    let postponed = execution.get_postponed();
    assert!(postponed.iter().any(|api| api.id() == Some("approve")));

    let mut recovered = round_trip(&execution, &graph);
    assert!(recovered
        .get_postponed()
        .iter()
        .any(|api| api.id() == Some("approve")));

    assert!(recovered.signal("approve", json!("ok")).unwrap());
    assert_eq!(recovered.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&recovered, "checks"), Some(json!({"approve": "ok"})));
    assert_eq!(taken(&recovered, "end"), 1);
}

#[test]
fn test_completed_process_snapshot_does_not_run_again() {
    let graph = exclusive_choice();
    let execution = start(&graph, json!({"amount": 50}));
    assert_eq!(execution.status(), ProcessStatus::Completed);

    let mut recovered = round_trip(&execution, &graph);
    assert_eq!(recovered.status(), ProcessStatus::Completed);
    assert_eq!(taken(&recovered, "end"), 1);
    assert!(recovered.take_completion().is_none());
}

#[test]
fn test_second_signal_after_completion_is_ignored() {
    let graph = exclusive_choice();
    let mut execution = start(&graph, json!({"amount": 500}));
    let target = execution.get_postponed()[0].content.clone();

    assert!(execution.signal("manual", json!(1)).unwrap());
    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert!(!execution.signal("manual", json!(2)).unwrap());
    execution
        .send_api(&crate::engine::ApiCommand::Signal(json!(3)), &target)
        .unwrap();

    assert_eq!(taken(&execution, "manual"), 1);
    assert_eq!(taken(&execution, "end"), 1);
    assert_eq!(output_of(&execution, "manual"), Some(json!(1)));
}

fn looped(activity_type: &str, characteristics: LoopCharacteristicsDefinition) -> ProcessGraph {
    GraphBuilder::new("batch")
        .activity("start", "start_event")
        .activity_with(
            ActivityDefinition::new("each", activity_type)
                .with_behaviour(BehaviourParams::default().with_loop(characteristics)),
        )
        .activity("end", "end_event")
        .flow("f1", "start", "each")
        .flow("f2", "each", "end")
        .build()
}

#[test]
fn test_sequential_loop_waits_for_each_iteration_in_order() {
    let graph = looped(
        "user_task",
        LoopCharacteristicsDefinition {
            is_sequential: true,
            loop_cardinality: Some(3),
            ..Default::default()
        },
    );
    let mut execution = start(&graph, json!({}));

    for round in 1..=3 {
        let waiting: Vec<_> = execution
            .get_postponed()
            .into_iter()
            .filter(|api| api.content.get_bool("isMultiInstance") && api.content.contains_key("index"))
            .collect();
        assert_eq!(waiting.len(), 1, "round {}", round);
        assert_eq!(waiting[0].content.get("index"), Some(&json!(round - 1)));
        assert!(execution.signal("each", json!(round)).unwrap());
    }

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&execution, "each"), Some(json!([1, 2, 3])));
    assert_eq!(taken(&execution, "each"), 1);
}

#[test]
fn test_parallel_loop_over_collection_keeps_item_order() {
    let graph = looped(
        "task",
        LoopCharacteristicsDefinition {
            collection: Some("orders".to_string()),
            element_variable: Some("order".to_string()),
            ..Default::default()
        },
    );
    let execution = start(&graph, json!({"orders": ["o-1", "o-2", "o-3"]}));

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&execution, "each"), Some(json!(["o-1", "o-2", "o-3"])));
}

#[test]
fn test_loop_over_empty_collection_completes_immediately() {
    let graph = looped(
        "user_task",
        LoopCharacteristicsDefinition {
            collection: Some("orders".to_string()),
            ..Default::default()
        },
    );
    let execution = start(&graph, json!({"orders": []}));

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&execution, "each"), Some(json!([])));
}

#[test]
fn test_parallel_loop_survives_snapshot_between_signals() {
    let graph = looped(
        "user_task",
        LoopCharacteristicsDefinition {
            loop_cardinality: Some(2),
            ..Default::default()
        },
    );
    let mut execution = start(&graph, json!({}));
    assert!(execution.signal("each", json!("second")).unwrap());
    assert!(execution.is_running());

    let mut recovered = round_trip(&execution, &graph);
    assert!(recovered.signal("each", json!("first")).unwrap());

    assert_eq!(recovered.status(), ProcessStatus::Completed);
    assert_eq!(output_of(&recovered, "each"), Some(json!(["first", "second"])));
}

#[test]
fn test_interrupting_boundary_discards_host() {
    let graph = GraphBuilder::new("sla")
        .activity("start", "start_event")
        .activity("work", "user_task")
        .activity_with(
            ActivityDefinition::new("timeout", "boundary_event")
                .with_behaviour(BehaviourParams::attached_to("work")),
        )
        .activity("escalate", "task")
        .activity("done", "end_event")
        .flow("f1", "start", "work")
        .flow("f2", "work", "done")
        .flow("f3", "timeout", "escalate")
        .build();
    let mut execution = start(&graph, json!({}));
    assert!(execution.child("timeout").unwrap().status().is_some());

    assert!(execution.signal("timeout", json!("expired")).unwrap());

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(discarded(&execution, "work"), 1);
    assert_eq!(taken(&execution, "escalate"), 1);
    assert_eq!(discarded(&execution, "done"), 1);
}

#[test]
fn test_boundary_leaves_when_host_completes() {
    let graph = GraphBuilder::new("sla")
        .activity("start", "start_event")
        .activity("work", "user_task")
        .activity_with(
            ActivityDefinition::new("timeout", "boundary_event")
                .with_behaviour(BehaviourParams::attached_to("work")),
        )
        .activity("escalate", "task")
        .flow("f1", "start", "work")
        .flow("f3", "timeout", "escalate")
        .build();
    let mut execution = start(&graph, json!({}));

    assert!(execution.signal("work", json!("in time")).unwrap());

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(taken(&execution, "work"), 1);
    assert_eq!(discarded(&execution, "timeout"), 1);
    assert_eq!(discarded(&execution, "escalate"), 1);
}

#[test]
fn test_error_boundary_catches_host_failure() {
    let mut catcher = BehaviourParams::attached_to("charge");
    catcher.catch_error = true;
    let graph = GraphBuilder::new("payment")
        .activity("start", "start_event")
        .activity_with(
            ActivityDefinition::new("charge", "service_task")
                .with_behaviour(BehaviourParams::default().with_extra("fail", "card declined")),
        )
        .activity_with(ActivityDefinition::new("declined", "boundary_event").with_behaviour(catcher))
        .activity("refund", "task")
        .activity("end", "end_event")
        .flow("f1", "start", "charge")
        .flow("f2", "charge", "end")
        .flow("f3", "declined", "refund")
        .build();
    let execution = start(&graph, json!({}));

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(taken(&execution, "refund"), 1);
    assert_eq!(taken(&execution, "end"), 0);
    assert_eq!(
        output_of(&execution, "declined"),
        Some(json!({"error": {"message": "card declined"}}))
    );
}

#[test]
fn test_exclusive_choice_round_trip_publishes_same_terminal_events() {
    let graph = exclusive_choice();
    let uninterrupted = recorded_run(&graph, json!({"amount": 150}), &["manual"], None);
    let round_trip = recorded_run(&graph, json!({"amount": 150}), &["manual"], Some(0));

    assert!(uninterrupted.contains(&("activity.discard".to_string(), "auto".to_string())));
    assert_eq!(
        uninterrupted.last().map(|(kind, _)| kind.as_str()),
        Some("execution.completed")
    );
    assert_eq!(round_trip, uninterrupted);
}

#[test]
fn test_parallel_join_round_trip_publishes_same_terminal_events() {
    let graph = parallel_join();
    let uninterrupted = recorded_run(&graph, json!({}), &["pick", "pack"], None);
    let round_trip = recorded_run(&graph, json!({}), &["pick", "pack"], Some(1));

    let join_leaves = uninterrupted
        .iter()
        .filter(|(kind, id)| kind == "activity.leave" && id == "join")
        .count();
    assert_eq!(join_leaves, 1);
    assert_eq!(round_trip, uninterrupted);
}

#[test]
fn test_nested_sub_process_round_trip_publishes_same_terminal_events() {
    let graph = nested();
    let uninterrupted = recorded_run(&graph, json!({}), &["approve"], None);
    let round_trip = recorded_run(&graph, json!({}), &["approve"], Some(0));

    assert!(uninterrupted.contains(&("activity.end".to_string(), "approve".to_string())));
    assert!(uninterrupted.contains(&("activity.end".to_string(), "checks".to_string())));
    assert_eq!(round_trip, uninterrupted);
}

#[test]
fn test_join_discards_when_every_inbound_is_discarded() {
    let graph = GraphBuilder::new("shipping")
        .activity("start", "start_event")
        .activity("decide", "exclusive_gateway")
        .activity("fork", "parallel_gateway")
        .activity("label", "task")
        .activity("box", "task")
        .activity("join", "parallel_gateway")
        .activity("dispatch", "task")
        .activity("shipped", "end_event")
        .activity("skip", "task")
        .activity("end", "end_event")
        .flow("f0", "start", "decide")
        .conditional_flow("f1", "decide", "fork", "${variables.ship}")
        .default_flow("f2", "decide", "skip")
        .flow("f3", "fork", "label")
        .flow("f4", "fork", "box")
        .flow("f5", "label", "join")
        .flow("f6", "box", "join")
        .flow("f7", "join", "dispatch")
        .flow("f8", "dispatch", "shipped")
        .flow("f9", "skip", "end")
        .build();
    let (sink, mut events) = unbounded_channel();
    let execution = start_recorded(&graph, json!({"ship": false}), &sink);

    assert_eq!(execution.status(), ProcessStatus::Completed);
    assert_eq!(discarded(&execution, "label"), 1);
    assert_eq!(discarded(&execution, "box"), 1);
    assert_eq!(discarded(&execution, "join"), 1);
    assert_eq!(taken(&execution, "join"), 0);
    assert_eq!(discarded(&execution, "dispatch"), 1);
    assert_eq!(taken(&execution, "end"), 1);

    let terminal = terminal_events(&mut events);
    let join_events: Vec<&str> = terminal
        .iter()
        .filter(|(_, id)| id == "join")
        .map(|(kind, _)| kind.as_str())
        .collect();
    assert!(join_events.contains(&"activity.discard"));
    assert!(!join_events.contains(&"activity.end"));
}
