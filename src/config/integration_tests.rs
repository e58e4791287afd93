// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

#[cfg(test)]
mod integration_tests {
    use crate::behaviours::BehaviourFactory;
    use crate::broker::Content;
    use crate::config::{load_and_validate_config, Config, RuntimeBuilder};
    use crate::engine::{ProcessEvent, ProcessStatus};
    use crate::errors::{ConfigError, RuntimeError, ValidationError};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn wait_for(events: &mut UnboundedReceiver<ProcessEvent>, routing_key: &str, id: &str) {
        while let Some(event) = events.recv().await {
            if event.routing_key == routing_key && event.content.id() == Some(id) {
                return;
            }
        }
        panic!("no {} event for {}", routing_key, id);
    }

    /// Demo configurations parse and pass validation
    #[test]
    fn test_order_approval_yaml_loading() {
        let config = load_and_validate_config("configs/order-approval.yaml").unwrap();

        assert_eq!(config.process.id, "order_approval");
        assert_eq!(config.process.name.as_deref(), Some("Order approval"));
        assert_eq!(config.settings.batch_size, 50);
        assert_eq!(config.variables.get("amount"), Some(&json!(150)));
        assert_eq!(config.process.activities.len(), 5);
        assert_eq!(config.process.flows.len(), 5);
        assert!(config.process.flows[2].is_default);
    }

    #[test]
    fn test_fulfilment_yaml_loading() {
        let config = load_and_validate_config("configs/fulfilment.yaml").unwrap();

        let pack = &config.process.activities[3];
        assert_eq!(pack.id, "pack");
        let characteristics = pack.behaviour.loop_characteristics.as_ref().unwrap();
        assert!(!characteristics.is_sequential);
        assert_eq!(characteristics.collection.as_deref(), Some("lines"));
        assert_eq!(characteristics.element_variable.as_deref(), Some("line"));
    }

    #[test]
    fn test_onboarding_yaml_loading() {
        let config = load_and_validate_config("configs/onboarding.yaml").unwrap();

        let paperwork = &config.process.activities[1];
        assert_eq!(paperwork.activity_type, "sub_process");
        assert_eq!(paperwork.activities.len(), 3);
        assert_eq!(paperwork.flows.len(), 2);

        let reminder = &config.process.activities[2];
        assert_eq!(reminder.behaviour.attached_to.as_deref(), Some("paperwork"));
        assert!(!reminder.behaviour.cancels_activity());
    }

    #[test]
    fn test_builder_rejects_types_missing_from_its_registry() {
        let config = load_and_validate_config("configs/order-approval.yaml").unwrap();

        let mut behaviours = BehaviourFactory::new();
        behaviours.register("start_event", |_, _| {
            Box::new(crate::behaviours::EventBehaviour)
        });
        let result = RuntimeBuilder::new().with_behaviours(behaviours).build(&config);

        match result {
            Err(ConfigError::Invalid(errors)) => {
                assert!(errors.iter().all(|e| matches!(e, ValidationError::UnknownActivityType { .. })));
                assert_eq!(errors.len(), 4);
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_context_carries_graph_and_variables() {
        let yaml = r#"
settings:
  step: true
variables:
  region: emea
process:
  id: tiny
  activities:
    - { id: only, type: task }
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_and_validate_config(file.path()).unwrap();
        let context = RuntimeBuilder::from_config(&config).unwrap();

        assert_eq!(context.graph.process_id(), "tiny");
        assert_eq!(context.graph.activities("tiny").len(), 1);
        assert!(context.environment.settings().step);
        assert_eq!(context.environment.variable("region"), Some(json!("emea")));
        assert!(context.behaviours.is_type_available("user_task"));
    }

    #[tokio::test]
    async fn test_order_approval_runs_to_completion() {
        let config = load_and_validate_config("configs/order-approval.yaml").unwrap();
        let (runner, mut events) = RuntimeBuilder::new().spawn(&config, Content::new()).unwrap();
        assert!(runner.execution_id().starts_with("order_approval_"));

        wait_for(&mut events, "activity.wait", "manual").await;
        assert!(runner.signal("manual", json!({"approved": true})).await.unwrap());

        let outcome = runner.wait().await.unwrap();
        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.output().get("manual"), Some(&json!({"approved": true})));
        assert!(outcome.output().get("auto").is_none());
    }

    #[tokio::test]
    async fn test_small_order_skips_approval() {
        let mut config = load_and_validate_config("configs/order-approval.yaml").unwrap();
        config.variables.insert("amount".into(), json!(20));

        let (runner, _events) = RuntimeBuilder::new().spawn(&config, Content::new()).unwrap();
        let outcome = runner.wait().await.unwrap();

        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(
            outcome.output().get("auto"),
            Some(&json!({"approved": true, "by": "system"}))
        );
    }

    #[tokio::test]
    async fn test_fulfilment_joins_picking_and_packing() {
        let config = load_and_validate_config("configs/fulfilment.yaml").unwrap();
        let (runner, mut events) = RuntimeBuilder::new().spawn(&config, Content::new()).unwrap();

        wait_for(&mut events, "activity.wait", "pick").await;
        let state = runner.get_state().await.unwrap();
        assert_eq!(state.status, ProcessStatus::Executing);
        assert_eq!(state.environment.output.get("pack"), Some(&json!(["widget", "gadget", "gizmo"])));

        assert!(runner.signal("pick", json!("picked")).await.unwrap());
        let outcome = runner.wait().await.unwrap();

        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.output().get("invoice"), Some(&json!({"invoiced": true})));
    }

    #[tokio::test]
    async fn test_onboarding_signals_into_sub_process() {
        let config = load_and_validate_config("configs/onboarding.yaml").unwrap();
        let (runner, mut events) = RuntimeBuilder::new().spawn(&config, Content::new()).unwrap();

        wait_for(&mut events, "activity.wait", "sign").await;
        let waiting: Vec<String> = runner
            .get_postponed()
            .await
            .unwrap()
            .iter()
            .filter_map(|api| api.id().map(str::to_string))
            .collect();
        assert!(waiting.contains(&"sign".to_string()));
        assert!(waiting.contains(&"reminder".to_string()));

        assert!(runner.signal("sign", json!("signed")).await.unwrap());
        let outcome = runner.wait().await.unwrap();

        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.output().get("welcome"), Some(&json!("welcome aboard")));
    }

    #[tokio::test]
    async fn test_invalid_config_never_spawns() {
        let config = Config::from_yaml_str(
            r#"
process:
  id: broken
  activities:
    - { id: a, type: task }
  flows:
    - { id: f1, source: a, target: nowhere }
"#,
        )
        .unwrap();

        let result = RuntimeBuilder::new().spawn(&config, Content::new());
        assert!(matches!(result, Err(RuntimeError::Config(ConfigError::Invalid(_)))));
    }
}
