//! Orchestrator provisioning scenarios against the in-memory run service and
//! a scripted cloud connector.

mod common;

use common::*;
use deployer_core::client::InstanceRemoval;
use deployer_core::cloud::Capability;
use deployer_core::constants::global_parameters;
use deployer_core::execution::orchestrator_executor;
use deployer_core::parameters::qualify;
use deployer_core::state_machine::{ExecutionState, ScaleState};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn orchestrator() -> String {
    orchestrator_name(CLOUD)
}

#[tokio::test]
async fn test_all_instances_created() {
    let service = RunBuilder::new(CLOUD).node("web", 3, 0).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD).with_capability(Capability::Contextualization));
    let simulator = spawn_node_simulator(service.clone(), Arc::clone(&connector));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    let stop = bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    simulator.abort();

    assert!(!stop);
    let mut started = connector.started();
    started.sort();
    assert_eq!(started, vec!["web.1", "web.2", "web.3"]);
    for name in ["web.1", "web.2", "web.3"] {
        assert_eq!(service.scale_state(name), Some(ScaleState::Created));
        assert_eq!(
            service.parameter(&qualify("instanceid", name)),
            Some(connector.vm_id(name))
        );
    }
    assert!(connector
        .user_data("web.2")
        .unwrap()
        .contains("DEPLOYER_EXECUTOR__INSTANCE_NAME=web.2"));
    assert!(service.removals().is_empty());
    assert_eq!(service.parameter(global_parameters::ABORT), None);
    assert_eq!(service.completed_in(ExecutionState::Provisioning), vec![orchestrator()]);
}

#[tokio::test]
async fn test_failure_within_tolerance_is_reconciled() {
    let service = RunBuilder::new(CLOUD).node("web", 3, 1).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD).failing_at_provider("web.2"));
    let simulator = spawn_node_simulator(service.clone(), Arc::clone(&connector));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    simulator.abort();

    assert_eq!(
        service.removals(),
        vec![InstanceRemoval {
            node_name: "web".to_string(),
            ids: vec![2],
        }]
    );
    // stopped and retired once reconciled
    assert_eq!(service.scale_state("web.2"), Some(ScaleState::Gone));
    assert_eq!(service.scale_state("web.1"), Some(ScaleState::Created));
    assert!(connector.stopped().contains(&connector.vm_id("web.2")));
    assert_eq!(service.parameter(global_parameters::ABORT), None);

    // the removed instance cannot report, so the orchestrator does it
    let completed = service.completed_in(ExecutionState::Provisioning);
    assert!(completed.contains(&orchestrator()));
    assert!(completed.contains(&"web.2".to_string()));
    assert!(executor.context().forced_completions().contains("web.2"));

    // and keeps doing it in later phases
    service.set_global_state(ExecutionState::Executing);
    executor.execute_phase(ExecutionState::Executing).await.unwrap();
    assert!(service
        .completed_in(ExecutionState::Executing)
        .contains(&"web.2".to_string()));
}

#[tokio::test]
async fn test_failures_beyond_tolerance_abort_the_run() {
    let service = RunBuilder::new(CLOUD).node("web", 3, 1).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(
        MockConnector::new(CLOUD)
            .failing_at_provider("web.1")
            .failing_at_provider("web.3"),
    );
    let simulator = spawn_node_simulator(service.clone(), Arc::clone(&connector));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    let stop = bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    simulator.abort();

    assert!(!stop);
    let abort = service.parameter(global_parameters::ABORT).unwrap();
    assert!(abort.starts_with(&format!("{}: ", orchestrator())));
    assert!(abort.contains("Provisioning failures exceeded for node 'web'"));
    assert!(service.removals().is_empty());
    assert!(executor.context().forced_completions().is_empty());
    assert_eq!(service.completed_in(ExecutionState::Provisioning), vec![orchestrator()]);
}

#[tokio::test]
async fn test_abort_interrupts_the_wait() {
    let service = RunBuilder::new(CLOUD).node("web", 2, 0).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD));
    let provisioning = deployer_core::config::ProvisioningConfig {
        wait_timeout_seconds: 600,
        ..fast_provisioning_config()
    };

    let aborter = {
        let service = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            service.set_parameter(global_parameters::ABORT, "db.1: install failed");
        })
    };

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), provisioning);
    let mut executor = orchestrator_executor(context);
    let started = Instant::now();
    bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    aborter.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        service.parameter(global_parameters::ABORT).as_deref(),
        Some("db.1: install failed")
    );
    assert_eq!(connector.started().len(), 2);
    assert!(service.removals().is_empty());
    assert_eq!(service.completed_in(ExecutionState::Provisioning), vec![orchestrator()]);
}

#[tokio::test]
async fn test_stuck_instances_are_removed_at_timeout() {
    let service = RunBuilder::new(CLOUD).node("db", 2, 1).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD));
    let provisioning = deployer_core::config::ProvisioningConfig {
        wait_timeout_seconds: 1,
        timeout_safety_factor: 0.2,
        ..fast_provisioning_config()
    };

    // only db.1 ever reports back
    let reporter = {
        let service = service.clone();
        let connector = Arc::clone(&connector);
        tokio::spawn(async move {
            loop {
                if connector.started().contains(&"db.1".to_string()) {
                    service.set_scale_state("db.1", ScaleState::Created);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), provisioning);
    let mut executor = orchestrator_executor(context);
    bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    reporter.await.unwrap();

    assert_eq!(service.scale_state("db.1"), Some(ScaleState::Created));
    assert_eq!(service.scale_state("db.2"), Some(ScaleState::Gone));
    assert_eq!(connector.stopped(), vec![connector.vm_id("db.2")]);
    assert_eq!(
        service.removals(),
        vec![InstanceRemoval {
            node_name: "db".to_string(),
            ids: vec![2],
        }]
    );
    assert!(executor.context().forced_completions().contains("db.2"));
}

#[tokio::test]
async fn test_grouped_clouds_start_in_one_batch() {
    let service = RunBuilder::new(CLOUD).node("web", 2, 0).node("db", 1, 0).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(
        MockConnector::new(CLOUD)
            .with_capability(Capability::VappGrouping)
            .with_capability(Capability::DirectIpAssignment),
    );
    let simulator = spawn_node_simulator(service.clone(), Arc::clone(&connector));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();
    simulator.abort();

    let batches = connector.batches();
    assert_eq!(batches.len(), 1);
    let mut batch = batches[0].clone();
    batch.sort();
    assert_eq!(batch, vec!["db.1", "web.1", "web.2"]);
    assert_eq!(
        service.parameter(&qualify("hostname", "web.2")).as_deref(),
        Some("10.0.0.2")
    );
}

#[tokio::test]
async fn test_start_failure_is_recorded() {
    let service = RunBuilder::new(CLOUD).node("web", 2, 0).service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD).rejecting("web.1"));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    bounded(executor.execute_phase(ExecutionState::Provisioning))
        .await
        .unwrap();

    let abort = service.parameter(global_parameters::ABORT).unwrap();
    assert!(abort.contains("quota exceeded starting web.1"));
    assert_eq!(service.completed_in(ExecutionState::Provisioning), vec![orchestrator()]);
}

#[tokio::test]
async fn test_removing_instances_are_stopped() {
    let service = RunBuilder::new(CLOUD)
        .node_in_state("web", 3, 0, ScaleState::Operational)
        .service();
    service.set_scale_state("web.3", ScaleState::Removing);
    service.set_parameter(qualify("instanceid", "web.3"), "alpha-web.3");
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    executor.execute_phase(ExecutionState::Provisioning).await.unwrap();

    assert_eq!(connector.stopped(), vec!["alpha-web.3"]);
    assert_eq!(service.scale_state("web.3"), Some(ScaleState::Gone));
    assert_eq!(service.scale_state("web.1"), Some(ScaleState::Operational));
    assert!(connector.started().is_empty());
}

#[tokio::test]
async fn test_vertical_scaling_targets_one_node() {
    let service = RunBuilder::new(CLOUD)
        .node_in_state("web", 2, 0, ScaleState::Operational)
        .node_in_state("db", 2, 0, ScaleState::DiskAttaching)
        .service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD).with_capability(Capability::DiskAttach));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    executor.execute_phase(ExecutionState::Provisioning).await.unwrap();

    let mut attached = connector.attached();
    attached.sort();
    assert_eq!(attached, vec!["db.1", "db.2"]);
    assert_eq!(service.scale_state("db.1"), Some(ScaleState::DiskAttached));
    assert_eq!(
        service.parameter(&qualify("disk.attached.device", "db.2")).as_deref(),
        Some("/dev/vdb")
    );
    assert!(connector.resized().is_empty());
}

#[tokio::test]
async fn test_removed_instances_left_behind_are_retired() {
    let service = RunBuilder::new(CLOUD)
        .node_in_state("web", 2, 0, ScaleState::Operational)
        .service();
    service.set_scale_state("web.2", ScaleState::Removed);
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    executor.execute_phase(ExecutionState::Provisioning).await.unwrap();

    assert!(connector.stopped().is_empty());
    assert_eq!(service.scale_state("web.2"), Some(ScaleState::Gone));
    assert_eq!(service.parameter(global_parameters::ABORT), None);
}

#[tokio::test]
async fn test_vertical_scaling_requires_the_capability() {
    let service = RunBuilder::new(CLOUD)
        .node_in_state("db", 2, 0, ScaleState::DiskAttaching)
        .service();
    service.set_global_state(ExecutionState::Provisioning);
    // resizes, but cannot attach disks
    let connector = Arc::new(MockConnector::new(CLOUD).with_capability(Capability::Resize));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    executor.execute_phase(ExecutionState::Provisioning).await.unwrap();

    let abort = service.parameter(global_parameters::ABORT).unwrap();
    assert!(abort.contains("Cloud 'alpha' does not support disk_attach"));
    assert!(connector.attached().is_empty());
    assert_eq!(service.scale_state("db.1"), Some(ScaleState::DiskAttaching));
    assert_eq!(service.scale_state("db.2"), Some(ScaleState::DiskAttaching));
}

#[tokio::test]
async fn test_inconsistent_scaling_is_not_corrected() {
    let service = RunBuilder::new(CLOUD)
        .node_in_state("web", 1, 0, ScaleState::Creating)
        .node_in_state("db", 1, 0, ScaleState::Resizing)
        .service();
    service.set_global_state(ExecutionState::Provisioning);
    let connector = Arc::new(MockConnector::new(CLOUD));

    let context = orchestrator_context(&service, registry_with(Arc::clone(&connector)), fast_provisioning_config());
    let mut executor = orchestrator_executor(context);
    executor.execute_phase(ExecutionState::Provisioning).await.unwrap();

    let abort = service.parameter(global_parameters::ABORT).unwrap();
    assert!(abort.contains("Inconsistent scaling state"));
    assert!(connector.started().is_empty());
    assert!(connector.resized().is_empty());
    assert_eq!(service.scale_state("web.1"), Some(ScaleState::Creating));
    assert_eq!(service.scale_state("db.1"), Some(ScaleState::Resizing));
}
