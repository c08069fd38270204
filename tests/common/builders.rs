//! Run fixtures, fast configurations and simulated node agents.

use super::mock_connector::MockConnector;
use deployer_core::client::InMemoryRunService;
use deployer_core::cloud::{CloudConnector, ConnectorRegistry, UserInfo};
use deployer_core::config::{ExecutorConfig, ProvisioningConfig};
use deployer_core::execution::OrchestratorContext;
use deployer_core::models::{NodeDefinition, NodeInstance, RunCategory, RunDocument};
use deployer_core::orchestration::BootstrapSettings;
use deployer_core::parameters::{RunWrapper, RunWrapperFactory};
use deployer_core::state_machine::{ExecutionState, ScaleState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const CLOUD: &str = "alpha";

pub fn orchestrator_name(cloud: &str) -> String {
    format!("orchestrator-{cloud}")
}

/// Builder for deployment runs on a single cloud
#[derive(Debug, Clone)]
pub struct RunBuilder {
    cloud: String,
    mutable: bool,
    nodes: Vec<(String, u32, u32, ScaleState)>,
}

impl RunBuilder {
    pub fn new(cloud: &str) -> Self {
        Self {
            cloud: cloud.to_string(),
            mutable: false,
            nodes: Vec::new(),
        }
    }

    /// `multiplicity` instances of `node`, all in `creating`
    pub fn node(self, node: &str, multiplicity: u32, max_failures: u32) -> Self {
        self.node_in_state(node, multiplicity, max_failures, ScaleState::Creating)
    }

    pub fn node_in_state(
        mut self,
        node: &str,
        multiplicity: u32,
        max_failures: u32,
        state: ScaleState,
    ) -> Self {
        self.nodes
            .push((node.to_string(), multiplicity, max_failures, state));
        self
    }

    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    pub fn build(self) -> RunDocument {
        let mut run = RunDocument::new(Uuid::new_v4(), RunCategory::Deployment);
        run.mutable = self.mutable;

        let mut orchestrator = NodeInstance::orchestrator(&self.cloud);
        orchestrator.cloud_resource_id = Some(format!("{}-orchestrator", self.cloud));
        run.instances.push(orchestrator);

        for (node, multiplicity, max_failures, state) in self.nodes {
            run.nodes.push(NodeDefinition {
                name: node.clone(),
                cloud: self.cloud.clone(),
                multiplicity,
                max_provisioning_failures: max_failures,
            });
            for index in 1..=multiplicity {
                run.instances.push(
                    NodeInstance::new(&node, index, &self.cloud)
                        .with_max_provisioning_failures(max_failures)
                        .with_scale_state(state),
                );
            }
        }
        run
    }

    pub fn service(self) -> InMemoryRunService {
        InMemoryRunService::new(self.build())
    }
}

pub fn fast_executor_config(instance_name: &str) -> ExecutorConfig {
    ExecutorConfig {
        instance_name: instance_name.to_string(),
        poll_interval_short_ms: 5,
        poll_interval_long_ms: 10,
        state_read_max_attempts: 5,
        state_read_initial_delay_ms: 5,
        state_read_max_delay_ms: 20,
    }
}

pub fn fast_provisioning_config() -> ProvisioningConfig {
    ProvisioningConfig {
        max_workers: 4,
        wait_timeout_seconds: 5,
        timeout_safety_factor: 1.0,
        failure_check_every: 1,
        poll_interval_ms: 10,
    }
}

pub fn registry_with(connector: Arc<MockConnector>) -> Arc<ConnectorRegistry> {
    let connector: Arc<dyn CloudConnector> = connector;
    Arc::new(ConnectorRegistry::new().with_connector(connector))
}

pub fn wrapper_for(service: &InMemoryRunService, instance_name: &str) -> RunWrapper {
    RunWrapper::new(Box::new(service.client()), instance_name)
}

pub fn orchestrator_context(
    service: &InMemoryRunService,
    registry: Arc<ConnectorRegistry>,
    provisioning: ProvisioningConfig,
) -> OrchestratorContext {
    let name = orchestrator_name(CLOUD);
    OrchestratorContext::new(
        RunWrapperFactory::new(service.factory(), &name),
        registry,
        Arc::new(UserInfo::new("alice")),
        BootstrapSettings {
            service_url: "https://runs.example.com".to_string(),
            command: Some("deployer-node".to_string()),
        },
        provisioning,
        fast_executor_config(&name),
    )
    .expect("in-memory wrappers are always available")
}

/// Mimics booting machines: every started, healthy instance still in
/// `creating` reports `created` shortly after its machine came up.
pub fn spawn_node_simulator(
    service: InMemoryRunService,
    connector: Arc<MockConnector>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            for name in connector.started() {
                if connector.is_failing(&name) {
                    continue;
                }
                if service.scale_state(&name) == Some(ScaleState::Creating) {
                    service.set_scale_state(&name, ScaleState::Created);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Run `future` with a generous upper bound so a hung state machine fails the test
pub async fn bounded<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(20), future)
        .await
        .expect("operation did not finish in time")
}

/// Plays the run service's role of advancing the global state: each state is
/// held until every listed participant signalled completion in it. Only
/// signals sent after the state was entered count, so a phase can be revisited.
pub async fn drive_states(
    service: &InMemoryRunService,
    steps: &[(ExecutionState, Vec<String>)],
) {
    for (state, participants) in steps {
        let seen = service.completions().len();
        service.set_global_state(*state);
        let completed_since = || -> Vec<String> {
            service.completions()[seen..]
                .iter()
                .filter(|completion| completion.state == Some(*state))
                .map(|completion| completion.instance_name.clone())
                .collect()
        };
        let reached = wait_until(Duration::from_secs(10), || {
            let completed = completed_since();
            participants.iter().all(|name| completed.contains(name))
        })
        .await;
        assert!(
            reached,
            "participants {participants:?} did not complete {state}: {:?}",
            completed_since()
        );
    }
}
