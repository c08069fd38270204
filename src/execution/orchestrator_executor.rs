//! # Orchestrator Executor
//!
//! State machine role of the per-cloud orchestrator. During `Provisioning` it
//! acts on the run-wide scaling state: starts `creating` instances and waits
//! for them, stops `removing` ones (which then go `removed` and `gone`), or
//! applies vertical scaling to the one node type being scaled. During
//! `Finalizing` it stops every remaining instance and finally its own machine.
//!
//! Instances removed because they failed to provision cannot signal phase
//! completion themselves; the orchestrator signals on their behalf every time
//! it signals its own.

use super::handlers::{ExecutionContext, HandlerRegistry, NoopHandler, PhaseHandler, TerminalHandler};
use super::machine::ExecutionStateMachine;
use crate::cloud::{Capability, ConnectorRegistry, UserInfo};
use crate::config::{ExecutorConfig, ProvisioningConfig};
use crate::constants::namespaces;
use crate::error::Result;
use crate::models::NodeInstance;
use crate::orchestration::{
    BootstrapSettings, ForcedCompletions, ProvisioningAction, ProvisioningCoordinator,
    ProvisioningOutcome, ProvisioningWaiter, ScalingStateTracker, StartInstanceAction,
    StartInstanceGroupAction, StopInstancesAction, VerticalOperation, VerticalScaleAction,
};
use crate::parameters::{RunWrapper, RunWrapperFactory};
use crate::resilience::ExponentialBackoff;
use crate::state_machine::{ExecutionState, HandlerOutcome, ScaleClass, ScaleState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct OrchestratorContext {
    wrapper: RunWrapper,
    registry: Arc<ConnectorRegistry>,
    coordinator: ProvisioningCoordinator,
    user: Arc<UserInfo>,
    bootstrap: BootstrapSettings,
    provisioning: ProvisioningConfig,
    executor: ExecutorConfig,
    forced: ForcedCompletions,
}

impl OrchestratorContext {
    pub fn new(
        wrapper_factory: RunWrapperFactory,
        registry: Arc<ConnectorRegistry>,
        user: Arc<UserInfo>,
        bootstrap: BootstrapSettings,
        provisioning: ProvisioningConfig,
        executor: ExecutorConfig,
    ) -> Result<Self> {
        let wrapper = wrapper_factory.create()?;
        let coordinator = ProvisioningCoordinator::new(provisioning.max_workers, wrapper_factory);
        Ok(Self {
            wrapper,
            registry,
            coordinator,
            user,
            bootstrap,
            provisioning,
            executor,
            forced: ForcedCompletions::new(),
        })
    }

    pub fn forced_completions(&self) -> &ForcedCompletions {
        &self.forced
    }

    async fn start_and_wait(&mut self) -> Result<HandlerOutcome> {
        let creating = ScalingStateTracker::new(&mut self.wrapper)
            .instances_in_state(ScaleState::Creating)
            .await?;
        if creating.is_empty() {
            return Ok(HandlerOutcome::Continue);
        }
        crate::log_scaling!(info, "START_INSTANCES", instances: creating.len());

        let mut singles = Vec::new();
        let mut groups = Vec::new();
        for (cloud, instances) in ConnectorRegistry::group_by_cloud(&creating) {
            if self.registry.get(&cloud)?.supports(Capability::VappGrouping) {
                groups.push((cloud, instances));
            } else {
                singles.extend(
                    instances
                        .into_iter()
                        .map(|instance| (instance.name.clone(), instance)),
                );
            }
        }

        if !groups.is_empty() {
            let action: Arc<dyn ProvisioningAction<Vec<NodeInstance>>> =
                Arc::new(StartInstanceGroupAction::new(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.user),
                    self.bootstrap.clone(),
                ));
            self.coordinator.run(groups, action).await?;
        }
        if !singles.is_empty() {
            let action: Arc<dyn ProvisioningAction<NodeInstance>> =
                Arc::new(StartInstanceAction::new(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.user),
                    self.bootstrap.clone(),
                ));
            self.coordinator.run(singles, action).await?;
        }

        let outcome = ProvisioningWaiter::new(&mut self.wrapper, &self.registry, &self.provisioning)
            .wait_for_instances(&creating)
            .await?;

        Ok(match outcome {
            ProvisioningOutcome::AllCreated => HandlerOutcome::Continue,
            ProvisioningOutcome::Aborted(message) => HandlerOutcome::abort(message),
            ProvisioningOutcome::Reconciled { removed } => {
                self.forced
                    .extend(removed.iter().map(|instance| instance.name.clone()));
                self.retire_best_effort(removed).await;
                HandlerOutcome::Continue
            }
        })
    }

    async fn stop_removing(&mut self) -> Result<HandlerOutcome> {
        let mut tracker = ScalingStateTracker::new(&mut self.wrapper);
        let removing = tracker.instances_in_state(ScaleState::Removing).await?;
        // stopped on an earlier pass but never retired
        let stopped = tracker.instances_in_state(ScaleState::Removed).await?;

        if !removing.is_empty() {
            crate::log_scaling!(info, "STOP_INSTANCES", instances: removing.len());
            self.stop_instances(removing.clone(), true).await?;
        }
        let to_retire: Vec<&NodeInstance> = removing.iter().chain(&stopped).collect();
        self.retire(to_retire).await?;
        Ok(HandlerOutcome::Continue)
    }

    /// Move stopped instances to `gone`
    async fn retire<'i>(&mut self, instances: impl IntoIterator<Item = &'i NodeInstance>) -> Result<()> {
        for instance in instances {
            self.wrapper
                .set_scale_state(&instance.name, ScaleState::Gone)
                .await?;
        }
        Ok(())
    }

    async fn scale_vertically(&mut self) -> Result<HandlerOutcome> {
        let mut tracker = ScalingStateTracker::new(&mut self.wrapper);
        let (node, names) = tracker.scaling_node_and_instances().await?;
        if names.is_empty() {
            return Ok(HandlerOutcome::Continue);
        }

        let pending: Vec<(NodeInstance, ScaleState)> = tracker
            .effective_scale_states()
            .await?
            .into_iter()
            .filter(|(instance, state)| names.contains(&instance.name) && state.is_pending_action())
            .collect();

        let Some(operation) = pending
            .first()
            .and_then(|(_, state)| VerticalOperation::for_state(*state))
        else {
            return Ok(HandlerOutcome::Continue);
        };

        crate::log_scaling!(info, "VERTICAL_SCALING",
            node: node,
            vertical: operation,
            instances: pending.len()
        );
        let tasks = pending
            .into_iter()
            .map(|(instance, _)| (instance.name.clone(), instance));
        let action: Arc<dyn ProvisioningAction<NodeInstance>> =
            Arc::new(VerticalScaleAction::new(Arc::clone(&self.registry), operation));
        self.coordinator.run(tasks, action).await?;
        Ok(HandlerOutcome::Continue)
    }

    async fn stop_instances(&mut self, instances: Vec<NodeInstance>, mark_removed: bool) -> Result<()> {
        let tasks = ConnectorRegistry::group_by_cloud(&instances);
        let action: Arc<dyn ProvisioningAction<Vec<NodeInstance>>> =
            Arc::new(StopInstancesAction::new(Arc::clone(&self.registry), mark_removed));
        self.coordinator.run(tasks, action).await?;
        Ok(())
    }

    /// Stop and retire force-removed instances; on failure they stay
    /// `removing` and a later `Provisioning` pass stops them
    async fn retire_best_effort(&mut self, instances: Vec<NodeInstance>) {
        if let Err(e) = self.stop_instances(instances.clone(), true).await {
            warn!(error = %e, "Could not stop removed instances");
            return;
        }
        if let Err(e) = self.retire(&instances).await {
            warn!(error = %e, "Could not retire removed instances");
        }
    }

    /// Stop the orchestrator's own machine
    async fn terminate_self(&mut self) {
        let name = self.wrapper.instance_name().to_string();
        let cloud = match self.wrapper.own_instance().await {
            Ok(Some(own)) => own.cloud,
            _ => name
                .strip_prefix(namespaces::ORCHESTRATOR)
                .and_then(|rest| rest.strip_prefix(namespaces::ORCHESTRATOR_SUFFIX_SEPARATOR))
                .unwrap_or_default()
                .to_string(),
        };

        let id = match self.wrapper.instance_id(&name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(instance = %name, "Own provider id unknown, cannot self-terminate");
                return;
            }
            Err(e) => {
                warn!(instance = %name, error = %e, "Could not read own provider id");
                return;
            }
        };

        let result = match self.registry.get(&cloud) {
            Ok(connector) => connector.stop_instances_by_ids(&[id.clone()]).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!(instance = %name, vm_id = %id, "Orchestrator terminated its machine"),
            Err(e) => error!(instance = %name, error = %e, "Orchestrator self-termination failed"),
        }
    }
}

#[async_trait]
impl ExecutionContext for OrchestratorContext {
    fn instance_name(&self) -> &str {
        self.wrapper.instance_name()
    }

    fn wrapper(&mut self) -> &mut RunWrapper {
        &mut self.wrapper
    }

    async fn signal_completion(&mut self, _state: ExecutionState) -> Result<()> {
        let own = self.wrapper.instance_name().to_string();
        self.wrapper.complete_state(&own).await?;
        self.forced.signal_all(&mut self.wrapper).await
    }

    async fn poll_interval(&mut self) -> Result<Duration> {
        let run = self.wrapper.run().await?;
        let stopping = run
            .node_instances()
            .any(|instance| instance.scale_state == Some(ScaleState::Removing));
        Ok(if run.mutable || stopping {
            self.executor.poll_interval_short()
        } else {
            self.executor.poll_interval_long()
        })
    }
}

struct ProvisioningHandler;

#[async_trait]
impl PhaseHandler<OrchestratorContext> for ProvisioningHandler {
    async fn handle(
        &self,
        context: &mut OrchestratorContext,
        _state: ExecutionState,
    ) -> Result<HandlerOutcome> {
        context.wrapper.discard_cache();
        let global = ScalingStateTracker::new(&mut context.wrapper)
            .global_scale_state()
            .await?;
        let Some(global) = global else {
            info!("No scaling operation in flight");
            return Ok(HandlerOutcome::Continue);
        };

        crate::log_run!(info, "PROVISIONING", scale_state: global);
        match global.class() {
            ScaleClass::Creation => context.start_and_wait().await,
            ScaleClass::Removal => context.stop_removing().await,
            class if class.is_vertical() => context.scale_vertically().await,
            _ => Ok(HandlerOutcome::Continue),
        }
    }
}

struct FinalizingHandler;

#[async_trait]
impl PhaseHandler<OrchestratorContext> for FinalizingHandler {
    async fn handle(
        &self,
        context: &mut OrchestratorContext,
        state: ExecutionState,
    ) -> Result<HandlerOutcome> {
        context.wrapper.discard_cache();
        let remaining: Vec<NodeInstance> = context
            .wrapper
            .node_instances()
            .await?
            .into_iter()
            .filter(|instance| {
                !matches!(
                    instance.scale_state,
                    Some(ScaleState::Gone) | Some(ScaleState::Removed)
                )
            })
            .collect();

        info!(instances = remaining.len(), "Stopping all instances");
        if let Err(e) = context.stop_instances(remaining, false).await {
            error!(error = %e, "Failed to stop some instances during finalization");
        }

        context.signal_completion(state).await?;
        context.terminate_self().await;
        Ok(HandlerOutcome::Terminal)
    }
}

pub fn orchestrator_handler_registry() -> HandlerRegistry<OrchestratorContext> {
    HandlerRegistry::new()
        .with_many(
            &[
                ExecutionState::Inactive,
                ExecutionState::Initializing,
                ExecutionState::Executing,
                ExecutionState::SendingReports,
                ExecutionState::Ready,
            ],
            Arc::new(NoopHandler),
        )
        .with(ExecutionState::Provisioning, Arc::new(ProvisioningHandler))
        .with(ExecutionState::Finalizing, Arc::new(FinalizingHandler))
        .with_many(
            &[
                ExecutionState::Done,
                ExecutionState::Cancelled,
                ExecutionState::Aborted,
            ],
            Arc::new(TerminalHandler),
        )
}

pub type OrchestratorExecutor = ExecutionStateMachine<OrchestratorContext>;

pub fn orchestrator_executor(context: OrchestratorContext) -> OrchestratorExecutor {
    let backoff = ExponentialBackoff::from_config(&context.executor.state_read_backoff());
    ExecutionStateMachine::new(context, orchestrator_handler_registry(), backoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_state() {
        let registry = orchestrator_handler_registry();
        assert!(ExecutionState::ALL.iter().all(|state| registry.contains(*state)));
    }
}
