//! # Orchestration
//!
//! Orchestrator-side provisioning machinery:
//!
//! - [`ScalingStateTracker`]: run-wide scaling state from per-instance scale states
//! - [`ProvisioningCoordinator`]: bounded, fail-fast fan-out of provisioning actions
//! - [`ProvisioningWaiter`]: waits for started instances and enforces failure tolerance
//! - provisioning actions: start, stop and vertical scaling through cloud connectors

pub mod actions;
pub mod coordinator;
pub mod provisioning;
pub mod scaling;

pub use actions::{
    BootstrapSettings, StartInstanceAction, StartInstanceGroupAction, StopInstancesAction,
    VerticalOperation, VerticalScaleAction,
};
pub use coordinator::{CoordinatorReport, ProvisioningAction, ProvisioningCoordinator};
pub use provisioning::{
    FailuresByNode, ForcedCompletions, ProvisioningOutcome, ProvisioningTolerance,
    ProvisioningWaiter,
};
pub use scaling::{aggregate_scale_states, scaling_node, ScalingStateTracker};
