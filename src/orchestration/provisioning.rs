//! # Provisioning Wait and Failure Tolerance
//!
//! After starting instances the orchestrator waits for every one of them to
//! leave `creating`. The wait is bounded by the configured timeout (scaled by
//! a safety factor), ends early when the run is aborted, and every few cycles
//! asks the providers which machines have failed. A node type that loses more
//! instances than its tolerance fails the run; otherwise failed and stuck
//! instances are removed and the deployment carries on without them.

use crate::cloud::ConnectorRegistry;
use crate::config::ProvisioningConfig;
use crate::error::{DeployerError, Result};
use crate::models::NodeInstance;
use crate::parameters::RunWrapper;
use crate::state_machine::ScaleState;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::scaling::ScalingStateTracker;

/// Instance names per node type
pub type FailuresByNode = BTreeMap<String, BTreeSet<String>>;

/// Allowed provisioning failures per node type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningTolerance {
    limits: HashMap<String, u32>,
}

impl ProvisioningTolerance {
    /// Tolerance of a node is the largest value declared by any of its instances
    pub fn from_instances<'a>(instances: impl IntoIterator<Item = &'a NodeInstance>) -> Self {
        let mut limits: HashMap<String, u32> = HashMap::new();
        for instance in instances {
            let limit = limits.entry(instance.node_name.clone()).or_default();
            *limit = (*limit).max(instance.max_provisioning_failures);
        }
        Self { limits }
    }

    pub fn limit(&self, node_name: &str) -> u32 {
        self.limits.get(node_name).copied().unwrap_or(0)
    }

    pub fn check(&self, failures: &FailuresByNode) -> Result<()> {
        for (node, failed) in failures {
            let tolerated = self.limit(node);
            if failed.len() > tolerated as usize {
                crate::log_scaling!(error, "FAILURES_EXCEEDED",
                    node: node,
                    failed: failed.len(),
                    tolerated: tolerated
                );
                return Err(DeployerError::ProvisioningFailureExceeded {
                    node: node.clone(),
                    failed: failed.len(),
                    tolerated,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningOutcome {
    /// Every started instance left `creating`
    AllCreated,
    /// The run was aborted while waiting
    Aborted(String),
    /// Failed or stuck instances were removed within tolerance
    Reconciled { removed: Vec<NodeInstance> },
}

pub struct ProvisioningWaiter<'a> {
    wrapper: &'a mut RunWrapper,
    registry: &'a ConnectorRegistry,
    config: &'a ProvisioningConfig,
}

impl<'a> ProvisioningWaiter<'a> {
    pub fn new(
        wrapper: &'a mut RunWrapper,
        registry: &'a ConnectorRegistry,
        config: &'a ProvisioningConfig,
    ) -> Self {
        Self {
            wrapper,
            registry,
            config,
        }
    }

    /// Wait until `started` instances have all left `creating`, then reconcile
    pub async fn wait_for_instances(&mut self, started: &[NodeInstance]) -> Result<ProvisioningOutcome> {
        let tolerance = ProvisioningTolerance::from_instances(started);
        let timeout = self.config.effective_wait_timeout();
        let deadline = Instant::now() + timeout;
        let check_every = self.config.failure_check_every.max(1);
        let mut cycle: u32 = 0;

        crate::log_scaling!(info, "WAIT_STARTED",
            instances: started.len(),
            timeout_secs: timeout.as_secs()
        );

        loop {
            if let Some(message) = self.wrapper.abort_message().await? {
                warn!(abort = %message, "Run aborted while waiting for instances");
                return Ok(ProvisioningOutcome::Aborted(message));
            }

            let creating = self.still_creating(started).await?;
            if creating.is_empty() {
                info!(instances = started.len(), "All instances left creating");
                return Ok(ProvisioningOutcome::AllCreated);
            }

            if cycle % check_every == 0 {
                let failures = self.provider_failures(started).await?;
                tolerance.check(&failures)?;
                let failed: HashSet<&String> = failures.values().flatten().collect();
                if creating.iter().all(|name| failed.contains(name)) {
                    debug!(failed = failed.len(), "Only failed instances left, reconciling early");
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(still_creating = ?creating, "Timed out waiting for instances");
                break;
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
            cycle += 1;
        }

        self.reconcile(started, &tolerance).await
    }

    async fn still_creating(&mut self, started: &[NodeInstance]) -> Result<BTreeSet<String>> {
        let mut tracker = ScalingStateTracker::new(&mut *self.wrapper);
        let mut creating = BTreeSet::new();
        for instance in started {
            let assumed_creating = NodeInstance {
                scale_state: Some(ScaleState::Creating),
                ..instance.clone()
            };
            if tracker.effective_scale_state(&assumed_creating).await? == ScaleState::Creating {
                creating.insert(instance.name.clone());
            }
        }
        Ok(creating)
    }

    /// Started instances the providers report as failed, grouped by node
    async fn provider_failures(&mut self, started: &[NodeInstance]) -> Result<FailuresByNode> {
        let grouped = ConnectorRegistry::group_by_cloud(started);
        let connectors = grouped
            .keys()
            .map(|cloud| self.registry.get(cloud))
            .collect::<Result<Vec<_>>>()?;

        // one listing per cloud, queried concurrently
        let listings = try_join_all(connectors.iter().map(|connector| async move {
            let vms = connector.list_instances().await?;
            Ok::<HashSet<String>, DeployerError>(
                vms.iter()
                    .filter(|vm| connector.has_failed(vm))
                    .map(|vm| connector.instance_id(vm))
                    .collect(),
            )
        }))
        .await?;

        let mut failures = FailuresByNode::new();
        for ((_, instances), failed_ids) in grouped.into_iter().zip(listings) {
            if failed_ids.is_empty() {
                continue;
            }
            for instance in instances {
                if let Some(id) = self.wrapper.instance_id(&instance.name).await? {
                    if failed_ids.contains(&id) {
                        failures
                            .entry(instance.node_name.clone())
                            .or_default()
                            .insert(instance.name.clone());
                    }
                }
            }
        }
        Ok(failures)
    }

    /// Remove failed and stuck instances if every node stays within tolerance
    async fn reconcile(
        &mut self,
        started: &[NodeInstance],
        tolerance: &ProvisioningTolerance,
    ) -> Result<ProvisioningOutcome> {
        let mut unusable = self.provider_failures(started).await?;
        tolerance.check(&unusable)?;

        let creating = self.still_creating(started).await?;
        for instance in started.iter().filter(|i| creating.contains(&i.name)) {
            unusable
                .entry(instance.node_name.clone())
                .or_default()
                .insert(instance.name.clone());
        }
        tolerance.check(&unusable)?;

        let names: HashSet<&String> = unusable.values().flatten().collect();
        let removed: Vec<NodeInstance> = started
            .iter()
            .filter(|instance| names.contains(&instance.name))
            .cloned()
            .collect();

        for instance in &removed {
            self.wrapper
                .set_scale_state(&instance.name, ScaleState::Removing)
                .await?;
        }
        for (node, instances) in &unusable {
            let ids: Vec<u32> = started
                .iter()
                .filter(|instance| instances.contains(&instance.name))
                .filter_map(NodeInstance::index)
                .collect();
            self.wrapper.remove_instances(node, &ids).await?;
        }

        crate::log_scaling!(warn, "INSTANCES_REMOVED",
            removed: removed.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
        );
        Ok(ProvisioningOutcome::Reconciled { removed })
    }
}

/// Instances whose phase completion the orchestrator signals on their behalf.
///
/// Entries are never dropped: a forced removal is final for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedCompletions {
    names: BTreeSet<String>,
}

impl ForcedCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, instance_name: impl Into<String>) {
        self.names.insert(instance_name.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.names.extend(names);
    }

    pub fn contains(&self, instance_name: &str) -> bool {
        self.names.contains(instance_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Signal phase completion for every forced instance
    pub async fn signal_all(&self, wrapper: &mut RunWrapper) -> Result<()> {
        for name in &self.names {
            wrapper.complete_state(name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failures(entries: &[(&str, &[&str])]) -> FailuresByNode {
        entries
            .iter()
            .map(|(node, names)| {
                (
                    node.to_string(),
                    names.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_tolerance_is_max_per_node() {
        let instances = vec![
            NodeInstance::new("web", 1, "a").with_max_provisioning_failures(0),
            NodeInstance::new("web", 2, "a").with_max_provisioning_failures(2),
            NodeInstance::new("db", 1, "a"),
        ];
        let tolerance = ProvisioningTolerance::from_instances(&instances);
        assert_eq!(tolerance.limit("web"), 2);
        assert_eq!(tolerance.limit("db"), 0);
        assert_eq!(tolerance.limit("unknown"), 0);
    }

    #[test]
    fn test_tolerance_check() {
        let instances = vec![
            NodeInstance::new("web", 1, "a").with_max_provisioning_failures(1),
            NodeInstance::new("web", 2, "a").with_max_provisioning_failures(1),
            NodeInstance::new("web", 3, "a").with_max_provisioning_failures(1),
        ];
        let tolerance = ProvisioningTolerance::from_instances(&instances);

        assert!(tolerance.check(&failures(&[("web", &["web.2"])])).is_ok());
        let err = tolerance
            .check(&failures(&[("web", &["web.1", "web.3"])]))
            .unwrap_err();
        assert!(matches!(
            err,
            DeployerError::ProvisioningFailureExceeded { failed: 2, tolerated: 1, .. }
        ));
    }

    #[test]
    fn test_forced_completions_are_kept() {
        let mut forced = ForcedCompletions::new();
        forced.add("web.2");
        forced.extend(vec!["web.3".to_string(), "web.2".to_string()]);
        assert_eq!(forced.len(), 2);
        assert!(forced.contains("web.3"));
        assert_eq!(forced.iter().collect::<Vec<_>>(), vec!["web.2", "web.3"]);
    }
}
