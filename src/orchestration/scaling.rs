//! # Scaling State Tracker
//!
//! Derives the run-wide scaling picture from per-instance scale states.
//!
//! Cached scale states are trusted only when terminal (`operational`, `gone`);
//! anything in flight is re-read from the run service. At most one scaling
//! step may be in flight per run: all non-terminal instances share a single
//! scale state and a single node type. Violations are reported as
//! [`DeployerError::InconsistentState`] and never repaired here.

use crate::error::{DeployerError, Result};
use crate::models::NodeInstance;
use crate::parameters::RunWrapper;
use crate::state_machine::ScaleState;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct ScalingStateTracker<'w> {
    wrapper: &'w mut RunWrapper,
}

impl<'w> ScalingStateTracker<'w> {
    pub fn new(wrapper: &'w mut RunWrapper) -> Self {
        Self { wrapper }
    }

    /// Scale state of `instance`, re-read remotely unless the cached one is terminal
    pub async fn effective_scale_state(&mut self, instance: &NodeInstance) -> Result<ScaleState> {
        if let Some(cached) = instance.scale_state.filter(ScaleState::is_terminal) {
            return Ok(cached);
        }
        let fresh = self.wrapper.scale_state(&instance.name).await?;
        Ok(fresh.or(instance.scale_state).unwrap_or_default())
    }

    /// Effective scale states of every node instance in the run
    pub async fn effective_scale_states(&mut self) -> Result<Vec<(NodeInstance, ScaleState)>> {
        let instances = self.wrapper.node_instances().await?;
        let mut states = Vec::with_capacity(instances.len());
        for instance in instances {
            let state = self.effective_scale_state(&instance).await?;
            states.push((instance, state));
        }
        Ok(states)
    }

    /// The single scaling state in flight, or `None` when everything is settled
    pub async fn global_scale_state(&mut self) -> Result<Option<ScaleState>> {
        let states = self.effective_scale_states().await?;
        aggregate_scale_states(states.iter().map(|(_, state)| *state))
    }

    /// Node type being scaled and its instances mid-operation.
    /// Returns an empty node name and no instances when nothing is scaling.
    pub async fn scaling_node_and_instances(&mut self) -> Result<(String, Vec<String>)> {
        let states = self.effective_scale_states().await?;
        scaling_node(
            states
                .iter()
                .map(|(instance, state)| (instance.node_name.as_str(), instance.name.as_str(), *state)),
        )
    }

    pub async fn instances_in_state(&mut self, state: ScaleState) -> Result<Vec<NodeInstance>> {
        Ok(self
            .effective_scale_states()
            .await?
            .into_iter()
            .filter(|(_, current)| *current == state)
            .map(|(instance, _)| instance)
            .collect())
    }

    pub async fn set_scale_state(&mut self, instance_name: &str, state: ScaleState) -> Result<()> {
        self.wrapper.set_scale_state(instance_name, state).await
    }
}

/// Reduce instance scale states to the run-wide one.
///
/// Terminal states are ignored. Any two distinct non-terminal states, even
/// from the same class (`creating` next to `created`), mean more than one
/// scaling step is in flight and are rejected.
pub fn aggregate_scale_states(
    states: impl IntoIterator<Item = ScaleState>,
) -> Result<Option<ScaleState>> {
    let active: BTreeSet<ScaleState> = states
        .into_iter()
        .filter(|state| !state.is_terminal())
        .collect();

    if active.len() > 1 {
        return Err(DeployerError::InconsistentState(format!(
            "multiple scaling operations in flight: {}",
            active
                .iter()
                .map(ScaleState::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(active.into_iter().next())
}

/// Find the one node type with instances mid-operation.
///
/// Input is `(node_name, instance_name, state)` per instance. Every
/// non-terminal instance must belong to the same node type.
pub fn scaling_node<'a>(
    states: impl IntoIterator<Item = (&'a str, &'a str, ScaleState)>,
) -> Result<(String, Vec<String>)> {
    let mut by_node: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (node, instance, state) in states {
        if !state.is_terminal() {
            by_node.entry(node).or_default().push(instance.to_string());
        }
    }

    if by_node.len() > 1 {
        return Err(DeployerError::InconsistentState(format!(
            "scaling spans several node types: {}",
            by_node.keys().copied().collect::<Vec<_>>().join(", ")
        )));
    }

    Ok(match by_node.into_iter().next() {
        Some((node, instances)) => {
            debug!(node = node, instances = ?instances, "Scaling in progress");
            (node.to_string(), instances)
        }
        None => (String::new(), Vec::new()),
    })
}
