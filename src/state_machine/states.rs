use serde::{Deserialize, Serialize};
use std::fmt;

/// Global execution states shared by the orchestrator and every node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Run created but not started
    Inactive,
    Initializing,
    /// Instances are being created, removed or resized
    Provisioning,
    /// Node instances run their deployment targets
    Executing,
    /// Diagnostic artifacts are collected
    SendingReports,
    /// Deployment is up; a mutable run may be scaled from here
    Ready,
    /// Instances are being torn down
    Finalizing,
    Done,
    Cancelled,
    Aborted,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 10] = [
        Self::Inactive,
        Self::Initializing,
        Self::Provisioning,
        Self::Executing,
        Self::SendingReports,
        Self::Ready,
        Self::Finalizing,
        Self::Done,
        Self::Cancelled,
        Self::Aborted,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Aborted)
    }

    /// The phase normally following this one. `Ready` loops back to
    /// `Provisioning` only for mutable runs, and only when a scaling request
    /// arrives; `None` for terminal states.
    pub fn next(&self, mutable: bool) -> Option<ExecutionState> {
        match self {
            Self::Inactive => Some(Self::Initializing),
            Self::Initializing => Some(Self::Provisioning),
            Self::Provisioning => Some(Self::Executing),
            Self::Executing => Some(Self::SendingReports),
            Self::SendingReports => Some(Self::Ready),
            Self::Ready if mutable => Some(Self::Provisioning),
            Self::Ready => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Done),
            Self::Done | Self::Cancelled | Self::Aborted => None,
        }
    }

    /// Whether the remote service moving from `self` to `to` is a transition the
    /// executors expect. Unexpected transitions are still followed, since the
    /// remote service is authoritative; they are only reported.
    pub fn is_expected_transition(&self, to: ExecutionState, mutable: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, Self::Cancelled) | (_, Self::Aborted) => true,
            // failures skip straight to report collection
            (_, Self::SendingReports) => true,
            (Self::Ready, Self::Finalizing) => true,
            (from, to) => from.next(mutable) == Some(to),
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "Inactive",
            Self::Initializing => "Initializing",
            Self::Provisioning => "Provisioning",
            Self::Executing => "Executing",
            Self::SendingReports => "SendingReports",
            Self::Ready => "Ready",
            Self::Finalizing => "Finalizing",
            Self::Done => "Done",
            Self::Cancelled => "Cancelled",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.to_string() == s.trim())
            .copied()
            .ok_or_else(|| format!("Invalid execution state: {s}"))
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::Inactive
    }
}
