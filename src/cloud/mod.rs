//! # Cloud Connectors
//!
//! Provider abstraction used by the orchestrator to start, stop, list and
//! vertically scale instances.

pub mod capabilities;
pub mod connector;
pub mod registry;

pub use capabilities::{Capability, CapabilitySet};
pub use connector::{CloudConnector, StartRequest, UserInfo, VmHandle};
pub use registry::ConnectorRegistry;
