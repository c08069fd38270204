//! # Models
//!
//! Data carried between the remote run service, the orchestrator and the cloud
//! connectors.

pub mod node_instance;
pub mod run;

pub use node_instance::NodeInstance;
pub use run::{NodeDefinition, RunCategory, RunDocument};
