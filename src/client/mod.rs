//! # Run Service Clients
//!
//! Access to the remote run service: the [`ParameterStore`] contract, an HTTP
//! implementation and an in-memory service for local runs and tests.

pub mod http;
pub mod memory;
pub mod traits;

pub use http::{HttpParameterStore, HttpParameterStoreFactory};
pub use memory::{InMemoryParameterStore, InMemoryRunService, InstanceRemoval, PhaseCompletion};
pub use traits::{ParameterStore, ParameterStoreFactory};
