//! # Runtime Parameters
//!
//! Key qualification and the instance-scoped [`RunWrapper`] over the run
//! service client.

pub mod qualifier;
pub mod wrapper;

pub use qualifier::{
    has_multiplicity_index, is_node_level_property, is_orchestrator_name, qualify,
    strip_multiplicity_index, validate_instance_name, KeyQualifier,
};
pub use wrapper::{RunWrapper, RunWrapperFactory};
