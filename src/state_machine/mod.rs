// State vocabulary for deployment runs
//
// Execution states are driven by the remote run service through the global
// state parameter; scale states are tracked per node instance.

pub mod events;
pub mod scale_states;
pub mod states;

pub use events::HandlerOutcome;
pub use scale_states::{ScaleClass, ScaleState};
pub use states::ExecutionState;
