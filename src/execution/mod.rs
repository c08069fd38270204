//! # Execution
//!
//! The execution state machine and its two roles:
//!
//! - [`node_executor`]: a regular node instance
//! - [`orchestrator_executor`]: the per-cloud orchestrator
//!
//! Both share one loop ([`ExecutionStateMachine`]) and differ only in the
//! handlers they register per execution state.

pub mod handlers;
pub mod machine;
pub mod node_executor;
pub mod orchestrator_executor;
pub mod shutdown;

pub use handlers::{ExecutionContext, HandlerRegistry, NoopHandler, PhaseHandler, TerminalHandler};
pub use machine::{ExecutionOutcome, ExecutionStateMachine};
pub use node_executor::{node_executor, NodeContext, NodeExecutor, NodeHooks, NoopHooks};
pub use orchestrator_executor::{orchestrator_executor, OrchestratorContext, OrchestratorExecutor};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
