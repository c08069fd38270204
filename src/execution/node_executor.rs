//! # Node Executor
//!
//! State machine role of a regular node instance. The node reports itself
//! `created` once it is up, runs its deployment (or image build) hook while
//! the run executes, and runs the pre/post scaling hooks around vertical
//! scaling and removal. Once the run is `Ready` a node that finished a scaling
//! step settles back to `operational`, so a mutable run can scale again.
//! What the hooks do is up to the embedding application.

use super::handlers::{ExecutionContext, HandlerRegistry, NoopHandler, PhaseHandler, TerminalHandler};
use super::machine::ExecutionStateMachine;
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::models::RunCategory;
use crate::parameters::RunWrapper;
use crate::resilience::ExponentialBackoff;
use crate::state_machine::{ExecutionState, HandlerOutcome, ScaleState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application callbacks run by a node during the run
#[async_trait]
pub trait NodeHooks: Send + Sync {
    /// Deploy the node's software; runs once the instance is `created`
    async fn deploy(&self, _instance_name: &str) -> Result<()> {
        Ok(())
    }

    /// Prepare the machine for image capture; replaces `deploy` in image build runs
    async fn build_image(&self, _instance_name: &str) -> Result<()> {
        Ok(())
    }

    /// Before the orchestrator removes or vertically scales this instance
    async fn pre_scale(&self, _instance_name: &str, _state: ScaleState) -> Result<()> {
        Ok(())
    }

    /// After a vertical scaling operation on this instance completed
    async fn post_scale(&self, _instance_name: &str, _state: ScaleState) -> Result<()> {
        Ok(())
    }

    async fn send_reports(&self, _instance_name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl NodeHooks for NoopHooks {}

pub struct NodeContext {
    wrapper: RunWrapper,
    hooks: Arc<dyn NodeHooks>,
    config: ExecutorConfig,
}

impl NodeContext {
    pub fn new(wrapper: RunWrapper, hooks: Arc<dyn NodeHooks>, config: ExecutorConfig) -> Self {
        Self {
            wrapper,
            hooks,
            config,
        }
    }

    /// Own scale state, read fresh
    async fn own_scale_state(&mut self) -> Result<ScaleState> {
        let name = self.wrapper.instance_name().to_string();
        Ok(self.wrapper.scale_state(&name).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ExecutionContext for NodeContext {
    fn instance_name(&self) -> &str {
        self.wrapper.instance_name()
    }

    fn wrapper(&mut self) -> &mut RunWrapper {
        &mut self.wrapper
    }

    async fn poll_interval(&mut self) -> Result<Duration> {
        Ok(if self.wrapper.is_mutable().await? {
            self.config.poll_interval_short()
        } else {
            self.config.poll_interval_long()
        })
    }
}

struct ProvisioningHandler;

#[async_trait]
impl PhaseHandler<NodeContext> for ProvisioningHandler {
    async fn handle(&self, context: &mut NodeContext, _state: ExecutionState) -> Result<HandlerOutcome> {
        context.wrapper.discard_cache();
        let name = context.wrapper.instance_name().to_string();
        match context.own_scale_state().await? {
            ScaleState::Creating => {
                context.wrapper.set_scale_state(&name, ScaleState::Created).await?;
                info!(instance = %name, "Instance reported created");
            }
            ScaleState::Gone => return Ok(HandlerOutcome::Terminal),
            state @ (ScaleState::Removing
            | ScaleState::Resizing
            | ScaleState::DiskAttaching
            | ScaleState::DiskDetaching) => {
                context.hooks.pre_scale(&name, state).await?;
            }
            _ => {}
        }
        Ok(HandlerOutcome::Continue)
    }
}

struct ExecutingHandler;

#[async_trait]
impl PhaseHandler<NodeContext> for ExecutingHandler {
    async fn handle(&self, context: &mut NodeContext, _state: ExecutionState) -> Result<HandlerOutcome> {
        if let Some(message) = context.wrapper.abort_message().await? {
            return Ok(HandlerOutcome::abort(message));
        }
        let name = context.wrapper.instance_name().to_string();
        match context.own_scale_state().await? {
            ScaleState::Created => {
                let category = context.wrapper.run().await?.category;
                match category {
                    RunCategory::Deployment => context.hooks.deploy(&name).await?,
                    RunCategory::ImageBuild => context.hooks.build_image(&name).await?,
                }
            }
            state @ (ScaleState::Resized | ScaleState::DiskAttached | ScaleState::DiskDetached) => {
                context.hooks.post_scale(&name, state).await?;
            }
            ScaleState::Gone | ScaleState::Removed => return Ok(HandlerOutcome::Terminal),
            _ => {}
        }
        Ok(HandlerOutcome::Continue)
    }
}

struct SendingReportsHandler;

#[async_trait]
impl PhaseHandler<NodeContext> for SendingReportsHandler {
    async fn handle(&self, context: &mut NodeContext, _state: ExecutionState) -> Result<HandlerOutcome> {
        let name = context.wrapper.instance_name().to_string();
        context.hooks.send_reports(&name).await?;
        Ok(HandlerOutcome::Continue)
    }
}

struct ReadyHandler;

#[async_trait]
impl PhaseHandler<NodeContext> for ReadyHandler {
    async fn handle(&self, context: &mut NodeContext, _state: ExecutionState) -> Result<HandlerOutcome> {
        let name = context.wrapper.instance_name().to_string();
        match context.own_scale_state().await? {
            state @ (ScaleState::Created
            | ScaleState::Resized
            | ScaleState::DiskAttached
            | ScaleState::DiskDetached) => {
                context.wrapper.set_scale_state(&name, ScaleState::Operational).await?;
                info!(instance = %name, from = %state, "Instance operational");
            }
            ScaleState::Gone | ScaleState::Removed => return Ok(HandlerOutcome::Terminal),
            _ => {}
        }
        Ok(HandlerOutcome::Continue)
    }
}

pub fn node_handler_registry() -> HandlerRegistry<NodeContext> {
    HandlerRegistry::new()
        .with_many(
            &[
                ExecutionState::Inactive,
                ExecutionState::Initializing,
                ExecutionState::Finalizing,
            ],
            Arc::new(NoopHandler),
        )
        .with(ExecutionState::Provisioning, Arc::new(ProvisioningHandler))
        .with(ExecutionState::Executing, Arc::new(ExecutingHandler))
        .with(ExecutionState::SendingReports, Arc::new(SendingReportsHandler))
        .with(ExecutionState::Ready, Arc::new(ReadyHandler))
        .with_many(
            &[
                ExecutionState::Done,
                ExecutionState::Cancelled,
                ExecutionState::Aborted,
            ],
            Arc::new(TerminalHandler),
        )
}

pub type NodeExecutor = ExecutionStateMachine<NodeContext>;

pub fn node_executor(wrapper: RunWrapper, hooks: Arc<dyn NodeHooks>, config: &ExecutorConfig) -> NodeExecutor {
    let backoff = ExponentialBackoff::from_config(&config.state_read_backoff());
    ExecutionStateMachine::new(
        NodeContext::new(wrapper, hooks, config.clone()),
        node_handler_registry(),
        backoff,
    )
}
