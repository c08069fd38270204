//! Phase handlers and the state-to-handler table.
//!
//! Each role (node or orchestrator) registers one handler per execution state
//! in a [`HandlerRegistry`]; the state machine looks handlers up by state
//! instead of dispatching on role-specific method names.

use crate::error::Result;
use crate::parameters::RunWrapper;
use crate::state_machine::{ExecutionState, HandlerOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Role-specific state shared by the handlers of one state machine
#[async_trait]
pub trait ExecutionContext: Send {
    fn instance_name(&self) -> &str;

    fn wrapper(&mut self) -> &mut RunWrapper;

    /// Report that local work for `state` is done
    async fn signal_completion(&mut self, _state: ExecutionState) -> Result<()> {
        let wrapper = self.wrapper();
        let instance = wrapper.instance_name().to_string();
        wrapper.complete_state(&instance).await
    }

    /// How long to wait between global state reads
    async fn poll_interval(&mut self) -> Result<Duration>;
}

#[async_trait]
pub trait PhaseHandler<C: Send + 'static>: Send + Sync {
    async fn handle(&self, context: &mut C, state: ExecutionState) -> Result<HandlerOutcome>;
}

/// Handler table keyed by execution state
pub struct HandlerRegistry<C: Send + 'static> {
    handlers: HashMap<ExecutionState, Arc<dyn PhaseHandler<C>>>,
}

impl<C: Send + 'static> std::fmt::Debug for HandlerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut states: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        states.sort();
        f.debug_struct("HandlerRegistry")
            .field("states", &states)
            .finish()
    }
}

impl<C: Send + 'static> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Send + 'static> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, state: ExecutionState, handler: Arc<dyn PhaseHandler<C>>) {
        self.handlers.insert(state, handler);
    }

    pub fn with(mut self, state: ExecutionState, handler: Arc<dyn PhaseHandler<C>>) -> Self {
        self.register(state, handler);
        self
    }

    /// Register the same handler for several states
    pub fn with_many(
        mut self,
        states: &[ExecutionState],
        handler: Arc<dyn PhaseHandler<C>>,
    ) -> Self {
        for state in states {
            self.register(*state, Arc::clone(&handler));
        }
        self
    }

    pub fn get(&self, state: ExecutionState) -> Option<Arc<dyn PhaseHandler<C>>> {
        self.handlers.get(&state).cloned()
    }

    pub fn contains(&self, state: ExecutionState) -> bool {
        self.handlers.contains_key(&state)
    }
}

/// Nothing to do locally; completion is signalled
pub struct NoopHandler;

#[async_trait]
impl<C: Send + 'static> PhaseHandler<C> for NoopHandler {
    async fn handle(&self, _context: &mut C, _state: ExecutionState) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }
}

/// Run is over for this role; stop the loop
pub struct TerminalHandler;

#[async_trait]
impl<C: Send + 'static> PhaseHandler<C> for TerminalHandler {
    async fn handle(&self, _context: &mut C, _state: ExecutionState) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Terminal)
    }
}
