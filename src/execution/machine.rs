//! # Execution State Machine
//!
//! Drives one node or orchestrator through the run's global execution states.
//!
//! Each cycle reads the global state, runs the handler registered for it and
//! signals completion, then polls until the state changes. A handler error is
//! recorded as a run failure (abort flag), reports are sent best effort and
//! completion is still signalled so the run can move on to its teardown.
//! Terminal handlers end the loop without signalling completion. Shutdown
//! requests stop the loop without touching the run.

use super::handlers::{ExecutionContext, HandlerRegistry};
use super::shutdown::ShutdownSignal;
use crate::error::{DeployerError, Result};
use crate::resilience::ExponentialBackoff;
use crate::state_machine::{ExecutionState, HandlerOutcome};
use tracing::{debug, error, info, instrument, warn};

/// How a state machine run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// A terminal handler ended the loop in this state
    Finished(ExecutionState),
    /// Local shutdown was requested
    Shutdown,
}

pub struct ExecutionStateMachine<C: ExecutionContext + 'static> {
    context: C,
    handlers: HandlerRegistry<C>,
    state_backoff: ExponentialBackoff,
    shutdown: ShutdownSignal,
}

impl<C: ExecutionContext + 'static> ExecutionStateMachine<C> {
    pub fn new(context: C, handlers: HandlerRegistry<C>, state_backoff: ExponentialBackoff) -> Self {
        Self {
            context,
            handlers,
            state_backoff,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    /// Run until a terminal handler, a fatal error or a shutdown request.
    /// Fatal errors are written to the run's abort flag before returning.
    #[instrument(skip(self), fields(instance = %self.context.instance_name()))]
    pub async fn run(&mut self) -> Result<ExecutionOutcome> {
        let mut shutdown = self.shutdown.clone();
        let result = tokio::select! {
            biased;
            _ = shutdown.requested() => {
                info!("Shutdown requested, leaving execution loop");
                return Ok(ExecutionOutcome::Shutdown);
            }
            result = self.drive() => result,
        };

        match result {
            Ok(state) => {
                crate::log_run!(info, "EXECUTION_FINISHED", state: state);
                Ok(ExecutionOutcome::Finished(state))
            }
            Err(e) if e.is_shutdown() => Ok(ExecutionOutcome::Shutdown),
            Err(e) => {
                error!(error = %e, "Fatal execution error");
                if let Err(record_error) = self.context.wrapper().fail(&e.to_string()).await {
                    error!(error = %record_error, "Failed to record fatal error on the run");
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<ExecutionState> {
        let mut state = self.read_state().await?;
        loop {
            let stop = self.execute_phase(state).await?;
            if stop || state.is_terminal() {
                return Ok(state);
            }
            state = self.wait_for_state_change(state).await?;
        }
    }

    /// Run the handler of `state` and signal completion; `true` when the loop should end
    pub async fn execute_phase(&mut self, state: ExecutionState) -> Result<bool> {
        self.shutdown.ensure_running()?;
        let handler = self
            .handlers
            .get(state)
            .ok_or_else(|| DeployerError::MissingHandler {
                state: state.to_string(),
            })?;

        crate::log_run!(info, "PHASE_STARTED", state: state);
        let outcome = match handler.handle(&mut self.context, state).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_shutdown() => return Err(e),
            Err(e) => {
                self.record_failure(state, &e).await;
                HandlerOutcome::Continue
            }
        };

        if !outcome.signals_completion() {
            debug!(state = %state, "Terminal handler, not signalling completion");
            return Ok(true);
        }
        if let HandlerOutcome::Abort(reason) = &outcome {
            warn!(state = %state, reason = %reason, "Run aborted during phase");
        }

        self.context.signal_completion(state).await?;
        crate::log_run!(info, "PHASE_COMPLETED", state: state, outcome: outcome.outcome_type());
        Ok(false)
    }

    async fn record_failure(&mut self, state: ExecutionState, failure: &DeployerError) {
        error!(state = %state, error = %failure, "Phase handler failed");
        if let Err(e) = self.context.wrapper().fail(&failure.to_string()).await {
            error!(error = %e, "Failed to record failure on the run");
        }

        if state == ExecutionState::SendingReports {
            return;
        }
        if let Some(reports) = self.handlers.get(ExecutionState::SendingReports) {
            if let Err(e) = reports
                .handle(&mut self.context, ExecutionState::SendingReports)
                .await
            {
                warn!(error = %e, "Sending reports after failure did not succeed");
            }
        }
    }

    async fn read_state(&mut self) -> Result<ExecutionState> {
        self.context
            .wrapper()
            .read_global_state(&self.state_backoff)
            .await
    }

    async fn wait_for_state_change(&mut self, current: ExecutionState) -> Result<ExecutionState> {
        loop {
            let interval = self.context.poll_interval().await?;
            tokio::time::sleep(interval).await;

            self.shutdown.ensure_running()?;

            let next = self.read_state().await?;
            if next == current {
                continue;
            }

            let mutable = match self.context.wrapper().is_mutable().await {
                Ok(mutable) => mutable,
                Err(e) => {
                    warn!(error = %e, "Could not read run mutability, checking transition as immutable");
                    false
                }
            };
            if !current.is_expected_transition(next, mutable) {
                warn!(from = %current, to = %next, "Unexpected state transition");
            }
            info!(from = %current, to = %next, "Global state changed");
            return Ok(next);
        }
    }
}
