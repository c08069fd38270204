//! # Provisioning Coordinator
//!
//! Bounded fan-out of per-instance provisioning actions.
//!
//! Tasks are keyed by instance (or cloud) name and drained from a shared
//! queue by `min(max_workers, task_count)` workers. Every worker owns its own
//! [`RunWrapper`], since run service clients must not be shared. The first
//! failing task aborts the remaining workers and its error is returned to the
//! caller; a task is never handed to more than one worker.

use crate::error::{DeployerError, Result};
use crate::parameters::{RunWrapper, RunWrapperFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

/// A unit of provisioning work applied to one task key
#[async_trait]
pub trait ProvisioningAction<T>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, wrapper: &mut RunWrapper, task_name: &str, input: T) -> Result<()>;
}

/// Summary of a completed fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorReport {
    pub workers: usize,
    pub processed: usize,
}

#[derive(Debug, Clone)]
pub struct ProvisioningCoordinator {
    max_workers: usize,
    wrapper_factory: RunWrapperFactory,
}

impl ProvisioningCoordinator {
    pub fn new(max_workers: usize, wrapper_factory: RunWrapperFactory) -> Self {
        Self {
            max_workers: max_workers.max(1),
            wrapper_factory,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of workers spawned for `task_count` tasks
    pub fn worker_count(&self, task_count: usize) -> usize {
        self.max_workers.min(task_count)
    }

    /// Apply `action` to every task, failing fast on the first error
    #[instrument(skip(self, tasks, action), fields(action = action.name()))]
    pub async fn run<T>(
        &self,
        tasks: impl IntoIterator<Item = (String, T)>,
        action: Arc<dyn ProvisioningAction<T>>,
    ) -> Result<CoordinatorReport>
    where
        T: Send + 'static,
    {
        let queue: VecDeque<(String, T)> = tasks.into_iter().collect();
        let worker_count = self.worker_count(queue.len());
        if worker_count == 0 {
            debug!(action = action.name(), "No provisioning tasks");
            return Ok(CoordinatorReport::default());
        }

        let started = Instant::now();
        let task_count = queue.len();
        let queue = Arc::new(Mutex::new(queue));
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<(String, DeployerError)>();
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let mut wrapper = match self.wrapper_factory.create() {
                Ok(wrapper) => wrapper,
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            };
            let queue = Arc::clone(&queue);
            let error_tx = error_tx.clone();
            let action = Arc::clone(&action);

            workers.spawn(async move {
                let mut processed = 0usize;
                loop {
                    let next = queue.lock().pop_front();
                    let Some((task_name, input)) = next else {
                        break;
                    };
                    debug!(worker_id, task = %task_name, action = action.name(), "Running provisioning task");
                    if let Err(e) = action.execute(&mut wrapper, &task_name, input).await {
                        // the receiver is gone once an earlier failure won
                        if let Err(unsent) = error_tx.send((task_name, e)) {
                            let (task_name, e) = unsent.0;
                            debug!(worker_id, task = %task_name, error = %e, "Dropping failure after abort");
                        }
                        break;
                    }
                    processed += 1;
                }
                processed
            });
        }
        drop(error_tx);

        let mut processed = 0usize;
        loop {
            tokio::select! {
                biased;
                Some((task_name, e)) = error_rx.recv() => {
                    workers.abort_all();
                    crate::log_scaling!(error, "TASK_FAILED",
                        action: action.name(),
                        task: task_name,
                        error: e.to_string()
                    );
                    return Err(e);
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(count)) => processed += count,
                    Some(Err(join_error)) => {
                        workers.abort_all();
                        error!(action = action.name(), error = %join_error, "Provisioning worker crashed");
                        return Err(DeployerError::Internal(format!(
                            "provisioning worker failed: {join_error}"
                        )));
                    }
                    None => break,
                },
            }
        }

        // a worker may have reported its error just before exiting
        if let Ok((_, e)) = error_rx.try_recv() {
            return Err(e);
        }

        info!(
            action = action.name(),
            tasks = task_count,
            workers = worker_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "Provisioning fan-out complete"
        );
        Ok(CoordinatorReport {
            workers: worker_count,
            processed,
        })
    }
}
