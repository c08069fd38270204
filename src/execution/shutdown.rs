//! Local shutdown requests for a running state machine.
//!
//! Shutdown is distinct from run failure: it stops the local loop without
//! touching the run's abort flag.

use crate::error::{DeployerError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Requests shutdown; cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

/// Observes shutdown requests
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Option<watch::Receiver<bool>>,
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        ShutdownHandle {
            sender: Arc::new(sender),
        },
        ShutdownSignal {
            receiver: Some(receiver),
        },
    )
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        info!("Shutdown requested");
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown on Ctrl+C or SIGTERM
    pub fn trigger_on_signals(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            handle.trigger();
        });
    }
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_requested(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Fails with [`DeployerError::Shutdown`] once shutdown was requested
    pub fn ensure_running(&self) -> Result<()> {
        if self.is_requested() {
            return Err(DeployerError::Shutdown);
        }
        Ok(())
    }

    /// Resolves once shutdown is requested; pending forever if it never is
    pub async fn requested(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

async fn wait_for_os_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
