//! Termination signals
//!
//! SIGINT, SIGTERM and SIGTSTP all mean "stop": the coordinator runs its
//! shutdown sweep and a worker says goodbye before exiting.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

use crate::error::Result;

/// Installed handlers for the stop signals
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    stop: Signal,
}

impl ShutdownSignals {
    /// Install the handlers; must run inside a tokio runtime
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            stop: signal(SignalKind::from_raw(libc::SIGTSTP))?,
        })
    }

    /// Resolve on the first stop signal
    pub async fn recv(mut self) {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.stop.recv() => "SIGTSTP",
        };
        info!(signal = name, "Shutdown signal received");
    }
}
