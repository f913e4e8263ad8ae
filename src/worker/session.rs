//! Worker session state machine
//!
//! One session registers with the coordinator, then loops asking for a task,
//! classifying it and reporting the result. It ends on a shutdown notice,
//! a rejected registration, a transport failure, or local cancellation.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{send_within, ChannelAddr, Inbox, Outbox, Transport};
use crate::error::{Error, ErrorKind, Result};
use crate::oracle;
use crate::protocol::{Reply, Request, TaskResult, WireMessage, REJECTED_ID};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for a worker session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Simulated work time per task
    pub work_delay: Duration,

    /// Bound on the farewell Disconnect
    pub disconnect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_delay: Duration::from_secs(2),
            disconnect_timeout: Duration::from_secs(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Session State
// ─────────────────────────────────────────────────────────────────

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Own channel bound, Register not sent yet
    Unregistered,
    /// Waiting for the coordinator to hand out an id
    AwaitingAssignment,
    /// Registered, about to ask for work
    Idle,
    /// Ready sent, waiting for a task
    AwaitingTask,
    /// Classifying a task
    Computing,
    /// Session is over
    Terminated,
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped by a local signal
    Cancelled,
}

// ─────────────────────────────────────────────────────────────────
// Worker Session
// ─────────────────────────────────────────────────────────────────

/// A worker's conversation with one coordinator
pub struct WorkerSession {
    config: SessionConfig,
    inbox: Box<dyn Inbox>,
    coordinator: Box<dyn Outbox>,
    state: SessionState,
    worker_id: Option<i32>,
    completed: u64,
}

impl WorkerSession {
    /// Bind the worker's own channel at `own` and open the coordinator's
    pub async fn start(
        config: SessionConfig,
        transport: &dyn Transport,
        coordinator: &ChannelAddr,
        own: &ChannelAddr,
    ) -> Result<Self> {
        let inbox = transport.bind(own).await?;
        let coordinator = transport.connect(coordinator).await?;

        debug!(own = %own, coordinator = %coordinator.addr(), "Worker channels open");

        Ok(Self {
            config,
            inbox,
            coordinator,
            state: SessionState::Unregistered,
            worker_id: None,
            completed: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until the session ends or `cancel` resolves
    ///
    /// Cancellation yields `Ok(SessionEnd::Cancelled)`. Rejection and a
    /// coordinator shutdown notice come back as `Error::Rejected` and
    /// `Error::CoordinatorShutdown`.
    pub async fn run<F>(mut self, cancel: F) -> Result<SessionEnd>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let result = tokio::select! {
            _ = &mut cancel => {
                info!(state = ?self.state, "Cancelled, leaving");
                Ok(SessionEnd::Cancelled)
            }
            e = self.drive() => Err(e),
        };

        let farewell = !matches!(result, Err(Error::Rejected) | Err(Error::CoordinatorShutdown));
        if farewell {
            if let Some(worker_id) = self.worker_id {
                self.disconnect(worker_id).await;
            }
        }

        self.state = SessionState::Terminated;
        info!(
            worker_id = self.worker_id.unwrap_or(REJECTED_ID),
            completed = self.completed,
            "Worker session ended"
        );
        result
    }

    async fn drive(&mut self) -> Error {
        match self.exchange().await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    async fn exchange(&mut self) -> Result<Infallible> {
        let own = self.inbox.addr().clone();
        self.send(&Request::Register { reply: own }).await?;
        self.state = SessionState::AwaitingAssignment;

        loop {
            let reply = self.next_reply().await?;

            match (self.state, reply, self.worker_id) {
                (_, Reply::Shutdown, _) => {
                    info!(worker_id = ?self.worker_id, "Coordinator is shutting down");
                    return Err(Error::CoordinatorShutdown);
                }
                (SessionState::AwaitingAssignment, Reply::Assigned { id }, None) => {
                    if id < 0 {
                        warn!("Coordinator has no free slot");
                        return Err(Error::Rejected);
                    }
                    self.worker_id = Some(id);
                    self.state = SessionState::Idle;
                    info!(worker_id = id, "Registered with coordinator");
                    self.request_task(id).await?;
                }
                (SessionState::AwaitingTask, Reply::Task { value }, Some(worker_id)) => {
                    self.state = SessionState::Computing;
                    let is_prime = self.compute(value).await;
                    let result = Request::Result(TaskResult {
                        worker_id,
                        value,
                        is_prime,
                    });
                    match self.send(&result).await {
                        Ok(()) => self.completed += 1,
                        Err(e) => warn!(worker_id, error = %e, "Error while sending task result"),
                    }
                    self.state = SessionState::Idle;
                    self.request_task(worker_id).await?;
                }
                (state, reply, _) => {
                    warn!(
                        state = ?state,
                        message_type = reply.type_name(),
                        "Unexpected message, ignoring"
                    );
                }
            }
        }
    }

    async fn compute(&self, value: i32) -> bool {
        let is_prime = oracle::is_prime(value);
        tokio::time::sleep(self.config.work_delay).await;
        info!(value, is_prime, "Task evaluated");
        is_prime
    }

    async fn request_task(&mut self, worker_id: i32) -> Result<()> {
        self.send(&Request::Ready { worker_id }).await?;
        self.state = SessionState::AwaitingTask;
        Ok(())
    }

    /// Next decodable reply; undecodable frames are logged and skipped
    async fn next_reply(&mut self) -> Result<Reply> {
        loop {
            let frame = match self.inbox.recv().await {
                Ok(frame) => frame,
                Err(e) if e.kind() == ErrorKind::Protocol => {
                    warn!(error = %e.format_for_log(), "Dropping unreadable message");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match Reply::decode(&frame) {
                Ok(reply) => {
                    debug!(message_type = reply.type_name(), "Received message");
                    return Ok(reply);
                }
                Err(e) => warn!(error = %e.format_for_log(), "Dropping undecodable message"),
            }
        }
    }

    async fn send(&self, request: &Request) -> Result<()> {
        let frame = request.encode()?;
        self.coordinator.send(&frame).await
    }

    async fn disconnect(&self, worker_id: i32) {
        let sent = match (Request::Disconnect { worker_id }).encode() {
            Ok(frame) => {
                send_within(self.coordinator.as_ref(), &frame, self.config.disconnect_timeout).await
            }
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => debug!(worker_id, "Disconnect sent"),
            Err(e) => warn!(worker_id, error = %e, "Failed to send disconnect"),
        }
    }
}
