//! Coordinator dispatch loop
//!
//! Consumes the coordinator's inbound channel one message at a time and
//! drives the slot registry and the task generator. All registry mutation
//! happens here, on a single task, so nothing is locked.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{debug, error, info, warn};

use super::registry::{Registry, Rejected, SlotError};
use crate::channel::{send_within, ChannelAddr, Inbox, Outbox, Transport};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Reply, Request, TaskResult, WireMessage};
use crate::tasks::TaskGenerator;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of worker slots
    pub slots: usize,

    /// Fixed task seed (None = seed from the OS)
    pub seed: Option<u64>,

    /// First wait after a failed receive
    pub receive_retry_delay: Duration,

    /// Longest wait between receive retries
    pub receive_retry_max_delay: Duration,

    /// Consecutive receive failures before giving up (0 = never)
    pub max_receive_failures: u32,

    /// Bound on each shutdown notice
    pub shutdown_send_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            slots: 3,
            seed: None,
            receive_retry_delay: Duration::from_secs(1),
            receive_retry_max_delay: Duration::from_secs(30),
            max_receive_failures: 10,
            shutdown_send_timeout: Duration::from_secs(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Outcomes & Statistics
// ─────────────────────────────────────────────────────────────────

/// What handling one inbound message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Worker got slot `id`
    Assigned(i32),
    /// No free slot; `Assigned{-1}` was sent
    Rejected,
    /// Worker's reply channel could not be opened or written
    Unreachable,
    /// Task sent to the worker
    TaskSent { worker_id: i32, value: i32 },
    /// Task could not be delivered; the slot stays occupied
    SendFailed { worker_id: i32 },
    /// Result logged
    Recorded(TaskResult),
    /// Slot freed
    Disconnected(i32),
    /// Id out of range or stale; nothing changed
    Ignored(SlotError),
    /// Frame could not be decoded
    Dropped,
}

/// Running totals, logged at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub registered: u64,
    pub rejected: u64,
    pub unreachable: u64,
    pub tasks_sent: u64,
    pub send_failures: u64,
    pub results: u64,
    pub primes: u64,
    pub disconnected: u64,
    pub ignored: u64,
    pub dropped: u64,
}

// ─────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────

/// Owns the inbound channel, the registry and the task generator
pub struct Coordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    inbox: Box<dyn Inbox>,
    registry: Registry<Box<dyn Outbox>>,
    tasks: TaskGenerator,
    stats: DispatchStats,
}

impl Coordinator {
    /// Create the inbound channel at `addr` and an empty registry
    pub async fn bind(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        addr: &ChannelAddr,
    ) -> Result<Self> {
        let inbox = transport.bind(addr).await?;
        let tasks = TaskGenerator::new(config.seed);

        info!(
            addr = %addr,
            backend = transport.name(),
            slots = config.slots,
            seeded = tasks.seed().is_some(),
            "Coordinator channel ready"
        );

        Ok(Self {
            registry: Registry::new(config.slots),
            config,
            transport,
            inbox,
            tasks,
            stats: DispatchStats::default(),
        })
    }

    /// Identity of the inbound channel
    pub fn addr(&self) -> &ChannelAddr {
        self.inbox.addr()
    }

    /// Current slot table
    pub fn registry(&self) -> &Registry<Box<dyn Outbox>> {
        &self.registry
    }

    /// Totals so far
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Run until `shutdown` resolves or the inbound channel is given up on
    ///
    /// The shutdown sweep runs on both paths before the channel is released.
    pub async fn run<F>(mut self, shutdown: F) -> Result<DispatchStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut backoff = ExponentialBackoff {
            current_interval: self.config.receive_retry_delay,
            initial_interval: self.config.receive_retry_delay,
            multiplier: 2.0,
            max_interval: self.config.receive_retry_max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut failures: u32 = 0;

        info!("Dispatch loop started");

        let result = loop {
            let received = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                received = self.inbox.recv() => received,
            };

            match received {
                Ok(frame) => {
                    if failures > 0 {
                        backoff.reset();
                        failures = 0;
                    }
                    // A worker that stops reading must not hold off shutdown
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("Shutdown signal received");
                            break Ok(());
                        }
                        _ = self.handle_frame(&frame) => {}
                    }
                }
                Err(e) if e.kind() == ErrorKind::Protocol => {
                    warn!(error = %e.format_for_log(), "Dropping unreadable message");
                    self.stats.dropped += 1;
                }
                Err(e) if !e.is_recoverable() => {
                    error!(error = %e.format_for_log(), "Inbound channel failed");
                    break Err(e);
                }
                Err(e) => {
                    failures += 1;
                    if self.config.max_receive_failures > 0
                        && failures >= self.config.max_receive_failures
                    {
                        error!(
                            error = %e,
                            failures,
                            "Inbound channel keeps failing, shutting down"
                        );
                        break Err(Error::ReceiveExhausted { failures });
                    }

                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.receive_retry_max_delay);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Error while receiving message, retrying"
                    );

                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("Shutdown signal received");
                            break Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        let notified = self.shutdown_sweep().await;
        let stats = self.stats.clone();
        info!(
            notified,
            registered = stats.registered,
            rejected = stats.rejected,
            tasks = stats.tasks_sent,
            results = stats.results,
            primes = stats.primes,
            ignored = stats.ignored + stats.dropped,
            "Coordinator closed"
        );

        result.map(|()| stats)
    }

    /// Decode one frame and dispatch it
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Outcome {
        match Request::decode(frame) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e.format_for_log(), "Dropping undecodable message");
                self.stats.dropped += 1;
                Outcome::Dropped
            }
        }
    }

    /// Apply one request to the registry
    pub async fn handle(&mut self, request: Request) -> Outcome {
        debug!(message_type = request.type_name(), "Received message");

        match request {
            Request::Register { reply } => self.on_register(reply).await,
            Request::Ready { worker_id } => self.on_ready(worker_id).await,
            Request::Result(result) => self.on_result(result),
            Request::Disconnect { worker_id } => self.on_disconnect(worker_id),
        }
    }

    async fn on_register(&mut self, reply: ChannelAddr) -> Outcome {
        let outbox = match self.transport.connect(&reply).await {
            Ok(outbox) => outbox,
            Err(e) => {
                warn!(reply = %reply, error = %e, "Cannot open worker channel");
                self.stats.unreachable += 1;
                return Outcome::Unreachable;
            }
        };

        let (id, outbox) = match self.registry.admit(outbox) {
            Ok(slot) => slot,
            Err(Rejected(outbox)) => {
                warn!(reply = %reply, "Cannot accept next worker, all slots taken");
                self.stats.rejected += 1;
                if let Err(e) = send_reply(outbox.as_ref(), &Reply::rejected()).await {
                    warn!(reply = %reply, error = %e, "Failed to send rejection");
                }
                return Outcome::Rejected;
            }
        };

        if let Err(e) = send_reply(outbox.as_ref(), &Reply::Assigned { id }).await {
            // Never acknowledged, so the slot was never really taken
            warn!(worker_id = id, reply = %reply, error = %e, "Error while accepting new worker");
            let released = self.registry.disconnect(id);
            debug_assert!(released.is_ok(), "slot {id} was admitted above");
            self.stats.unreachable += 1;
            return Outcome::Unreachable;
        }

        self.stats.registered += 1;
        info!(
            worker_id = id,
            reply = %reply,
            free = self.registry.free_count(),
            "Worker connected"
        );
        Outcome::Assigned(id)
    }

    async fn on_ready(&mut self, worker_id: i32) -> Outcome {
        let outbox = match self.registry.ready(worker_id) {
            Ok(outbox) => outbox,
            Err(e) => {
                warn!(
                    error = %Error::from(e).format_for_log(),
                    "Incorrect worker id in READY, ignoring"
                );
                self.stats.ignored += 1;
                return Outcome::Ignored(e);
            }
        };

        let value = self.tasks.next_task();
        match send_reply(outbox.as_ref(), &Reply::Task { value }).await {
            Ok(()) => {
                self.stats.tasks_sent += 1;
                debug!(worker_id, value, "Task sent");
                Outcome::TaskSent { worker_id, value }
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Error while sending a new task to the worker");
                self.stats.send_failures += 1;
                Outcome::SendFailed { worker_id }
            }
        }
    }

    fn on_result(&mut self, result: TaskResult) -> Outcome {
        self.stats.results += 1;
        if result.is_prime {
            self.stats.primes += 1;
        }
        info!(
            worker_id = result.worker_id,
            value = result.value,
            "{}",
            if result.is_prime { "Prime number" } else { "Composite number" }
        );
        Outcome::Recorded(result)
    }

    fn on_disconnect(&mut self, worker_id: i32) -> Outcome {
        match self.registry.disconnect(worker_id) {
            Ok(outbox) => {
                drop(outbox);
                self.stats.disconnected += 1;
                info!(worker_id, free = self.registry.free_count(), "Worker exited");
                Outcome::Disconnected(worker_id)
            }
            Err(e) => {
                warn!(
                    error = %Error::from(e).format_for_log(),
                    "Incorrect worker id in DISCONNECT, ignoring"
                );
                self.stats.ignored += 1;
                Outcome::Ignored(e)
            }
        }
    }

    /// Tell every registered worker to stop and empty the registry
    ///
    /// Returns how many notices were delivered.
    pub async fn shutdown_sweep(&mut self) -> usize {
        let timeout = self.config.shutdown_send_timeout;
        let mut delivered = 0;

        let frame = match Reply::Shutdown.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Cannot encode shutdown notice");
                return 0;
            }
        };

        for (worker_id, outbox) in self.registry.drain() {
            match send_within(outbox.as_ref(), &frame, timeout).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(worker_id, "Shutdown notice sent");
                }
                Err(e) => warn!(worker_id, error = %e, "Failed to send shutdown notice"),
            }
        }

        delivered
    }
}

async fn send_reply(outbox: &dyn Outbox, reply: &Reply) -> Result<()> {
    let frame = reply.encode()?;
    outbox.send(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryInbox, MemoryTransport};

    async fn coordinator(transport: &MemoryTransport, slots: usize) -> Coordinator {
        let config = CoordinatorConfig {
            slots,
            seed: Some(11),
            ..Default::default()
        };
        Coordinator::bind(
            config,
            Arc::new(transport.clone()),
            &ChannelAddr::named("/jobs").unwrap(),
        )
        .await
        .unwrap()
    }

    fn worker(transport: &MemoryTransport, name: &str) -> (ChannelAddr, MemoryInbox) {
        let addr = ChannelAddr::named(name).unwrap();
        let inbox = transport.bind_local(&addr).unwrap();
        (addr, inbox)
    }

    fn next_reply(inbox: &mut MemoryInbox) -> Option<Reply> {
        inbox.try_recv().map(|frame| Reply::decode(&frame).unwrap())
    }

    #[tokio::test]
    async fn test_register_assigns_and_replies() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;
        let (addr, mut inbox) = worker(&transport, "/w0");

        let outcome = coord.handle(Request::Register { reply: addr }).await;

        assert_eq!(outcome, Outcome::Assigned(0));
        assert_eq!(next_reply(&mut inbox), Some(Reply::Assigned { id: 0 }));
        assert_eq!(coord.stats().registered, 1);
    }

    #[tokio::test]
    async fn test_register_to_missing_channel_takes_no_slot() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;

        let outcome = coord
            .handle(Request::Register { reply: ChannelAddr::named("/ghost").unwrap() })
            .await;

        assert_eq!(outcome, Outcome::Unreachable);
        assert_eq!(coord.registry().free_count(), 2);
    }

    /// Connects to anything, delivers nothing
    struct DeadTransport;

    struct DeadOutbox(ChannelAddr);

    #[async_trait::async_trait]
    impl Transport for DeadTransport {
        fn name(&self) -> &'static str {
            "dead"
        }

        async fn bind(&self, addr: &ChannelAddr) -> Result<Box<dyn Inbox>> {
            MemoryTransport::default().bind(addr).await
        }

        async fn connect(&self, addr: &ChannelAddr) -> Result<Box<dyn Outbox>> {
            Ok(Box::new(DeadOutbox(addr.clone())))
        }
    }

    #[async_trait::async_trait]
    impl Outbox for DeadOutbox {
        fn addr(&self) -> &ChannelAddr {
            &self.0
        }

        async fn send(&self, _frame: &[u8]) -> Result<()> {
            Err(Error::Closed(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_assignment_gives_slot_back() {
        let mut coord = Coordinator::bind(
            CoordinatorConfig { slots: 1, ..Default::default() },
            Arc::new(DeadTransport),
            &ChannelAddr::named("/jobs").unwrap(),
        )
        .await
        .unwrap();

        let outcome = coord
            .handle(Request::Register { reply: ChannelAddr::named("/w0").unwrap() })
            .await;

        assert_eq!(outcome, Outcome::Unreachable);
        assert_eq!(coord.registry().free_count(), 1);
        assert_eq!(coord.stats().registered, 0);
    }

    #[tokio::test]
    async fn test_ready_sends_task_in_range() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 1).await;
        let (addr, mut inbox) = worker(&transport, "/w0");
        coord.handle(Request::Register { reply: addr }).await;
        next_reply(&mut inbox);

        let outcome = coord.handle(Request::Ready { worker_id: 0 }).await;

        let value = match outcome {
            Outcome::TaskSent { worker_id: 0, value } => value,
            other => panic!("Expected TaskSent, got {:?}", other),
        };
        assert!((0..1000).contains(&value));
        assert_eq!(next_reply(&mut inbox), Some(Reply::Task { value }));
    }

    #[tokio::test]
    async fn test_ready_with_bad_id_is_ignored_silently() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;
        let (addr, mut inbox) = worker(&transport, "/w0");
        coord.handle(Request::Register { reply: addr }).await;
        next_reply(&mut inbox);

        for id in [-1, 1, 2, 99] {
            let outcome = coord.handle(Request::Ready { worker_id: id }).await;
            assert!(matches!(outcome, Outcome::Ignored(_)));
        }
        assert!(next_reply(&mut inbox).is_none());
        assert_eq!(coord.registry().occupied_count(), 1);
        assert_eq!(coord.stats().ignored, 4);
    }

    #[tokio::test]
    async fn test_result_never_mutates_registry() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;

        let result = TaskResult { worker_id: 5, value: 7, is_prime: true };
        let outcome = coord.handle(Request::Result(result)).await;

        assert_eq!(outcome, Outcome::Recorded(result));
        assert_eq!(coord.registry().free_count(), 2);
        assert_eq!(coord.stats().primes, 1);
    }

    #[tokio::test]
    async fn test_disconnect_stale_id_is_ignored() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;
        let (addr, _inbox) = worker(&transport, "/w0");
        coord.handle(Request::Register { reply: addr }).await;

        assert_eq!(
            coord.handle(Request::Disconnect { worker_id: 0 }).await,
            Outcome::Disconnected(0)
        );
        assert_eq!(
            coord.handle(Request::Disconnect { worker_id: 0 }).await,
            Outcome::Ignored(SlotError::Vacant(0))
        );
        assert_eq!(
            coord.handle(Request::Disconnect { worker_id: 2 }).await,
            Outcome::Ignored(SlotError::OutOfRange(2))
        );
    }

    #[tokio::test]
    async fn test_garbage_frame_is_dropped() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 1).await;

        assert_eq!(coord.handle_frame(&[7u8; 3]).await, Outcome::Dropped);
        let mut frame = vec![0u8; crate::protocol::FRAME_SIZE];
        frame[0] = 200;
        assert_eq!(coord.handle_frame(&frame).await, Outcome::Dropped);
        assert_eq!(coord.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_task_send_failure_keeps_slot() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 1).await;
        let (addr, inbox) = worker(&transport, "/w0");
        coord.handle(Request::Register { reply: addr }).await;
        drop(inbox);

        let outcome = coord.handle(Request::Ready { worker_id: 0 }).await;
        assert_eq!(outcome, Outcome::SendFailed { worker_id: 0 });
        assert!(coord.registry().is_occupied(0));
    }

    /// Binds an inbox whose every receive fails
    struct FlakyTransport;

    struct FlakyInbox(ChannelAddr);

    #[async_trait::async_trait]
    impl Transport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn bind(&self, addr: &ChannelAddr) -> Result<Box<dyn Inbox>> {
            Ok(Box::new(FlakyInbox(addr.clone())))
        }

        async fn connect(&self, addr: &ChannelAddr) -> Result<Box<dyn Outbox>> {
            Ok(Box::new(DeadOutbox(addr.clone())))
        }
    }

    #[async_trait::async_trait]
    impl Inbox for FlakyInbox {
        fn addr(&self) -> &ChannelAddr {
            &self.0
        }

        async fn recv(&mut self) -> Result<Vec<u8>> {
            Err(Error::receive(
                &self.0,
                std::io::Error::new(std::io::ErrorKind::Other, "interrupted"),
            ))
        }
    }

    #[tokio::test]
    async fn test_receive_failures_escalate() {
        let config = CoordinatorConfig {
            slots: 1,
            receive_retry_delay: Duration::from_millis(1),
            receive_retry_max_delay: Duration::from_millis(4),
            max_receive_failures: 3,
            ..Default::default()
        };
        let coord = Coordinator::bind(
            config,
            Arc::new(FlakyTransport),
            &ChannelAddr::named("/jobs").unwrap(),
        )
        .await
        .unwrap();

        let err = coord.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::ReceiveExhausted { failures: 3 }));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_notifies() {
        let transport = MemoryTransport::default();
        let mut coord = coordinator(&transport, 2).await;
        let (addr, mut inbox) = worker(&transport, "/w0");
        coord.handle(Request::Register { reply: addr }).await;
        next_reply(&mut inbox);

        let stats = coord.run(async {}).await.unwrap();

        assert_eq!(stats.registered, 1);
        assert_eq!(next_reply(&mut inbox), Some(Reply::Shutdown));
        assert!(!transport.is_bound(&ChannelAddr::named("/jobs").unwrap()));
    }
}
