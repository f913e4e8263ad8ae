//! Common test utilities and fixtures
//!
//! Scripted workers that speak the wire protocol by hand, and a helper for
//! running the binary in an isolated environment.

#![allow(dead_code)]

use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

use taskpool::channel::{ChannelAddr, Inbox, Outbox, Transport};
use taskpool::protocol::{Reply, Request, WireMessage};

/// How long a test waits for a reply before failing
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn addr(name: &str) -> ChannelAddr {
    ChannelAddr::named(name).unwrap()
}

/// A worker driven step by step from the test
pub struct ScriptedWorker {
    pub own: ChannelAddr,
    inbox: Box<dyn Inbox>,
    coordinator: Box<dyn Outbox>,
}

impl ScriptedWorker {
    /// Bind `own` and open the coordinator channel
    pub async fn open(transport: &dyn Transport, coordinator: &ChannelAddr, own: &str) -> Self {
        let own = addr(own);
        let inbox = transport.bind(&own).await.unwrap();
        let coordinator = transport.connect(coordinator).await.unwrap();
        Self { own, inbox, coordinator }
    }

    pub async fn send(&self, request: Request) {
        self.coordinator.send(&request.encode().unwrap()).await.unwrap();
    }

    pub async fn register(&self) {
        self.send(Request::Register { reply: self.own.clone() }).await;
    }

    /// Register and return the id the coordinator answered with
    pub async fn join(&mut self) -> i32 {
        self.register().await;
        match self.reply().await {
            Reply::Assigned { id } => id,
            other => panic!("Expected Assigned, got {:?}", other),
        }
    }

    /// Next reply, failing the test if none arrives in time
    pub async fn reply(&mut self) -> Reply {
        let frame = tokio::time::timeout(REPLY_TIMEOUT, self.inbox.recv())
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        Reply::decode(&frame).unwrap()
    }
}

/// The binary, isolated from the caller's config and sockets
pub fn taskpool_cmd(home: &Path) -> assert_cmd::Command {
    assert_cmd::Command::from_std(taskpool_process(home))
}

/// Same isolation as `taskpool_cmd`, for processes that are spawned and signalled
pub fn taskpool_process(home: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("taskpool"));
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_RUNTIME_DIR", home.join("run"))
        .env_remove("TASKPOOL_CONFIG")
        .env_remove("TASKPOOL_SLOTS")
        .env_remove("TASKPOOL_LOG_LEVEL")
        .env_remove("TASKPOOL_RUNTIME_DIR")
        .env_remove("RUST_LOG");
    cmd
}

/// Poll until `done` holds, failing the test after `REPLY_TIMEOUT`
pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + REPLY_TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Deliver `signal` (e.g. "INT") to a child process
pub fn send_signal(child: &Child, signal: &str) {
    let status = std::process::Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(status.success());
}

/// Exit code of a child, failing the test if it does not exit in time
pub fn exit_code(child: &mut Child) -> i32 {
    let mut status = None;
    wait_until("process exit", || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    status.and_then(|s| s.code()).expect("process was killed by a signal")
}
