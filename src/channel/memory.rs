//! In-process channel backend
//!
//! Channels are bounded tokio mpsc queues registered in a shared hub under
//! their identity. Cloning a [`MemoryTransport`] shares the hub, so a
//! coordinator and its workers can run as tasks of one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelAddr, Inbox, Outbox, Transport, MAX_MESSAGE_SIZE};
use crate::error::{Error, Result};

/// Default queue depth per channel
pub const DEFAULT_CAPACITY: usize = 10;

struct HubEntry {
    token: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct Hub {
    channels: Mutex<HashMap<ChannelAddr, HubEntry>>,
    next_token: AtomicU64,
}

/// In-process transport backed by bounded queues
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    capacity: usize,
}

impl MemoryTransport {
    /// Create a transport with its own, empty hub
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            capacity: capacity.max(1),
        }
    }

    /// Bind a channel and keep the concrete inbox type
    pub fn bind_local(&self, addr: &ChannelAddr) -> Result<MemoryInbox> {
        let mut channels = self.hub.channels.lock();
        if let Some(existing) = channels.get(addr) {
            if !existing.tx.is_closed() {
                return Err(Error::channel_unavailable(addr, "already bound"));
            }
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let token = self.hub.next_token.fetch_add(1, Ordering::Relaxed);
        channels.insert(addr.clone(), HubEntry { token, tx });
        debug!(addr = %addr, capacity = self.capacity, "Memory channel bound");

        Ok(MemoryInbox {
            addr: addr.clone(),
            rx,
            token,
            hub: self.hub.clone(),
        })
    }

    /// Queue depth of every channel bound through this transport
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a channel is currently bound under this identity
    pub fn is_bound(&self, addr: &ChannelAddr) -> bool {
        self.hub.channels.lock().contains_key(addr)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bind(&self, addr: &ChannelAddr) -> Result<Box<dyn Inbox>> {
        Ok(Box::new(self.bind_local(addr)?))
    }

    async fn connect(&self, addr: &ChannelAddr) -> Result<Box<dyn Outbox>> {
        let tx = self
            .hub
            .channels
            .lock()
            .get(addr)
            .map(|entry| entry.tx.clone())
            .ok_or_else(|| Error::channel_unavailable(addr, "no such channel"))?;

        Ok(Box::new(MemoryOutbox {
            addr: addr.clone(),
            tx,
        }))
    }
}

/// Receiving end of an in-process channel
pub struct MemoryInbox {
    addr: ChannelAddr,
    rx: mpsc::Receiver<Vec<u8>>,
    token: u64,
    hub: Arc<Hub>,
}

impl MemoryInbox {
    /// Take a message if one is already queued
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
impl Inbox for MemoryInbox {
    fn addr(&self) -> &ChannelAddr {
        &self.addr
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::Closed(self.addr.to_string()))
    }
}

impl Drop for MemoryInbox {
    fn drop(&mut self) {
        let mut channels = self.hub.channels.lock();
        // A later bind may have replaced our entry
        if channels.get(&self.addr).map(|e| e.token) == Some(self.token) {
            channels.remove(&self.addr);
            debug!(addr = %self.addr, "Memory channel released");
        }
    }
}

struct MemoryOutbox {
    addr: ChannelAddr,
    tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl Outbox for MemoryOutbox {
    fn addr(&self) -> &ChannelAddr {
        &self.addr
    }

    async fn send(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(Error::malformed(format!(
                "message of {} bytes exceeds the {} byte limit",
                frame.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| Error::Closed(self.addr.to_string()))
    }
}
