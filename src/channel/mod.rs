//! Message channel abstraction
//!
//! The dispatch protocol only talks to channels through these traits:
//! - [`Transport`] opens channels by identity
//! - [`Inbox`] is the owned, receiving end of a channel
//! - [`Outbox`] is a sending handle to someone else's channel
//!
//! Dropping an inbox releases the channel (for the unix backend this
//! also unlinks the socket file), so release happens on every exit path.

mod addr;
mod memory;
mod unix;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use addr::*;
pub use memory::{MemoryInbox, MemoryTransport, DEFAULT_CAPACITY};
pub use unix::UnixTransport;

/// Largest message a channel carries, in bytes
pub const MAX_MESSAGE_SIZE: usize = 128;

/// Opens channels by identity
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Create (or take over) the caller's own receiving channel
    async fn bind(&self, addr: &ChannelAddr) -> Result<Box<dyn Inbox>>;

    /// Open a sending handle to an existing channel
    async fn connect(&self, addr: &ChannelAddr) -> Result<Box<dyn Outbox>>;
}

/// Receiving end of a channel, owned by exactly one process
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Identity this inbox was bound to
    fn addr(&self) -> &ChannelAddr;

    /// Wait for the next message, in FIFO order
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// Sending handle to a channel
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Identity of the destination channel
    fn addr(&self) -> &ChannelAddr;

    /// Send one message, waiting while the destination is full
    async fn send(&self, frame: &[u8]) -> Result<()>;
}

/// Send one message, giving up after `timeout`
pub async fn send_within(outbox: &dyn Outbox, frame: &[u8], timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, outbox.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(Error::SendTimeout {
            addr: outbox.addr().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
