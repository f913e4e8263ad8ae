//! Unix datagram socket backend
//!
//! Each channel is a datagram socket file in the runtime directory.
//! Datagrams keep message boundaries and per-socket FIFO order, and a send
//! waits while the receiver's queue is full.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tracing::{debug, warn};

use super::{ChannelAddr, Inbox, Outbox, Transport, MAX_MESSAGE_SIZE};
use crate::error::{Error, Result};

/// Longest socket path the kernel accepts (sun_path minus the NUL)
const MAX_SOCKET_PATH: usize = 107;

/// Transport over unix datagram sockets
#[derive(Debug, Clone)]
pub struct UnixTransport {
    runtime_dir: PathBuf,
}

impl UnixTransport {
    /// Create a transport rooted at `runtime_dir`, creating it if needed
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Result<Self> {
        let runtime_dir = runtime_dir.into();
        fs::create_dir_all(&runtime_dir).map_err(|e| {
            Error::Config(format!(
                "Failed to create runtime directory '{}': {}",
                runtime_dir.display(),
                e
            ))
        })?;
        Ok(Self { runtime_dir })
    }

    /// Directory holding the socket files
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Map a channel identity to its socket file
    ///
    /// Keyed identities use the device and inode of their path, so the path
    /// has to exist, and two spellings of one file map to the same channel.
    pub fn socket_path(&self, addr: &ChannelAddr) -> Result<PathBuf> {
        let file_name = match addr {
            ChannelAddr::Named(name) => {
                format!("{}.sock", name.trim_start_matches(super::NAME_MARKER))
            }
            ChannelAddr::Keyed { path, project_id } => {
                let meta = fs::metadata(path).map_err(|e| {
                    Error::channel_unavailable(addr, format!("cannot stat key path: {}", e))
                })?;
                format!("key-{:x}-{:x}-{}.sock", meta.dev(), meta.ino(), project_id)
            }
        };

        let path = self.runtime_dir.join(file_name);
        if path.as_os_str().len() > MAX_SOCKET_PATH {
            return Err(Error::channel_unavailable(
                addr,
                format!("socket path '{}' is too long", path.display()),
            ));
        }
        Ok(path)
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn name(&self) -> &'static str {
        "unix"
    }

    async fn bind(&self, addr: &ChannelAddr) -> Result<Box<dyn Inbox>> {
        let path = self.socket_path(addr)?;

        if path.exists() {
            if is_live(&path) {
                return Err(Error::channel_unavailable(addr, "already in use"));
            }
            debug!(path = %path.display(), "Removing stale socket file");
            fs::remove_file(&path).map_err(|e| Error::channel_unavailable(addr, e))?;
        }

        let socket = UnixDatagram::bind(&path).map_err(|e| Error::channel_unavailable(addr, e))?;
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), error = %e, "Failed to restrict socket permissions");
        }
        debug!(addr = %addr, path = %path.display(), "Unix channel bound");

        Ok(Box::new(UnixInbox {
            addr: addr.clone(),
            path,
            socket,
        }))
    }

    async fn connect(&self, addr: &ChannelAddr) -> Result<Box<dyn Outbox>> {
        let path = self.socket_path(addr)?;
        let socket = UnixDatagram::unbound().map_err(|e| Error::channel_unavailable(addr, e))?;
        socket
            .connect(&path)
            .map_err(|e| Error::channel_unavailable(addr, e))?;

        Ok(Box::new(UnixOutbox {
            addr: addr.clone(),
            socket,
        }))
    }
}

/// A socket file is live if something is bound behind it
fn is_live(path: &Path) -> bool {
    std::os::unix::net::UnixDatagram::unbound()
        .and_then(|socket| socket.connect(path))
        .is_ok()
}

struct UnixInbox {
    addr: ChannelAddr,
    path: PathBuf,
    socket: UnixDatagram,
}

#[async_trait]
impl Inbox for UnixInbox {
    fn addr(&self) -> &ChannelAddr {
        &self.addr
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        // One spare byte tells an oversized datagram from a full-size one
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let n = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| Error::receive(&self.addr, e))?;
        if n > MAX_MESSAGE_SIZE {
            return Err(Error::malformed(format!(
                "datagram on {} exceeds {} bytes",
                self.addr, MAX_MESSAGE_SIZE
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

impl Drop for UnixInbox {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Unix channel released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to unlink socket file")
            }
        }
    }
}

struct UnixOutbox {
    addr: ChannelAddr,
    socket: UnixDatagram,
}

#[async_trait]
impl Outbox for UnixOutbox {
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
        let sent = self
            .socket
            .send(frame)
            .await
            .map_err(|e| Error::send(&self.addr, e))?;
        if sent != frame.len() {
            return Err(Error::send(
                &self.addr,
                io::Error::new(io::ErrorKind::WriteZero, "short datagram write"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_named_socket_path() {
        let dir = TempDir::new().unwrap();
        let transport = UnixTransport::new(dir.path()).unwrap();
        let path = transport
            .socket_path(&ChannelAddr::named("/jobs").unwrap())
            .unwrap();
        assert_eq!(path, dir.path().join("jobs.sock"));
    }

    #[test]
    fn test_keyed_socket_path_needs_existing_file() {
        let dir = TempDir::new().unwrap();
        let transport = UnixTransport::new(dir.path()).unwrap();

        let missing = ChannelAddr::keyed(dir.path().join("nope"), 1).unwrap();
        assert!(matches!(
            transport.socket_path(&missing),
            Err(Error::ChannelUnavailable { .. })
        ));

        let present = ChannelAddr::keyed(dir.path(), 1).unwrap();
        let other_id = ChannelAddr::keyed(dir.path(), 2).unwrap();
        let a = transport.socket_path(&present).unwrap();
        let b = transport.socket_path(&other_id).unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("key-"));
    }

    #[test]
    fn test_runtime_dir_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let transport = UnixTransport::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(transport.runtime_dir(), nested.as_path());
    }
}
