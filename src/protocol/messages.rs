//! Protocol message definitions
//!
//! Every message travels as one frame of [`FRAME_SIZE`] bytes: a tag byte
//! followed by the payload, zero padded. Integers are little-endian `i32`.
//! Tags are scoped per direction, so `1` means `Register` on the way to the
//! coordinator and `Assigned` on the way back.

use std::path::PathBuf;

use crate::channel::{ChannelAddr, MAX_MESSAGE_SIZE};
use crate::error::{Error, Result};

/// Size of every encoded frame
pub const FRAME_SIZE: usize = MAX_MESSAGE_SIZE;

/// Worker id carried by `Assigned` when registration is refused
pub const REJECTED_ID: i32 = -1;

const ADDR_NAMED: u8 = 0;
const ADDR_KEYED: u8 = 1;

/// Encoding and decoding of one direction's messages
pub trait WireMessage: Sized {
    /// Encode into a full frame
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode a frame received from a channel
    fn decode(frame: &[u8]) -> Result<Self>;

    /// Message type name for logs
    fn type_name(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────
// Worker → Coordinator
// ─────────────────────────────────────────────────────────────────

/// Messages the coordinator receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask for a slot; replies go to `reply`
    Register { reply: ChannelAddr },
    /// Worker is idle and wants a task
    Ready { worker_id: i32 },
    /// Outcome of one task
    Result(TaskResult),
    /// Worker is leaving
    Disconnect { worker_id: i32 },
}

/// Outcome of evaluating one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskResult {
    pub worker_id: i32,
    pub value: i32,
    pub is_prime: bool,
}

impl Request {
    const REGISTER: u8 = 1;
    const READY: u8 = 2;
    const RESULT: u8 = 3;
    const DISCONNECT: u8 = 4;
}

impl WireMessage for Request {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut w = FrameWriter::new();
        match self {
            Request::Register { reply } => {
                w.put_u8(Self::REGISTER);
                w.put_addr(reply)?;
            }
            Request::Ready { worker_id } => {
                w.put_u8(Self::READY);
                w.put_i32(*worker_id);
            }
            Request::Result(result) => {
                w.put_u8(Self::RESULT);
                w.put_i32(result.worker_id);
                w.put_i32(result.value);
                w.put_u8(result.is_prime as u8);
            }
            Request::Disconnect { worker_id } => {
                w.put_u8(Self::DISCONNECT);
                w.put_i32(*worker_id);
            }
        }
        Ok(w.finish())
    }

    fn decode(frame: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(frame)?;
        match r.u8()? {
            Self::REGISTER => Ok(Request::Register { reply: r.addr()? }),
            Self::READY => Ok(Request::Ready { worker_id: r.i32()? }),
            Self::RESULT => Ok(Request::Result(TaskResult {
                worker_id: r.i32()?,
                value: r.i32()?,
                is_prime: r.u8()? != 0,
            })),
            Self::DISCONNECT => Ok(Request::Disconnect { worker_id: r.i32()? }),
            tag => Err(Error::UnknownTag { tag }),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Request::Register { .. } => "REGISTER",
            Request::Ready { .. } => "READY",
            Request::Result(_) => "RESULT",
            Request::Disconnect { .. } => "DISCONNECT",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Coordinator → Worker
// ─────────────────────────────────────────────────────────────────

/// Messages a worker receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Registration answer; [`REJECTED_ID`] means no slot was free
    Assigned { id: i32 },
    /// Value to classify
    Task { value: i32 },
    /// Coordinator is going away
    Shutdown,
}

impl Reply {
    const ASSIGNED: u8 = 1;
    const TASK: u8 = 2;
    const SHUTDOWN: u8 = 3;

    /// Registration refused
    pub fn rejected() -> Self {
        Reply::Assigned { id: REJECTED_ID }
    }
}

impl WireMessage for Reply {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut w = FrameWriter::new();
        match self {
            Reply::Assigned { id } => {
                w.put_u8(Self::ASSIGNED);
                w.put_i32(*id);
            }
            Reply::Task { value } => {
                w.put_u8(Self::TASK);
                w.put_i32(*value);
            }
            Reply::Shutdown => w.put_u8(Self::SHUTDOWN),
        }
        Ok(w.finish())
    }

    fn decode(frame: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(frame)?;
        match r.u8()? {
            Self::ASSIGNED => Ok(Reply::Assigned { id: r.i32()? }),
            Self::TASK => Ok(Reply::Task { value: r.i32()? }),
            Self::SHUTDOWN => Ok(Reply::Shutdown),
            tag => Err(Error::UnknownTag { tag }),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Reply::Assigned { .. } => "ASSIGNED",
            Reply::Task { .. } => "TASK",
            Reply::Shutdown => "SHUTDOWN",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Framing helpers
// ─────────────────────────────────────────────────────────────────

struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_SIZE),
        }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_addr(&mut self, addr: &ChannelAddr) -> Result<()> {
        let text = match addr {
            ChannelAddr::Named(name) => {
                self.put_u8(ADDR_NAMED);
                name.as_bytes()
            }
            ChannelAddr::Keyed { path, project_id } => {
                self.put_u8(ADDR_KEYED);
                self.put_i32(*project_id);
                path.to_str()
                    .ok_or_else(|| Error::malformed("channel path is not valid UTF-8"))?
                    .as_bytes()
            }
        };

        let room = FRAME_SIZE - self.buf.len() - 1;
        if text.len() > room.min(u8::MAX as usize) {
            return Err(Error::malformed(format!(
                "channel identity '{}' does not fit in a frame ({} bytes max)",
                addr, room
            )));
        }
        self.put_u8(text.len() as u8);
        self.buf.extend_from_slice(text);
        Ok(())
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.resize(FRAME_SIZE, 0);
        self.buf
    }
}

struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() != FRAME_SIZE {
            return Err(Error::malformed(format!(
                "expected a {} byte frame, got {} bytes",
                FRAME_SIZE,
                buf.len()
            )));
        }
        Ok(Self { buf, pos: 0 })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::malformed("payload runs past the end of the frame"));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn addr(&mut self) -> Result<ChannelAddr> {
        let kind = self.u8()?;
        let project_id = if kind == ADDR_KEYED { Some(self.i32()?) } else { None };
        let len = self.u8()? as usize;
        let text = std::str::from_utf8(self.take(len)?)
            .map_err(|_| Error::malformed("channel identity is not valid UTF-8"))?;

        let addr = match (kind, project_id) {
            (ADDR_NAMED, _) => ChannelAddr::named(text),
            (ADDR_KEYED, Some(id)) => ChannelAddr::keyed(PathBuf::from(text), id),
            _ => return Err(Error::malformed(format!("unknown channel identity kind {}", kind))),
        };
        addr.map_err(|e| Error::malformed(e.to_string()))
    }
}
