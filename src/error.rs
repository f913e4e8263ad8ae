//! Error types for taskpool
//!
//! Every failure is classified into one of a few kinds that decide how the
//! caller reacts:
//! - Setup errors are fatal at startup
//! - Protocol errors are logged and the offending message is dropped
//! - Transport errors are logged (or retried, for the coordinator's inbox)
//! - Session ends (rejection, coordinator shutdown) terminate a worker

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelAddr;
use crate::coordinator::SlotError;

/// Result type alias for taskpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used to pick a recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments, configuration or channel setup
    Setup,
    /// Unknown tag, malformed frame, out-of-range or stale worker id
    Protocol,
    /// Send/receive failure on an established channel
    Transport,
    /// The worker session ended without an error on our side
    Session,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Setup => "setup",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Session => "session",
        };
        f.write_str(name)
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Setup Errors
    // ─────────────────────────────────────────────────────────────

    /// Command-line argument rejected after parsing
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel could not be created or opened
    #[error("Channel {addr} unavailable: {reason}")]
    ChannelUnavailable { addr: String, reason: String },

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Frame carried a tag this side does not understand
    #[error("Unknown message tag {tag}")]
    UnknownTag { tag: u8 },

    /// Frame had the wrong size or an invalid payload
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Worker id out of range or not currently registered
    #[error("Worker id {id} is {reason}")]
    StaleWorker { id: i32, reason: &'static str },

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────

    /// Sending to a channel failed
    #[error("Failed to send to {addr}: {source}")]
    Send {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Receiving from our own channel failed
    #[error("Failed to receive on {addr}: {source}")]
    Receive {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer end of an in-process channel is gone
    #[error("Channel {0} closed")]
    Closed(String),

    /// A bounded send did not complete in time
    #[error("Timed out sending to {addr} after {timeout_ms}ms")]
    SendTimeout { addr: String, timeout_ms: u64 },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Session Ends
    // ─────────────────────────────────────────────────────────────

    /// Coordinator answered the registration with `Assigned{-1}`
    #[error("Coordinator refused registration: all worker slots are taken")]
    Rejected,

    /// Coordinator sent `Shutdown`
    #[error("Coordinator closed")]
    CoordinatorShutdown,

    /// Coordinator gave up on its inbound channel
    #[error("Giving up after {failures} consecutive receive failures")]
    ReceiveExhausted { failures: u32 },
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_)
            | Error::ConfigNotFound { .. }
            | Error::ConfigParse { .. }
            | Error::Config(_)
            | Error::ChannelUnavailable { .. }
            | Error::Toml(_) => ErrorKind::Setup,

            Error::UnknownTag { .. } | Error::Malformed(_) | Error::StaleWorker { .. } => {
                ErrorKind::Protocol
            }

            Error::Send { .. }
            | Error::Receive { .. }
            | Error::Closed(_)
            | Error::SendTimeout { .. }
            | Error::Io(_)
            | Error::ReceiveExhausted { .. } => ErrorKind::Transport,

            Error::Rejected | Error::CoordinatorShutdown => ErrorKind::Session,
        }
    }

    /// Whether the coordinator loop should log and carry on
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Protocol | ErrorKind::Transport)
            && !matches!(self, Error::ReceiveExhausted { .. })
    }

    /// Get the exit code for the CLI
    ///
    /// Only success and failure cross the process boundary.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Format the error for terminal display (a single line)
    pub fn format_for_terminal(&self) -> String {
        format!("Error: {}\n", self)
    }

    /// Format the error for logging
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a channel-unavailable error
    pub fn channel_unavailable(addr: &ChannelAddr, reason: impl fmt::Display) -> Self {
        Error::ChannelUnavailable {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a send error
    pub fn send(addr: &ChannelAddr, source: std::io::Error) -> Self {
        Error::Send {
            addr: addr.to_string(),
            source,
        }
    }

    /// Create a receive error
    pub fn receive(addr: &ChannelAddr, source: std::io::Error) -> Self {
        Error::Receive {
            addr: addr.to_string(),
            source,
        }
    }

    /// Create a malformed message error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::Malformed(message.into())
    }
}

impl From<SlotError> for Error {
    fn from(e: SlotError) -> Self {
        Error::StaleWorker {
            id: e.id(),
            reason: e.reason(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::InvalidArgument("x".into()).kind(), ErrorKind::Setup);
        assert_eq!(Error::UnknownTag { tag: 9 }.kind(), ErrorKind::Protocol);
        assert_eq!(Error::Closed("/jobs".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::Rejected.kind(), ErrorKind::Session);
        assert_eq!(Error::CoordinatorShutdown.kind(), ErrorKind::Session);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::malformed("short frame").is_recoverable());
        assert!(Error::StaleWorker { id: 7, reason: "out of range" }.is_recoverable());
        assert_eq!(
            Error::from(SlotError::Vacant(1)).to_string(),
            "Worker id 1 is not registered"
        );
        assert!(Error::Closed("/w1".into()).is_recoverable());
        assert!(!Error::ReceiveExhausted { failures: 5 }.is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
        assert!(!Error::Rejected.is_recoverable());
    }

    #[test]
    fn test_exit_code_is_uniform() {
        assert_eq!(Error::Rejected.exit_code(), 1);
        assert_eq!(Error::InvalidArgument("x".into()).exit_code(), 1);
        assert_eq!(Error::ReceiveExhausted { failures: 3 }.exit_code(), 1);
    }

    #[test]
    fn test_format_for_terminal_is_one_line() {
        let err = Error::ChannelUnavailable {
            addr: "/jobs".into(),
            reason: "no such file".into(),
        };
        let formatted = err.format_for_terminal();
        assert!(formatted.starts_with("Error: "));
        assert!(formatted.contains("/jobs"));
        assert_eq!(formatted.lines().count(), 1);
    }

    #[test]
    fn test_format_for_log() {
        let err = Error::UnknownTag { tag: 42 };
        let formatted = err.format_for_log();
        assert!(formatted.starts_with("[protocol]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
