//! taskpool - bounded task dispatcher
//!
//! A coordinator owns a fixed table of worker slots behind one message
//! channel. Workers register, receive a slot id, then repeatedly ask for a
//! task, classify it with [`oracle::is_prime`] and report the result.
//!
//! - [`channel`]: channel identities and the unix / in-process transports
//! - [`protocol`]: the fixed-size wire frames
//! - [`coordinator`]: slot registry and dispatch loop
//! - [`worker`]: the worker session state machine

pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod protocol;
pub mod shutdown;
pub mod tasks;
pub mod worker;

pub use error::{Error, Result};
