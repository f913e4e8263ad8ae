//! Protocol module for coordinator/worker communication
//!
//! Defines the message types and their fixed-size binary framing.

mod messages;

pub use messages::*;
