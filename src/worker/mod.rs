//! Worker side of the dispatcher
//!
//! A worker holds one session with one coordinator for its whole life.

mod session;

pub use session::*;
