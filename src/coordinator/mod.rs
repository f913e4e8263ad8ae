//! Coordinator side of the dispatcher
//!
//! - Slot registry mapping worker ids to reply channels
//! - Dispatch loop handling Register / Ready / Result / Disconnect
//! - Shutdown sweep notifying every registered worker

mod dispatch;
mod registry;

pub use dispatch::*;
pub use registry::*;
