//! Admission limits and the routing engine.

pub mod hooks;
pub mod limits;
pub mod router;

pub use hooks::IngestHooks;
pub use limits::{DataSlot, IngestLimits};
pub use router::{InboundMessage, Router};
