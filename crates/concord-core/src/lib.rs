//! Core primitives for concord.
//!
//! A replicated JSON-like document composed of primitives, objects,
//! arrays, counters, rich text, and trees. Replicas mutate the document
//! concurrently and converge once they have exchanged the same set of
//! changes.

pub mod codec;
pub mod crdt;
pub mod document;
pub mod error;
pub mod ops;
pub mod time;
pub mod value;

pub use document::{DocEvent, Document};
pub use error::CoreError;
pub use time::{ActorId, ChangeId, TimeTicket};
pub use value::{CounterValue, PrimitiveValue};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
