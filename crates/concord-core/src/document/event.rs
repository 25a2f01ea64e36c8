//! Document events delivered synchronously to subscribers.

use crate::ops::OpInfo;
use crate::time::ActorId;

/// What happened to the document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocEvent {
    /// The root was replaced by a snapshot from a change pack.
    Snapshot,
    /// A local `update` committed.
    LocalChange {
        message: Option<String>,
        infos: Vec<OpInfo>,
    },
    /// A remote change from a change pack was applied.
    RemoteChange {
        actor: ActorId,
        message: Option<String>,
        infos: Vec<OpInfo>,
    },
    /// The presence peer set or a peer's presence changed.
    PeersChanged { peers: Vec<ActorId> },
}
