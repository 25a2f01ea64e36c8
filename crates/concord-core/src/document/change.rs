//! Changes, checkpoints, and change packs: the push/pull contract.

use serde::{Deserialize, Serialize};

use crate::crdt::CrdtRoot;
use crate::error::CoreError;
use crate::ops::{OpInfo, Operation};
use crate::time::{ChangeId, TimeTicket};

use super::presence::PresenceChange;

/// A causally consistent bundle of operations from one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub message: Option<String>,
    pub operations: Vec<Operation>,
    pub presence_change: Option<PresenceChange>,
}

impl Change {
    /// Executes every operation against `root` in listed order.
    pub fn execute(&self, root: &mut CrdtRoot) -> Result<Vec<OpInfo>, CoreError> {
        let mut infos = Vec::new();
        for op in &self.operations {
            infos.extend(op.execute(root)?);
        }
        Ok(infos)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.presence_change.is_none()
    }
}

/// How far a replica has synced: the server's sequence for received
/// changes and the client's own acknowledged sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub server_seq: i64,
    pub client_seq: u32,
}

impl Checkpoint {
    pub const INITIAL: Checkpoint = Checkpoint {
        server_seq: 0,
        client_seq: 0,
    };

    pub const fn new(server_seq: i64, client_seq: u32) -> Self {
        Self {
            server_seq,
            client_seq,
        }
    }

    /// Componentwise maximum; checkpoints only move forward.
    pub fn forward(&self, other: &Checkpoint) -> Checkpoint {
        Checkpoint {
            server_seq: self.server_seq.max(other.server_seq),
            client_seq: self.client_seq.max(other.client_seq),
        }
    }
}

/// The unit of transport between a document and its server: a
/// checkpoint, remote or local changes, an optional snapshot, and the
/// GC bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePack {
    pub doc_key: String,
    pub checkpoint: Checkpoint,
    pub changes: Vec<Change>,
    /// Opaque snapshot bytes carrying a full root; see the codec.
    pub snapshot: Option<Vec<u8>>,
    /// Minimum across peers of the latest observed ticket; the GC
    /// upper bound.
    pub min_synced_ticket: Option<TimeTicket>,
}

impl ChangePack {
    pub fn new(
        doc_key: impl Into<String>,
        checkpoint: Checkpoint,
        changes: Vec<Change>,
    ) -> Self {
        Self {
            doc_key: doc_key.into(),
            checkpoint,
            changes,
            snapshot: None,
            min_synced_ticket: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_forward_is_componentwise_max() {
        let a = Checkpoint::new(3, 7);
        let b = Checkpoint::new(5, 2);
        assert_eq!(a.forward(&b), Checkpoint::new(5, 7));
        assert_eq!(b.forward(&a), Checkpoint::new(5, 7));
        assert_eq!(a.forward(&a), a);
    }
}
