//! Change context: collects the operations one `update` closure emits.

use crate::crdt::CrdtRoot;
use crate::ops::Operation;
use crate::time::{ChangeId, TimeTicket};

use super::change::Change;

/// Mutable state threaded through the proxies during an `update`.
///
/// Operations execute eagerly against the working copy so later edits
/// in the same closure observe earlier ones; the recorded operations
/// commit atomically to the real root afterwards. Tickets issued here
/// share the change's lamport and count the delimiter up from 1, so
/// logical time strictly increases within the change.
pub struct ChangeContext<'a> {
    pub(super) root: &'a mut CrdtRoot,
    id: ChangeId,
    delimiter: u32,
    message: Option<String>,
    operations: Vec<Operation>,
}

impl<'a> ChangeContext<'a> {
    pub fn new(root: &'a mut CrdtRoot, id: ChangeId, message: Option<String>) -> Self {
        Self {
            root,
            id,
            delimiter: 0,
            message,
            operations: Vec::new(),
        }
    }

    /// Issues the next ticket of this change.
    pub fn issue_time_ticket(&mut self) -> TimeTicket {
        self.delimiter += 1;
        self.id.ticket(self.delimiter)
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn root(&mut self) -> &mut CrdtRoot {
        self.root
    }

    pub fn root_ref(&self) -> &CrdtRoot {
        self.root
    }

    /// The change this context produced, or `None` when nothing was
    /// recorded.
    pub fn into_change(self) -> Option<Change> {
        let change = Change {
            id: self.id,
            message: self.message,
            operations: self.operations,
            presence_change: None,
        };
        (!change.is_empty()).then_some(change)
    }
}
