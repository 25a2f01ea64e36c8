//! Array element: an RGA-ordered sequence of element references.
//!
//! The list keeps every node, tombstones included, because concurrent
//! operations may still address them. Ordering state (`positioned_at`,
//! `removed`) is mirrored into the list nodes so that index math never
//! needs the element registry.

use crate::error::CoreError;
use crate::time::TimeTicket;

use super::element::ElementMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgaListNode {
    /// Creation ticket of the referenced element.
    pub element: TimeTicket,
    /// `moved_at` if the element was ever moved, else `created_at`.
    /// Orders concurrent inserts and moves at the same left origin.
    pub positioned_at: TimeTicket,
    pub removed: bool,
}

/// Ordered sequence of element ids with RGA insert/move semantics.
///
/// A linear scan per operation, like the upstream chunk list; correct
/// but not optimised for very large arrays.
#[derive(Debug, Clone, Default)]
pub struct RgaTreeList {
    nodes: Vec<RgaListNode>,
}

impl RgaTreeList {
    pub fn new() -> Self {
        Self::default()
    }

    fn position_of(&self, element: TimeTicket) -> Option<usize> {
        self.nodes.iter().position(|n| n.element == element)
    }

    /// Inserts `element` to the right of `prev` ([`TimeTicket::INITIAL`]
    /// = the front). Among concurrent siblings at the same origin the
    /// node with the greater ticket stays closer to the origin.
    pub fn insert_after(
        &mut self,
        prev: TimeTicket,
        element: TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<(), CoreError> {
        let mut idx = if prev == TimeTicket::INITIAL {
            0
        } else {
            self.position_of(prev)
                .ok_or_else(|| CoreError::StructureError(prev.to_string()))?
                + 1
        };
        while idx < self.nodes.len() && self.nodes[idx].positioned_at.after(&executed_at) {
            idx += 1;
        }
        self.nodes.insert(
            idx,
            RgaListNode {
                element,
                positioned_at: executed_at,
                removed: false,
            },
        );
        Ok(())
    }

    /// Moves `element` to the right of `prev`. The caller has already
    /// won the LWW contest on the element's `moved_at`.
    pub fn move_after(
        &mut self,
        prev: TimeTicket,
        element: TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<(), CoreError> {
        let idx = self
            .position_of(element)
            .ok_or_else(|| CoreError::StructureError(element.to_string()))?;
        let node = self.nodes.remove(idx);
        let mut insert_at = if prev == TimeTicket::INITIAL {
            0
        } else {
            self.position_of(prev)
                .ok_or_else(|| CoreError::StructureError(prev.to_string()))?
                + 1
        };
        while insert_at < self.nodes.len()
            && self.nodes[insert_at].positioned_at.after(&executed_at)
        {
            insert_at += 1;
        }
        self.nodes.insert(
            insert_at,
            RgaListNode {
                positioned_at: executed_at,
                ..node
            },
        );
        Ok(())
    }

    /// Tombstones the list node for `element`.
    pub fn remove(&mut self, element: TimeTicket) -> Result<(), CoreError> {
        let idx = self
            .position_of(element)
            .ok_or_else(|| CoreError::StructureError(element.to_string()))?;
        self.nodes[idx].removed = true;
        Ok(())
    }

    /// Unlinks a purged element entirely.
    pub fn purge(&mut self, element: TimeTicket) {
        self.nodes.retain(|n| n.element != element);
    }

    pub fn contains(&self, element: TimeTicket) -> bool {
        self.position_of(element).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element id at visible position `index`.
    pub fn get(&self, index: usize) -> Option<TimeTicket> {
        self.iter_live().nth(index)
    }

    /// Visible position of `element`, if it is live.
    pub fn index_of(&self, element: TimeTicket) -> Option<usize> {
        let mut index = 0;
        for node in &self.nodes {
            if node.element == element {
                return (!node.removed).then_some(index);
            }
            if !node.removed {
                index += 1;
            }
        }
        None
    }

    /// The position `element` holds (or held) among live entries: the
    /// number of live entries before it. Matches the visible index for
    /// live entries and stays aligned with it for tombstones.
    pub fn live_index_of(&self, element: TimeTicket) -> Option<usize> {
        let mut index = 0;
        for node in &self.nodes {
            if node.element == element {
                return Some(index);
            }
            if !node.removed {
                index += 1;
            }
        }
        None
    }

    /// The id of the last live element, or `INITIAL` when empty.
    /// Appends insert after this.
    pub fn last(&self) -> TimeTicket {
        self.iter_live().last().unwrap_or(TimeTicket::INITIAL)
    }

    pub fn iter_live(&self) -> impl Iterator<Item = TimeTicket> + '_ {
        self.nodes
            .iter()
            .filter(|n| !n.removed)
            .map(|n| n.element)
    }

    /// All nodes in list order, tombstones included.
    pub fn iter_all(&self) -> impl Iterator<Item = &RgaListNode> {
        self.nodes.iter()
    }

    /// Snapshot-rebuild support: appends a node in list order,
    /// bypassing RGA ordering.
    pub fn push_node(&mut self, element: TimeTicket, positioned_at: TimeTicket, removed: bool) {
        self.nodes.push(RgaListNode {
            element,
            positioned_at,
            removed,
        });
    }
}

/// Array element.
#[derive(Debug, Clone)]
pub struct CrdtArray {
    pub meta: ElementMeta,
    pub list: RgaTreeList,
}

impl CrdtArray {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            list: RgaTreeList::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ActorId;

    fn t(lamport: i64, actor: u8) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId([actor; 12]))
    }

    #[test]
    fn insert_after_builds_order() {
        let mut list = RgaTreeList::new();
        list.insert_after(TimeTicket::INITIAL, t(1, 1), t(1, 1)).unwrap();
        list.insert_after(t(1, 1), t(2, 1), t(2, 1)).unwrap();
        list.insert_after(TimeTicket::INITIAL, t(3, 1), t(3, 1)).unwrap();
        let order: Vec<TimeTicket> = list.iter_live().collect();
        assert_eq!(order, vec![t(3, 1), t(1, 1), t(2, 1)]);
    }

    #[test]
    fn concurrent_inserts_order_by_ticket() {
        // Both actors insert at the front; the greater ticket stays
        // closer to the origin on both replicas.
        let a = t(1, 1);
        let b = t(1, 2);

        let mut left = RgaTreeList::new();
        left.insert_after(TimeTicket::INITIAL, a, a).unwrap();
        left.insert_after(TimeTicket::INITIAL, b, b).unwrap();

        let mut right = RgaTreeList::new();
        right.insert_after(TimeTicket::INITIAL, b, b).unwrap();
        right.insert_after(TimeTicket::INITIAL, a, a).unwrap();

        let lo: Vec<TimeTicket> = left.iter_live().collect();
        let ro: Vec<TimeTicket> = right.iter_live().collect();
        assert_eq!(lo, ro);
        assert_eq!(lo, vec![b, a]);
    }

    #[test]
    fn remove_hides_but_keeps_addressable() {
        let mut list = RgaTreeList::new();
        list.insert_after(TimeTicket::INITIAL, t(1, 1), t(1, 1)).unwrap();
        list.insert_after(t(1, 1), t(2, 1), t(2, 1)).unwrap();
        list.remove(t(1, 1)).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.contains(t(1, 1)));
        // New inserts may still anchor on the tombstone.
        list.insert_after(t(1, 1), t(3, 1), t(3, 1)).unwrap();
        let order: Vec<TimeTicket> = list.iter_live().collect();
        assert_eq!(order, vec![t(3, 1), t(2, 1)]);
    }

    #[test]
    fn live_index_counts_only_live_predecessors() {
        let mut list = RgaTreeList::new();
        for i in 1..=3 {
            let id = t(i, 1);
            list.insert_after(list.last(), id, id).unwrap();
        }
        list.remove(t(2, 1)).unwrap();
        assert_eq!(list.index_of(t(2, 1)), None);
        assert_eq!(list.live_index_of(t(2, 1)), Some(1));
        // The tombstone does not shift its live successor.
        assert_eq!(list.live_index_of(t(3, 1)), Some(1));
        assert_eq!(list.index_of(t(3, 1)), Some(1));
        assert_eq!(list.live_index_of(t(9, 1)), None);
    }

    #[test]
    fn move_after_reorders() {
        let mut list = RgaTreeList::new();
        for i in 1..=3 {
            let id = t(i, 1);
            list.insert_after(list.last(), id, id).unwrap();
        }
        list.move_after(TimeTicket::INITIAL, t(3, 1), t(4, 1)).unwrap();
        let order: Vec<TimeTicket> = list.iter_live().collect();
        assert_eq!(order, vec![t(3, 1), t(1, 1), t(2, 1)]);
    }

    #[test]
    fn purge_unlinks() {
        let mut list = RgaTreeList::new();
        list.insert_after(TimeTicket::INITIAL, t(1, 1), t(1, 1)).unwrap();
        list.remove(t(1, 1)).unwrap();
        list.purge(t(1, 1));
        assert!(!list.contains(t(1, 1)));
    }
}
