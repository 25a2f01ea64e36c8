//! Shared element metadata and the element sum type.

use crate::time::TimeTicket;

use super::array::CrdtArray;
use super::counter::CrdtCounter;
use super::object::CrdtObject;
use super::primitive::CrdtPrimitive;
use super::text::CrdtText;
use super::tree::CrdtTree;

/// Lifecycle metadata carried by every element.
///
/// `removed_at` is monotonic: once set it is only ever advanced to a
/// later ticket, never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementMeta {
    pub created_at: TimeTicket,
    pub moved_at: Option<TimeTicket>,
    pub removed_at: Option<TimeTicket>,
}

impl ElementMeta {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            moved_at: None,
            removed_at: None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Tombstones the element. Returns `true` when `executed_at`
    /// advanced the removal ticket.
    pub fn remove(&mut self, executed_at: TimeTicket) -> bool {
        match self.removed_at {
            Some(removed_at) if !executed_at.after(&removed_at) => false,
            _ => {
                self.removed_at = Some(executed_at);
                true
            }
        }
    }

    /// Records an array move. LWW: a move only wins over a later one.
    pub fn set_moved_at(&mut self, executed_at: TimeTicket) -> bool {
        match self.moved_at {
            Some(moved_at) if !executed_at.after(&moved_at) => false,
            _ => {
                self.moved_at = Some(executed_at);
                true
            }
        }
    }

    /// The ticket that orders this element among RGA siblings.
    pub fn positioned_at(&self) -> TimeTicket {
        self.moved_at.unwrap_or(self.created_at)
    }
}

/// All possible CRDT element types.
#[derive(Debug, Clone)]
pub enum CrdtElement {
    Primitive(CrdtPrimitive),
    Object(CrdtObject),
    Array(CrdtArray),
    Counter(CrdtCounter),
    Text(CrdtText),
    Tree(CrdtTree),
}

impl CrdtElement {
    pub fn meta(&self) -> &ElementMeta {
        match self {
            Self::Primitive(e) => &e.meta,
            Self::Object(e) => &e.meta,
            Self::Array(e) => &e.meta,
            Self::Counter(e) => &e.meta,
            Self::Text(e) => &e.meta,
            Self::Tree(e) => &e.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ElementMeta {
        match self {
            Self::Primitive(e) => &mut e.meta,
            Self::Object(e) => &mut e.meta,
            Self::Array(e) => &mut e.meta,
            Self::Counter(e) => &mut e.meta,
            Self::Text(e) => &mut e.meta,
            Self::Tree(e) => &mut e.meta,
        }
    }

    pub fn created_at(&self) -> TimeTicket {
        self.meta().created_at
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.meta().removed_at
    }

    pub fn is_removed(&self) -> bool {
        self.meta().is_removed()
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Primitive(_) => "primitive",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Counter(_) => "counter",
            Self::Text(_) => "text",
            Self::Tree(_) => "tree",
        }
    }
}
