//! Binary codec for change packs and snapshots.
//!
//! Wire types serialize through serde into CBOR. Snapshots travel as a
//! portable element representation: identity (creation tickets, node
//! ids, tombstones) is preserved exactly, addresses are not.

use serde::{Deserialize, Serialize};

use crate::crdt::{
    CrdtArray, CrdtCounter, CrdtElement, CrdtObject, CrdtPrimitive, CrdtRoot, CrdtText,
    CrdtTree, SplitNodeId, TextValue,
};
use crate::crdt::tree::TreeSnapshotNode;
use crate::document::change::ChangePack;
use crate::document::presence::PresenceData;
use crate::error::CoreError;
use crate::time::{ActorId, TimeTicket};
use crate::value::{CounterValue, PrimitiveValue};

// ── Change packs ───────────────────────────────────────────────────────────

pub fn encode_change_pack(pack: &ChangePack) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(pack, &mut buf)
        .map_err(|e| CoreError::Unexpected(format!("change pack encode: {e}")))?;
    Ok(buf)
}

pub fn decode_change_pack(bytes: &[u8]) -> Result<ChangePack, CoreError> {
    ciborium::from_reader(bytes)
        .map_err(|e| CoreError::StructureError(format!("change pack decode: {e}")))
}

// ── Snapshot representation ────────────────────────────────────────────────

/// Portable form of one element, identity preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRepr {
    pub created_at: TimeTicket,
    pub moved_at: Option<TimeTicket>,
    pub removed_at: Option<TimeTicket>,
    pub body: ElementBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementBody {
    Primitive(PrimitiveValue),
    Counter(CounterValue),
    /// Entries in first-write key order; tombstoned children included.
    Object(Vec<(String, ElementRepr)>),
    /// Items in list order; tombstoned children included.
    Array(Vec<ElementRepr>),
    /// Runs in visible order; tombstoned runs included.
    Text(Vec<TextNodeRepr>),
    Tree(TreeSnapshotNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNodeRepr {
    pub id: SplitNodeId,
    pub value: TextValue,
    pub removed_at: Option<TimeTicket>,
}

/// A full root plus the presence map and the clock it was taken at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub root: ElementRepr,
    pub presences: Vec<(ActorId, PresenceData)>,
    pub lamport: i64,
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(snapshot, &mut buf)
        .map_err(|e| CoreError::Unexpected(format!("snapshot encode: {e}")))?;
    Ok(buf)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, CoreError> {
    ciborium::from_reader(bytes)
        .map_err(|e| CoreError::StructureError(format!("snapshot decode: {e}")))
}

// ── Export ─────────────────────────────────────────────────────────────────

pub fn export_root(root: &CrdtRoot) -> Result<ElementRepr, CoreError> {
    export_element(root, root.root_created_at())
}

pub fn export_element(root: &CrdtRoot, id: TimeTicket) -> Result<ElementRepr, CoreError> {
    let element = root.find(id)?;
    let meta = element.meta();
    let body = match element {
        CrdtElement::Primitive(p) => ElementBody::Primitive(p.value.clone()),
        CrdtElement::Counter(c) => ElementBody::Counter(c.value),
        CrdtElement::Object(o) => {
            let mut entries = Vec::new();
            for (key, child) in o.rht.iter() {
                entries.push((key.to_string(), export_element(root, child)?));
            }
            ElementBody::Object(entries)
        }
        CrdtElement::Array(a) => {
            let mut items = Vec::new();
            for node in a.list.iter_all() {
                items.push(export_element(root, node.element)?);
            }
            ElementBody::Array(items)
        }
        CrdtElement::Text(t) => ElementBody::Text(
            t.nodes_for_snapshot()
                .into_iter()
                .map(|(id, value, removed_at)| TextNodeRepr {
                    id,
                    value,
                    removed_at,
                })
                .collect(),
        ),
        CrdtElement::Tree(t) => ElementBody::Tree(t.export_root()),
    };
    Ok(ElementRepr {
        created_at: meta.created_at,
        moved_at: meta.moved_at,
        removed_at: meta.removed_at,
        body,
    })
}

// ── Import ─────────────────────────────────────────────────────────────────

/// Rebuilds a registry from a snapshot root. The repr's own node must
/// be the root object at the initial ticket.
pub fn import_root(repr: &ElementRepr) -> Result<CrdtRoot, CoreError> {
    if repr.created_at != TimeTicket::INITIAL {
        return Err(CoreError::Unexpected(
            "snapshot root must carry the initial ticket".to_string(),
        ));
    }
    let ElementBody::Object(entries) = &repr.body else {
        return Err(CoreError::Unexpected(
            "snapshot root must be an object".to_string(),
        ));
    };
    let mut root = CrdtRoot::new();
    for (key, child) in entries {
        root.object_mut(TimeTicket::INITIAL)?
            .rht
            .set(key, child.created_at);
        import_element(&mut root, TimeTicket::INITIAL, child)?;
    }
    Ok(root)
}

fn import_element(
    root: &mut CrdtRoot,
    parent: TimeTicket,
    repr: &ElementRepr,
) -> Result<(), CoreError> {
    let created_at = repr.created_at;
    let mut element = match &repr.body {
        ElementBody::Primitive(v) => {
            CrdtElement::Primitive(CrdtPrimitive::new(v.clone(), created_at))
        }
        ElementBody::Counter(v) => CrdtElement::Counter(CrdtCounter::new(*v, created_at)),
        ElementBody::Object(entries) => {
            let mut object = CrdtObject::new(created_at);
            for (key, child) in entries {
                object.rht.set(key, child.created_at);
            }
            CrdtElement::Object(object)
        }
        ElementBody::Array(items) => {
            let mut array = CrdtArray::new(created_at);
            for item in items {
                array.list.push_node(
                    item.created_at,
                    item.moved_at.unwrap_or(item.created_at),
                    item.removed_at.is_some(),
                );
            }
            CrdtElement::Array(array)
        }
        ElementBody::Text(nodes) => {
            let mut text = CrdtText::new(created_at);
            for node in nodes {
                text.push_node(node.id, node.value.clone(), node.removed_at);
            }
            CrdtElement::Text(text)
        }
        ElementBody::Tree(snapshot) => {
            CrdtElement::Tree(CrdtTree::from_snapshot(created_at, snapshot))
        }
    };
    {
        let meta = element.meta_mut();
        meta.moved_at = repr.moved_at;
        meta.removed_at = repr.removed_at;
    }
    let has_internal_tombstones = match &element {
        CrdtElement::Text(t) => t.has_removed_nodes(),
        CrdtElement::Tree(t) => t.has_removed_nodes(),
        _ => false,
    };
    root.register(parent, element);
    if repr.removed_at.is_some() {
        root.restore_removed_mark(created_at);
    }
    if has_internal_tombstones {
        root.mark_has_removed_nodes(created_at);
    }
    match &repr.body {
        ElementBody::Object(entries) => {
            for (_, child) in entries {
                import_element(root, created_at, child)?;
            }
        }
        ElementBody::Array(items) => {
            for item in items {
                import_element(root, created_at, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}
