//! Root registry: every element ever created, addressable by its
//! creation ticket until garbage collection purges it.

use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::time::TimeTicket;

use super::array::CrdtArray;
use super::counter::CrdtCounter;
use super::element::CrdtElement;
use super::object::CrdtObject;
use super::text::CrdtText;
use super::tree::CrdtTree;

/// Registry of elements plus tombstone bookkeeping.
///
/// Containers store child ids; the registry owns the element structs.
/// The removed set tracks tombstoned elements, the has-removed-nodes
/// set tracks elements carrying internal tombstones (text runs, tree
/// nodes) eligible for nested GC.
#[derive(Debug, Clone)]
pub struct CrdtRoot {
    elements: HashMap<TimeTicket, CrdtElement>,
    parents: HashMap<TimeTicket, TimeTicket>,
    removed_set: HashSet<TimeTicket>,
    has_removed_nodes_set: HashSet<TimeTicket>,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot {
    /// A registry holding an empty root object at the initial ticket.
    pub fn new() -> Self {
        let mut elements = HashMap::new();
        elements.insert(
            TimeTicket::INITIAL,
            CrdtElement::Object(CrdtObject::new(TimeTicket::INITIAL)),
        );
        Self {
            elements,
            parents: HashMap::new(),
            removed_set: HashSet::new(),
            has_removed_nodes_set: HashSet::new(),
        }
    }

    pub fn root_created_at(&self) -> TimeTicket {
        TimeTicket::INITIAL
    }

    // ── Registry ───────────────────────────────────────────────────────────

    pub fn register(&mut self, parent: TimeTicket, element: CrdtElement) {
        let id = element.created_at();
        self.parents.insert(id, parent);
        self.elements.insert(id, element);
    }

    pub fn find(&self, id: TimeTicket) -> Result<&CrdtElement, CoreError> {
        self.elements
            .get(&id)
            .ok_or_else(|| CoreError::StructureError(id.to_string()))
    }

    pub fn find_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtElement, CoreError> {
        self.elements
            .get_mut(&id)
            .ok_or_else(|| CoreError::StructureError(id.to_string()))
    }

    pub fn contains(&self, id: TimeTicket) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed_set.len()
    }

    pub fn object(&self, id: TimeTicket) -> Result<&CrdtObject, CoreError> {
        match self.find(id)? {
            CrdtElement::Object(o) => Ok(o),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "object")),
        }
    }

    pub fn object_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtObject, CoreError> {
        match self.find_mut(id)? {
            CrdtElement::Object(o) => Ok(o),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "object")),
        }
    }

    pub fn array(&self, id: TimeTicket) -> Result<&CrdtArray, CoreError> {
        match self.find(id)? {
            CrdtElement::Array(a) => Ok(a),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "array")),
        }
    }

    pub fn array_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtArray, CoreError> {
        match self.find_mut(id)? {
            CrdtElement::Array(a) => Ok(a),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "array")),
        }
    }

    pub fn text(&self, id: TimeTicket) -> Result<&CrdtText, CoreError> {
        match self.find(id)? {
            CrdtElement::Text(t) => Ok(t),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "text")),
        }
    }

    pub fn text_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtText, CoreError> {
        match self.find_mut(id)? {
            CrdtElement::Text(t) => Ok(t),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "text")),
        }
    }

    pub fn counter_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtCounter, CoreError> {
        match self.find_mut(id)? {
            CrdtElement::Counter(c) => Ok(c),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "counter")),
        }
    }

    pub fn counter(&self, id: TimeTicket) -> Result<&CrdtCounter, CoreError> {
        match self.find(id)? {
            CrdtElement::Counter(c) => Ok(c),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "counter")),
        }
    }

    pub fn tree(&self, id: TimeTicket) -> Result<&CrdtTree, CoreError> {
        match self.find(id)? {
            CrdtElement::Tree(t) => Ok(t),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "tree")),
        }
    }

    pub fn tree_mut(&mut self, id: TimeTicket) -> Result<&mut CrdtTree, CoreError> {
        match self.find_mut(id)? {
            CrdtElement::Tree(t) => Ok(t),
            _ => Err(CoreError::TypeMismatch(id.to_string(), "tree")),
        }
    }

    // ── Tombstones ─────────────────────────────────────────────────────────

    /// Tombstones an element. Monotonic; re-removal only advances the
    /// ticket.
    pub fn remove_element(
        &mut self,
        id: TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool, CoreError> {
        let advanced = self.find_mut(id)?.meta_mut().remove(executed_at);
        if advanced {
            self.removed_set.insert(id);
        }
        Ok(advanced)
    }

    pub fn mark_has_removed_nodes(&mut self, id: TimeTicket) {
        self.has_removed_nodes_set.insert(id);
    }

    /// Snapshot-import support: records an element whose metadata
    /// already carries a removal ticket.
    pub fn restore_removed_mark(&mut self, id: TimeTicket) {
        self.removed_set.insert(id);
    }

    // ── Paths ──────────────────────────────────────────────────────────────

    /// Renders the element's path from the root, e.g. `"$.a.b[2]"`.
    pub fn create_path(&self, id: TimeTicket) -> Result<String, CoreError> {
        if id == TimeTicket::INITIAL {
            return Ok("$".to_string());
        }
        let mut segments: Vec<String> = Vec::new();
        let mut cursor = id;
        while cursor != TimeTicket::INITIAL {
            let parent = *self
                .parents
                .get(&cursor)
                .ok_or_else(|| CoreError::StructureError(cursor.to_string()))?;
            let segment = match self.find(parent)? {
                CrdtElement::Object(o) => {
                    let key = o
                        .rht
                        .key_of(cursor)
                        .ok_or_else(|| CoreError::StructureError(cursor.to_string()))?;
                    format!(".{key}")
                }
                CrdtElement::Array(a) => {
                    let index = a
                        .list
                        .live_index_of(cursor)
                        .ok_or_else(|| CoreError::StructureError(cursor.to_string()))?;
                    format!("[{index}]")
                }
                e => {
                    return Err(CoreError::TypeMismatch(
                        e.created_at().to_string(),
                        "container",
                    ))
                }
            };
            segments.push(segment);
            cursor = parent;
        }
        segments.reverse();
        Ok(format!("${}", segments.concat()))
    }

    // ── Views ──────────────────────────────────────────────────────────────

    /// Canonical JSON view from the root object. Object keys are
    /// sorted, so equal documents render byte-identically.
    pub fn to_json(&self) -> serde_json::Value {
        self.element_to_json(TimeTicket::INITIAL)
    }

    pub fn element_to_json(&self, id: TimeTicket) -> serde_json::Value {
        let Some(element) = self.elements.get(&id) else {
            return serde_json::Value::Null;
        };
        match element {
            CrdtElement::Primitive(p) => p.to_json(),
            CrdtElement::Counter(c) => c.to_json(),
            CrdtElement::Text(t) => t.to_json(),
            CrdtElement::Tree(t) => t.to_json(),
            CrdtElement::Object(o) => {
                let mut entries: Vec<(&str, TimeTicket)> = o
                    .rht
                    .iter()
                    .filter(|(_, child)| {
                        self.elements
                            .get(child)
                            .map_or(false, |e| !e.is_removed())
                    })
                    .collect();
                entries.sort_by_key(|(k, _)| k.to_string());
                let mut map = serde_json::Map::new();
                for (key, child) in entries {
                    map.insert(key.to_string(), self.element_to_json(child));
                }
                serde_json::Value::Object(map)
            }
            CrdtElement::Array(a) => serde_json::Value::Array(
                a.list
                    .iter_live()
                    .map(|child| self.element_to_json(child))
                    .collect(),
            ),
        }
    }

    // ── Garbage collection ─────────────────────────────────────────────────

    /// Purges every tombstone all peers have observed
    /// (`removed_at <= min_synced`), recursing into text and tree
    /// internal tombstones. Returns the number of purged elements and
    /// nodes.
    pub fn garbage_collect(&mut self, min_synced: TimeTicket) -> usize {
        let mut count = 0;

        let targets: Vec<TimeTicket> = self
            .removed_set
            .iter()
            .copied()
            .filter(|id| {
                self.elements
                    .get(id)
                    .and_then(|e| e.removed_at())
                    .map_or(false, |r| r <= min_synced)
            })
            .collect();
        for id in targets {
            if !self.elements.contains_key(&id) {
                continue; // already purged as a descendant
            }
            count += self.purge_element(id);
        }

        let holders: Vec<TimeTicket> = self.has_removed_nodes_set.iter().copied().collect();
        for id in holders {
            count += match self.elements.get_mut(&id) {
                Some(CrdtElement::Text(t)) => t.purge_removed_nodes_before(min_synced),
                Some(CrdtElement::Tree(t)) => t.purge_removed_nodes_before(min_synced),
                _ => 0,
            };
            let still_has = match self.elements.get(&id) {
                Some(CrdtElement::Text(t)) => t.has_removed_nodes(),
                Some(CrdtElement::Tree(t)) => t.has_removed_nodes(),
                _ => false,
            };
            if !still_has {
                self.has_removed_nodes_set.remove(&id);
            }
        }

        tracing::debug!(purged = count, "garbage collected");
        count
    }

    fn purge_element(&mut self, id: TimeTicket) -> usize {
        if let Some(parent) = self.parents.get(&id).copied() {
            match self.elements.get_mut(&parent) {
                Some(CrdtElement::Object(o)) => o.rht.purge(id),
                Some(CrdtElement::Array(a)) => a.list.purge(id),
                _ => {}
            }
        }
        self.purge_subtree(id)
    }

    fn purge_subtree(&mut self, id: TimeTicket) -> usize {
        let Some(element) = self.elements.remove(&id) else {
            return 0;
        };
        self.parents.remove(&id);
        self.removed_set.remove(&id);
        self.has_removed_nodes_set.remove(&id);
        let mut count = 1;
        match element {
            CrdtElement::Object(o) => {
                for (_, child) in o.rht.iter() {
                    count += self.purge_subtree(child);
                }
            }
            CrdtElement::Array(a) => {
                for node in a.list.iter_all() {
                    count += self.purge_subtree(node.element);
                }
            }
            _ => {}
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::primitive::CrdtPrimitive;
    use crate::time::ActorId;
    use crate::value::PrimitiveValue;
    use serde_json::json;

    fn t(lamport: i64) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId([1; 12]))
    }

    fn set_primitive(root: &mut CrdtRoot, parent: TimeTicket, key: &str, v: i32, at: TimeTicket) {
        let element = CrdtPrimitive::new(PrimitiveValue::Integer(v), at);
        root.object_mut(parent).unwrap().rht.set(key, at);
        root.register(parent, CrdtElement::Primitive(element));
    }

    #[test]
    fn empty_root_renders_empty_object() {
        let root = CrdtRoot::new();
        assert_eq!(root.to_json(), json!({}));
    }

    #[test]
    fn paths_walk_parent_links() {
        let mut root = CrdtRoot::new();
        let obj_at = t(1);
        root.object_mut(TimeTicket::INITIAL)
            .unwrap()
            .rht
            .set("a", obj_at);
        root.register(
            TimeTicket::INITIAL,
            CrdtElement::Object(CrdtObject::new(obj_at)),
        );
        set_primitive(&mut root, obj_at, "b", 7, t(2));
        assert_eq!(root.create_path(t(2)).unwrap(), "$.a.b");
        assert_eq!(root.to_json(), json!({"a": {"b": 7}}));
    }

    #[test]
    fn unknown_element_is_a_structure_error() {
        let root = CrdtRoot::new();
        assert!(matches!(
            root.find(t(9)),
            Err(CoreError::StructureError(_))
        ));
    }

    #[test]
    fn removed_elements_stay_addressable_until_gc() {
        let mut root = CrdtRoot::new();
        set_primitive(&mut root, TimeTicket::INITIAL, "k", 1, t(1));
        root.remove_element(t(1), t(2)).unwrap();
        assert!(root.contains(t(1)));
        assert_eq!(root.to_json(), json!({}));

        // Not every peer has seen the removal yet.
        assert_eq!(root.garbage_collect(t(1)), 0);
        assert!(root.contains(t(1)));

        assert_eq!(root.garbage_collect(t(2)), 1);
        assert!(!root.contains(t(1)));
        assert_eq!(root.removed_count(), 0);
    }

    #[test]
    fn gc_purges_whole_subtrees() {
        let mut root = CrdtRoot::new();
        let obj_at = t(1);
        root.object_mut(TimeTicket::INITIAL)
            .unwrap()
            .rht
            .set("a", obj_at);
        root.register(
            TimeTicket::INITIAL,
            CrdtElement::Object(CrdtObject::new(obj_at)),
        );
        set_primitive(&mut root, obj_at, "b", 7, t(2));
        root.remove_element(obj_at, t(3)).unwrap();
        assert_eq!(root.garbage_collect(t(3)), 2);
        assert!(!root.contains(obj_at));
        assert!(!root.contains(t(2)));
    }

    #[test]
    fn array_paths_use_visible_indexing_for_tombstones() {
        let mut root = CrdtRoot::new();
        let arr_at = t(1);
        root.object_mut(TimeTicket::INITIAL)
            .unwrap()
            .rht
            .set("list", arr_at);
        root.register(
            TimeTicket::INITIAL,
            CrdtElement::Array(crate::crdt::array::CrdtArray::new(arr_at)),
        );
        let mut prev = TimeTicket::INITIAL;
        for i in 2..=4 {
            let id = t(i);
            root.array_mut(arr_at).unwrap().list.insert_after(prev, id, id).unwrap();
            root.register(
                arr_at,
                CrdtElement::Primitive(CrdtPrimitive::new(
                    PrimitiveValue::Integer(i as i32),
                    id,
                )),
            );
            prev = id;
        }
        root.array_mut(arr_at).unwrap().list.remove(t(3)).unwrap();
        root.remove_element(t(3), t(5)).unwrap();

        assert_eq!(root.create_path(t(2)).unwrap(), "$.list[0]");
        // The tombstone's segment matches visible indexing: one live
        // entry precedes it, the same index its live successor shows.
        assert_eq!(root.create_path(t(3)).unwrap(), "$.list[1]");
        assert_eq!(root.create_path(t(4)).unwrap(), "$.list[1]");
        assert_eq!(root.to_json(), json!({"list": [2, 4]}));
    }

    #[test]
    fn removal_is_monotonic() {
        let mut root = CrdtRoot::new();
        set_primitive(&mut root, TimeTicket::INITIAL, "k", 1, t(1));
        root.remove_element(t(1), t(5)).unwrap();
        assert!(!root.remove_element(t(1), t(3)).unwrap());
        assert_eq!(root.find(t(1)).unwrap().removed_at(), Some(t(5)));
    }
}
