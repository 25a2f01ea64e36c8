//! Tree element: nested nodes with parent/left-sibling positioning.
//!
//! Siblings are ordered by an RGA keyed on node id. A position is
//! `(parent, left_sibling)`: "inside `parent`, immediately right of
//! `left_sibling`". Text leaves split like the text sequence does; a
//! split piece keeps its insertion ticket with a higher offset, and a
//! boundary inside or after a text run is encoded as
//! `(run.created_at, absolute_offset)`.
//!
//! Visible indices follow the token model: an element occupies an
//! opening and a closing token, a text run one token per UTF-16 code
//! unit. Index math walks the tree linearly; correct, not optimised
//! for very large documents.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::time::TimeTicket;

use super::element::ElementMeta;
use super::rht::Rht;
use super::text::{utf16_byte_index, utf16_len};

/// Node kind reserved for text leaves.
pub const TEXT_KIND: &str = "text";

// ── Identity & positions ───────────────────────────────────────────────────

/// Identity of a tree node: creation ticket plus, for text pieces, the
/// unit offset within the original insertion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TreeNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl TreeNodeId {
    pub const fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }
}

impl fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.created_at, self.offset)
    }
}

/// Insertion site: inside `parent`, immediately right of
/// `left_sibling` (`None` = at the start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePos {
    pub parent: TreeNodeId,
    pub left_sibling: Option<TreeNodeId>,
}

/// Portable description of a subtree carried by tree operations. Ids
/// are issued by the originating change context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeDesc {
    pub id: TreeNodeId,
    pub kind: String,
    pub value: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<TreeNodeDesc>,
}

impl TreeNodeDesc {
    pub fn element(id: TreeNodeId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            value: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(id: TreeNodeId, value: impl Into<String>) -> Self {
        Self {
            id,
            kind: TEXT_KIND.to_string(),
            value: value.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Snapshot form of a tree node, tombstones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshotNode {
    pub id: TreeNodeId,
    pub kind: String,
    pub value: String,
    pub attrs: Rht,
    pub removed_at: Option<TimeTicket>,
    pub children: Vec<TreeSnapshotNode>,
}

// ── Nodes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TreeNode {
    kind: String,
    value: String,
    attrs: Rht,
    parent: Option<TreeNodeId>,
    /// Sibling order, tombstones included.
    children: Vec<TreeNodeId>,
    removed_at: Option<TimeTicket>,
    moved_at: Option<TimeTicket>,
}

impl TreeNode {
    fn is_text(&self) -> bool {
        self.kind == TEXT_KIND
    }

    fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    fn text_length(&self) -> u32 {
        utf16_len(&self.value)
    }
}

// ── CrdtTree ───────────────────────────────────────────────────────────────

/// Tree element.
#[derive(Debug, Clone)]
pub struct CrdtTree {
    pub meta: ElementMeta,
    nodes: BTreeMap<TreeNodeId, TreeNode>,
    root: TreeNodeId,
}

impl CrdtTree {
    /// Builds the tree from its initial root description.
    pub fn new(created_at: TimeTicket, root_desc: &TreeNodeDesc) -> Self {
        let mut tree = Self {
            meta: ElementMeta::new(created_at),
            nodes: BTreeMap::new(),
            root: root_desc.id,
        };
        tree.materialize(root_desc, created_at);
        tree
    }

    pub fn root_id(&self) -> TreeNodeId {
        self.root
    }

    fn node(&self, id: TreeNodeId) -> Result<&TreeNode, CoreError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CoreError::StructureError(id.to_string()))
    }

    /// Creates nodes for `desc` and its descendants. Children attach
    /// in description order; sibling RGA ordering only matters for
    /// concurrent inserts at the same site.
    fn materialize(&mut self, desc: &TreeNodeDesc, executed_at: TimeTicket) -> TreeNodeId {
        let mut attrs = Rht::new();
        for (key, value) in &desc.attributes {
            attrs.set(key, value, executed_at);
        }
        self.nodes.insert(
            desc.id,
            TreeNode {
                kind: desc.kind.clone(),
                value: desc.value.clone(),
                attrs,
                parent: None,
                children: Vec::new(),
                removed_at: None,
                moved_at: None,
            },
        );
        for child in &desc.children {
            let child_id = self.materialize(child, executed_at);
            self.nodes.get_mut(&child_id).unwrap().parent = Some(desc.id);
            self.nodes.get_mut(&desc.id).unwrap().children.push(child_id);
        }
        desc.id
    }

    // ── Sizes & indices ────────────────────────────────────────────────────

    fn size_of(&self, id: TreeNodeId) -> u32 {
        let node = &self.nodes[&id];
        if node.is_removed() {
            return 0;
        }
        if node.is_text() {
            return node.text_length();
        }
        2 + node
            .children
            .iter()
            .map(|c| self.size_of(*c))
            .sum::<u32>()
    }

    /// Visible size of the root's interior.
    pub fn size(&self) -> u32 {
        self.nodes[&self.root]
            .children
            .iter()
            .map(|c| self.size_of(*c))
            .sum()
    }

    /// Index of the first position inside `id`.
    fn interior_start(&self, id: TreeNodeId) -> u32 {
        if id == self.root {
            0
        } else {
            self.start_of(id) + 1
        }
    }

    /// Index of the node's first token.
    fn start_of(&self, id: TreeNodeId) -> u32 {
        let parent = self.nodes[&id]
            .parent
            .expect("start_of called on the root");
        let mut acc = self.interior_start(parent);
        for child in &self.nodes[&parent].children {
            if *child == id {
                break;
            }
            acc += self.size_of(*child);
        }
        acc
    }

    /// Visible index denoted by a resolved `(parent, left)` pair.
    pub fn to_index(&self, parent: TreeNodeId, left: Option<TreeNodeId>) -> u32 {
        match left {
            None => self.interior_start(parent),
            Some(left) => self.start_of(left) + self.size_of(left),
        }
    }

    /// Maps a visible index to a position. Boundaries inside or after
    /// a text run are encoded as offsets into the run's insertion.
    pub fn find_pos(&self, index: u32) -> Result<TreePos, CoreError> {
        self.find_pos_in(self.root, index)
    }

    fn find_pos_in(&self, parent: TreeNodeId, index: u32) -> Result<TreePos, CoreError> {
        let mut idx = index;
        let mut last_live: Option<TreeNodeId> = None;
        let children = self.nodes[&parent].children.clone();
        for child_id in children {
            let child = &self.nodes[&child_id];
            if child.is_removed() {
                continue;
            }
            if idx == 0 {
                return Ok(TreePos {
                    parent,
                    left_sibling: last_live.map(|l| self.after_node_id(l)),
                });
            }
            let size = self.size_of(child_id);
            if idx < size {
                if child.is_text() {
                    return Ok(TreePos {
                        parent,
                        left_sibling: Some(TreeNodeId::new(
                            child_id.created_at,
                            child_id.offset + idx,
                        )),
                    });
                }
                return self.find_pos_in(child_id, idx - 1);
            }
            idx -= size;
            last_live = Some(child_id);
        }
        if idx == 0 {
            Ok(TreePos {
                parent,
                left_sibling: last_live.map(|l| self.after_node_id(l)),
            })
        } else {
            Err(CoreError::OutOfRange(index.to_string()))
        }
    }

    /// The id that denotes "after the whole of `id`" when used as a
    /// left sibling: text runs use their end offset, elements their id.
    fn after_node_id(&self, id: TreeNodeId) -> TreeNodeId {
        let node = &self.nodes[&id];
        if node.is_text() {
            TreeNodeId::new(id.created_at, id.offset + node.text_length())
        } else {
            id
        }
    }

    // ── Position resolution ────────────────────────────────────────────────

    /// Resolves a position to `(parent, left)`, splitting text runs as
    /// needed and falling back to the closest live position: a
    /// tombstoned left sibling yields its nearest live left sibling, a
    /// tombstoned parent climbs to the nearest live ancestor.
    pub fn find_nodes_and_split_text(
        &mut self,
        pos: &TreePos,
        executed_at: TimeTicket,
    ) -> Result<(TreeNodeId, Option<TreeNodeId>), CoreError> {
        let mut parent = {
            let node = self.node(pos.parent)?;
            if node.is_text() {
                return Err(CoreError::TypeMismatch(pos.parent.to_string(), "element"));
            }
            pos.parent
        };
        let mut left = match pos.left_sibling {
            None => None,
            Some(lid) => self.resolve_left(lid)?,
        };
        if let Some(l) = left {
            if self.nodes[&l].is_removed() {
                left = self.nearest_live_left_sibling(l);
            }
        }
        while self.nodes[&parent].is_removed() {
            left = self.nearest_live_left_sibling(parent);
            let up = self.nodes[&parent]
                .parent
                .ok_or_else(|| CoreError::Unexpected("tombstoned tree root".to_string()))?;
            parent = up;
        }
        Ok((parent, left))
    }

    /// Resolves a left-sibling id, splitting the containing text run
    /// when the id points strictly inside it. Boundary offsets prefer
    /// the left piece.
    fn resolve_left(&mut self, lid: TreeNodeId) -> Result<Option<TreeNodeId>, CoreError> {
        let floor = self
            .nodes
            .range(..=lid)
            .next_back()
            .filter(|(id, _)| id.created_at == lid.created_at)
            .map(|(id, _)| *id)
            .ok_or_else(|| CoreError::StructureError(lid.to_string()))?;
        let node = &self.nodes[&floor];
        if !node.is_text() {
            if floor != lid {
                return Err(CoreError::StructureError(lid.to_string()));
            }
            return Ok(Some(floor));
        }
        let relative = lid.offset - floor.offset;
        if relative > node.text_length() {
            return Err(CoreError::StructureError(lid.to_string()));
        }
        if lid.offset == 0 {
            // Boundary before the whole insertion.
            return Ok(self.previous_sibling(floor));
        }
        if relative == 0 {
            // Exactly on an existing split boundary: the previous
            // piece ends here.
            return Ok(self.previous_piece(floor));
        }
        if relative == node.text_length() {
            return Ok(Some(floor));
        }
        self.split_text(floor, relative)?;
        Ok(Some(floor))
    }

    fn previous_sibling(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        let parent = self.nodes[&id].parent?;
        let children = &self.nodes[&parent].children;
        let idx = children.iter().position(|c| *c == id)?;
        idx.checked_sub(1).map(|i| children[i])
    }

    /// The piece of the same insertion that ends where `id` starts.
    fn previous_piece(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        self.nodes
            .range(..id)
            .next_back()
            .filter(|(p, _)| p.created_at == id.created_at)
            .map(|(p, _)| *p)
    }

    fn nearest_live_left_sibling(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        let parent = self.nodes[&id].parent?;
        let children = &self.nodes[&parent].children;
        let idx = children.iter().position(|c| *c == id)?;
        children[..idx]
            .iter()
            .rev()
            .find(|c| !self.nodes[c].is_removed())
            .copied()
    }

    /// Splits a text run at `relative` units; the new piece keeps the
    /// insertion ticket with a higher offset and inherits tombstone
    /// state.
    fn split_text(&mut self, id: TreeNodeId, relative: u32) -> Result<(), CoreError> {
        let (suffix, parent, removed_at) = {
            let node = self.nodes.get_mut(&id).unwrap();
            let byte_idx = utf16_byte_index(&node.value, relative)
                .ok_or_else(|| CoreError::OutOfRange(relative.to_string()))?;
            let suffix = node.value.split_off(byte_idx);
            (suffix, node.parent, node.removed_at)
        };
        let right_id = TreeNodeId::new(id.created_at, id.offset + relative);
        self.nodes.insert(
            right_id,
            TreeNode {
                kind: TEXT_KIND.to_string(),
                value: suffix,
                attrs: Rht::new(),
                parent,
                children: Vec::new(),
                removed_at,
                moved_at: None,
            },
        );
        if let Some(parent) = parent {
            let children = &mut self.nodes.get_mut(&parent).unwrap().children;
            let idx = children
                .iter()
                .position(|c| *c == id)
                .ok_or_else(|| CoreError::Unexpected(format!("{id} detached from parent")))?;
            children.insert(idx + 1, right_id);
        }
        Ok(())
    }

    // ── Editing ────────────────────────────────────────────────────────────

    /// Replaces the range between two positions with `contents`.
    /// Returns the covered `(from, to)` visible indices, computed
    /// before the edit is applied.
    pub fn edit(
        &mut self,
        from: &TreePos,
        to: &TreePos,
        contents: &[TreeNodeDesc],
        executed_at: TimeTicket,
    ) -> Result<(u32, u32), CoreError> {
        // Resolve `from` first: its boundary piece keeps ending at the
        // cut when the `to` split lands further right, but not the
        // other way around.
        let (from_parent, from_left) = self.find_nodes_and_split_text(from, executed_at)?;
        let (to_parent, to_left) = self.find_nodes_and_split_text(to, executed_at)?;
        let from_idx = self.to_index(from_parent, from_left);
        let to_idx = self.to_index(to_parent, to_left);
        if to_idx > from_idx {
            self.delete_range(from_parent, from_left, from_idx, to_idx, executed_at)?;
        }
        let mut left = from_left;
        for desc in contents {
            let id = self.materialize(desc, executed_at);
            self.attach_child(from_parent, left, id, id.created_at)?;
            left = Some(id);
        }
        Ok((from_idx, to_idx))
    }

    /// Convenience wrapper resolving visible indices first.
    pub fn edit_by_index(
        &mut self,
        from: u32,
        to: u32,
        contents: &[TreeNodeDesc],
        executed_at: TimeTicket,
    ) -> Result<(u32, u32), CoreError> {
        let from_pos = self.find_pos(from)?;
        let to_pos = self.find_pos(to)?;
        self.edit(&from_pos, &to_pos, contents, executed_at)
    }

    fn delete_range(
        &mut self,
        from_parent: TreeNodeId,
        from_left: Option<TreeNodeId>,
        from_idx: u32,
        to_idx: u32,
        executed_at: TimeTicket,
    ) -> Result<(), CoreError> {
        let mut tombstone: Vec<TreeNodeId> = Vec::new();
        let mut merge: Vec<TreeNodeId> = Vec::new();
        let mut pos = 0u32;
        self.classify_children(
            self.root,
            &mut pos,
            from_idx,
            to_idx,
            &mut tombstone,
            &mut merge,
        );
        for id in &tombstone {
            self.tombstone_subtree(*id, executed_at);
        }
        // Survivors land at the from position, not at the end of the
        // parent: a merge chain nested several levels deep must keep
        // its content left of from_parent's untouched later siblings.
        let mut left = from_left;
        for id in &merge {
            self.tombstone_node(*id, executed_at);
            let survivors: Vec<TreeNodeId> = self.nodes[id]
                .children
                .iter()
                .filter(|c| !self.nodes[c].is_removed())
                .copied()
                .collect();
            for child in survivors {
                let source = &mut self.nodes.get_mut(id).unwrap().children;
                source.retain(|c| *c != child);
                self.attach_child(from_parent, left, child, child.created_at)?;
                left = Some(child);
            }
        }
        Ok(())
    }

    /// Token walk over `[from, to)`. Fully covered text runs and
    /// elements go to `tombstone`; an element whose opening token only
    /// is covered goes to `merge` (its survivors re-parent to the
    /// from side); an element whose closing token only is covered is
    /// the absorbing ancestor and survives.
    fn classify_children(
        &self,
        parent: TreeNodeId,
        pos: &mut u32,
        from: u32,
        to: u32,
        tombstone: &mut Vec<TreeNodeId>,
        merge: &mut Vec<TreeNodeId>,
    ) {
        let children = self.nodes[&parent].children.clone();
        for child_id in children {
            let child = &self.nodes[&child_id];
            if child.is_removed() {
                continue;
            }
            if child.is_text() {
                let start = *pos;
                let end = start + child.text_length();
                if start >= from && end <= to && end > start {
                    tombstone.push(child_id);
                }
                *pos = end;
            } else {
                let open = *pos;
                *pos += 1;
                self.classify_children(child_id, pos, from, to, tombstone, merge);
                let close = *pos;
                *pos += 1;
                let open_covered = open >= from && open < to;
                let close_covered = close >= from && close < to;
                if open_covered && close_covered {
                    tombstone.push(child_id);
                } else if open_covered {
                    merge.push(child_id);
                }
            }
        }
    }

    fn tombstone_node(&mut self, id: TreeNodeId, executed_at: TimeTicket) {
        let node = self.nodes.get_mut(&id).unwrap();
        if node.removed_at.is_none() {
            node.removed_at = Some(executed_at);
        }
    }

    fn tombstone_subtree(&mut self, id: TreeNodeId, executed_at: TimeTicket) {
        self.tombstone_node(id, executed_at);
        let children = self.nodes[&id].children.clone();
        for child in children {
            if !self.nodes[&child].is_removed() {
                self.tombstone_subtree(child, executed_at);
            }
        }
    }

    /// RGA sibling insert: lands right of `left`, then concurrent
    /// siblings with a greater ordering ticket stay closer to the
    /// origin.
    fn attach_child(
        &mut self,
        parent: TreeNodeId,
        left: Option<TreeNodeId>,
        id: TreeNodeId,
        order_ticket: TimeTicket,
    ) -> Result<(), CoreError> {
        let mut idx = match left {
            None => 0,
            Some(l) => {
                self.nodes[&parent]
                    .children
                    .iter()
                    .position(|c| *c == l)
                    .ok_or_else(|| CoreError::StructureError(l.to_string()))?
                    + 1
            }
        };
        while idx < self.nodes[&parent].children.len() {
            let sibling = self.nodes[&parent].children[idx];
            if sibling.created_at.after(&order_ticket) {
                idx += 1;
            } else {
                break;
            }
        }
        self.nodes.get_mut(&parent).unwrap().children.insert(idx, id);
        self.nodes.get_mut(&id).unwrap().parent = Some(parent);
        Ok(())
    }

    // ── Move ───────────────────────────────────────────────────────────────

    /// Moves `target` inside `new_parent`, right of `new_left`. LWW on
    /// the parent pointer; a move that would create a cycle is
    /// rejected before any mutation.
    pub fn move_node(
        &mut self,
        target: TreeNodeId,
        new_parent: TreeNodeId,
        new_left: Option<TreeNodeId>,
        executed_at: TimeTicket,
    ) -> Result<(), CoreError> {
        self.node(target)?;
        let parent_node = self.node(new_parent)?;
        if parent_node.is_text() {
            return Err(CoreError::TypeMismatch(new_parent.to_string(), "element"));
        }
        let mut cursor = Some(new_parent);
        while let Some(id) = cursor {
            if id == target {
                return Err(CoreError::StructureError(format!(
                    "move of {target} would create a cycle"
                )));
            }
            cursor = self.nodes[&id].parent;
        }
        if let Some(moved_at) = self.nodes[&target].moved_at {
            if !executed_at.after(&moved_at) {
                return Ok(());
            }
        }
        if let Some(old_parent) = self.nodes[&target].parent {
            self.nodes
                .get_mut(&old_parent)
                .unwrap()
                .children
                .retain(|c| *c != target);
        }
        self.attach_child(new_parent, new_left, target, executed_at)?;
        self.nodes.get_mut(&target).unwrap().moved_at = Some(executed_at);
        Ok(())
    }

    // ── Views ──────────────────────────────────────────────────────────────

    /// XML rendering of the live tree, attributes in lexicographic
    /// order.
    pub fn to_xml(&self) -> String {
        self.xml_of(self.root)
    }

    fn xml_of(&self, id: TreeNodeId) -> String {
        let node = &self.nodes[&id];
        if node.is_text() {
            return node.value.clone();
        }
        let mut out = format!("<{}{}>", node.kind, node.attrs.to_xml_attributes());
        for child in &node.children {
            if !self.nodes[child].is_removed() {
                out.push_str(&self.xml_of(*child));
            }
        }
        out.push_str(&format!("</{}>", node.kind));
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::String(self.to_xml())
    }

    // ── Garbage collection ─────────────────────────────────────────────────

    pub fn has_removed_nodes(&self) -> bool {
        self.nodes.values().any(|n| n.is_removed())
    }

    /// Purges tombstones every peer has observed, leaves first. A
    /// tombstone with surviving descendants is kept until they purge.
    pub fn purge_removed_nodes_before(&mut self, ticket: TimeTicket) -> usize {
        self.purge_walk(self.root, ticket)
    }

    fn purge_walk(&mut self, id: TreeNodeId, ticket: TimeTicket) -> usize {
        let children = self.nodes[&id].children.clone();
        let mut count = 0;
        for child in children {
            count += self.purge_walk(child, ticket);
        }
        if id == self.root {
            return count;
        }
        let node = &self.nodes[&id];
        let purgeable =
            node.removed_at.map_or(false, |r| r <= ticket) && node.children.is_empty();
        if purgeable {
            let parent = self.nodes[&id].parent;
            if let Some(parent) = parent {
                self.nodes
                    .get_mut(&parent)
                    .unwrap()
                    .children
                    .retain(|c| *c != id);
            }
            self.nodes.remove(&id);
            count += 1;
        }
        count
    }

    // ── Snapshot support ───────────────────────────────────────────────────

    pub fn export_root(&self) -> TreeSnapshotNode {
        self.export_node(self.root)
    }

    fn export_node(&self, id: TreeNodeId) -> TreeSnapshotNode {
        let node = &self.nodes[&id];
        TreeSnapshotNode {
            id,
            kind: node.kind.clone(),
            value: node.value.clone(),
            attrs: node.attrs.clone(),
            removed_at: node.removed_at,
            children: node
                .children
                .iter()
                .map(|c| self.export_node(*c))
                .collect(),
        }
    }

    pub fn from_snapshot(created_at: TimeTicket, root: &TreeSnapshotNode) -> Self {
        let mut tree = Self {
            meta: ElementMeta::new(created_at),
            nodes: BTreeMap::new(),
            root: root.id,
        };
        tree.import_node(root, None);
        tree
    }

    fn import_node(&mut self, snapshot: &TreeSnapshotNode, parent: Option<TreeNodeId>) {
        self.nodes.insert(
            snapshot.id,
            TreeNode {
                kind: snapshot.kind.clone(),
                value: snapshot.value.clone(),
                attrs: snapshot.attrs.clone(),
                parent,
                children: snapshot.children.iter().map(|c| c.id).collect(),
                removed_at: snapshot.removed_at,
                moved_at: None,
            },
        );
        for child in &snapshot.children {
            self.import_node(child, Some(snapshot.id));
        }
    }
}
