//! Text element: an RGA tree-split of styled runs.
//!
//! All indices and offsets are UTF-16 code units. Every replica must
//! use the same unit model; mixing code-point indexing across replicas
//! breaks convergence. An offset that would split a surrogate pair is
//! rejected with [`CoreError::OutOfRange`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::time::{ActorId, TimeTicket};

use super::element::ElementMeta;
use super::rga_tree_split::{ContentChange, RgaTreeSplit, SplitNodeId, SplitPos, SplitValue};
use super::rht::Rht;

// ── TextValue ──────────────────────────────────────────────────────────────

/// One run of text plus its style attributes. Splitting a run clones
/// the attributes onto both pieces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextValue {
    pub content: String,
    pub attrs: Rht,
}

impl TextValue {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attrs: Rht::new(),
        }
    }
}

/// UTF-16 code unit length of `s`.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Byte index of the UTF-16 offset `at` in `s`. `None` when `at` falls
/// inside a surrogate pair or past the end.
pub(crate) fn utf16_byte_index(s: &str, at: u32) -> Option<usize> {
    if at == 0 {
        return Some(0);
    }
    let mut units = 0u32;
    for (byte_idx, ch) in s.char_indices() {
        if units == at {
            return Some(byte_idx);
        }
        if units > at {
            return None;
        }
        units += ch.len_utf16() as u32;
    }
    (units == at).then_some(s.len())
}

impl SplitValue for TextValue {
    fn length(&self) -> u32 {
        utf16_len(&self.content)
    }

    fn split(&mut self, at: u32) -> Self {
        let byte_idx = utf16_byte_index(&self.content, at)
            .expect("split offset checked by can_split_at");
        let suffix = self.content.split_off(byte_idx);
        Self {
            content: suffix,
            attrs: self.attrs.clone(),
        }
    }

    fn can_split_at(&self, at: u32) -> bool {
        utf16_byte_index(&self.content, at).is_some()
    }
}

// ── Changes ────────────────────────────────────────────────────────────────

/// Visible-index text change reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub from: u32,
    pub to: u32,
    pub content: Option<String>,
    pub actor: ActorId,
}

impl From<ContentChange<TextValue>> for TextChange {
    fn from(c: ContentChange<TextValue>) -> Self {
        Self {
            from: c.from,
            to: c.to,
            content: c.content.map(|v| v.content),
            actor: c.actor,
        }
    }
}

// ── CrdtText ───────────────────────────────────────────────────────────────

/// Rich text element.
#[derive(Debug, Clone)]
pub struct CrdtText {
    pub meta: ElementMeta,
    pub rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            rga: RgaTreeSplit::new(),
        }
    }

    /// Visible length in UTF-16 code units.
    pub fn len(&self) -> u32 {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    pub fn find_pos(&mut self, index: u32) -> Result<SplitPos, CoreError> {
        self.rga.find_node_pos(index)
    }

    /// Replaces `[from, to)` with `content`. See
    /// [`RgaTreeSplit::edit`] for the concurrency gate.
    pub fn edit(
        &mut self,
        from: &SplitPos,
        to: &SplitPos,
        executed_at: TimeTicket,
        content: Option<&str>,
        latest_created_at_by_actor: Option<&HashMap<ActorId, TimeTicket>>,
    ) -> Result<
        (
            SplitPos,
            HashMap<ActorId, TimeTicket>,
            Vec<TextChange>,
        ),
        CoreError,
    > {
        let value = match content {
            Some(s) if !s.is_empty() => Some(TextValue::new(s)),
            _ => None,
        };
        let (caret, latest_map, changes) = self.rga.edit(
            from,
            to,
            executed_at,
            value,
            latest_created_at_by_actor,
        )?;
        Ok((
            caret,
            latest_map,
            changes.into_iter().map(TextChange::from).collect(),
        ))
    }

    /// Applies style attributes to every live run in `[from, to)`.
    /// Returns the visible range the style covered.
    pub fn style(
        &mut self,
        from: &SplitPos,
        to: &SplitPos,
        attributes: &[(String, String)],
        executed_at: TimeTicket,
    ) -> Result<(u32, u32), CoreError> {
        let (_, to_right) = self.rga.find_node_with_split(to, executed_at)?;
        let (_, from_right) = self.rga.find_node_with_split(from, executed_at)?;
        let range = self.rga.indexes_from_range(from, to)?;
        self.rga.update_values_between(from_right, to_right, |value| {
            for (key, val) in attributes {
                value.attrs.set(key, val, executed_at);
            }
        });
        Ok(range)
    }

    /// Plain text view.
    pub fn to_plain(&self) -> String {
        self.rga
            .iter()
            .filter(|n| !n.is_removed())
            .map(|n| n.value().content.as_str())
            .collect()
    }

    /// Live `(content, attrs)` runs in visible order.
    pub fn runs(&self) -> Vec<(String, Rht)> {
        self.rga
            .iter()
            .filter(|n| !n.is_removed())
            .map(|n| (n.value().content.clone(), n.value().attrs.clone()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::String(self.to_plain())
    }

    pub fn has_removed_nodes(&self) -> bool {
        self.rga.has_removed_nodes()
    }

    pub fn purge_removed_nodes_before(&mut self, ticket: TimeTicket) -> usize {
        self.rga.purge_removed_nodes_before(ticket)
    }

    /// Rebuild support for snapshot decoding: appends a run at the end
    /// of the visible order without RGA ordering.
    pub fn push_node(
        &mut self,
        id: SplitNodeId,
        value: TextValue,
        removed_at: Option<TimeTicket>,
    ) {
        self.rga.push_back(id, value, removed_at);
    }

    /// Nodes in visible order for snapshot encoding:
    /// `(id, content, attrs, removed_at)`.
    pub fn nodes_for_snapshot(
        &self,
    ) -> Vec<(SplitNodeId, TextValue, Option<TimeTicket>)> {
        self.rga
            .iter()
            .map(|n| (n.id(), n.value().clone(), n.removed_at()))
            .collect()
    }
}
