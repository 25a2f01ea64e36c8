//! Operations: the unit of replicated mutation.
//!
//! Every variant carries the creation ticket of its target container
//! (`parent_created_at`) and the ticket it executes at. `execute`
//! applies the operation to a root registry and reports what changed
//! for event emission.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crdt::{
    CrdtArray, CrdtCounter, CrdtElement, CrdtObject, CrdtPrimitive, CrdtRoot, CrdtText,
    CrdtTree, SetOutcome, SplitPos, TreeNodeDesc, TreeNodeId, TreePos,
};
use crate::error::CoreError;
use crate::time::{ActorId, TimeTicket};
use crate::value::{CounterValue, PrimitiveValue};

// ── Payloads ───────────────────────────────────────────────────────────────

/// What a `Set`/`Add` operation creates. Containers are created empty;
/// nested values arrive as follow-up operations targeting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementContent {
    Primitive(PrimitiveValue),
    Counter(CounterValue),
    Object,
    Array,
    Text,
    Tree { root: TreeNodeDesc },
}

impl ElementContent {
    /// Materialises the element; it adopts the operation's ticket as
    /// its creation ticket.
    fn to_element(&self, created_at: TimeTicket) -> CrdtElement {
        match self {
            ElementContent::Primitive(v) => {
                CrdtElement::Primitive(CrdtPrimitive::new(v.clone(), created_at))
            }
            ElementContent::Counter(v) => {
                CrdtElement::Counter(CrdtCounter::new(*v, created_at))
            }
            ElementContent::Object => CrdtElement::Object(CrdtObject::new(created_at)),
            ElementContent::Array => CrdtElement::Array(CrdtArray::new(created_at)),
            ElementContent::Text => CrdtElement::Text(CrdtText::new(created_at)),
            ElementContent::Tree { root } => {
                CrdtElement::Tree(CrdtTree::new(created_at, root))
            }
        }
    }
}

// ── OpInfo ─────────────────────────────────────────────────────────────────

/// What an executed operation did, in user-facing terms. Paths and
/// indices are rendered against the pre-execution document state.
#[derive(Debug, Clone, PartialEq)]
pub enum OpInfo {
    Set { path: String, key: String },
    Add { path: String, index: usize },
    Move { path: String, index: usize },
    Remove { path: String },
    Edit {
        path: String,
        from: u32,
        to: u32,
        content: Option<String>,
        actor: ActorId,
    },
    Style { path: String, from: u32, to: u32 },
    Increase { path: String, value: serde_json::Value },
    TreeEdit { path: String, from: u32, to: u32 },
    TreeMove { path: String },
}

// ── Operation ──────────────────────────────────────────────────────────────

/// A single replicated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Write a key on an object.
    Set {
        parent_created_at: TimeTicket,
        key: String,
        value: ElementContent,
        executed_at: TimeTicket,
    },
    /// Insert into an array, right of `prev_created_at`
    /// (`TimeTicket::INITIAL` = the front).
    Add {
        parent_created_at: TimeTicket,
        prev_created_at: TimeTicket,
        value: ElementContent,
        executed_at: TimeTicket,
    },
    /// Reorder an array element, right of `prev_created_at`.
    Move {
        parent_created_at: TimeTicket,
        prev_created_at: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Tombstone an element of an object or array.
    Remove {
        parent_created_at: TimeTicket,
        created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    /// Replace a text range. `max_created_at_by_actor` gates remote
    /// deletion to runs the author had observed.
    Edit {
        parent_created_at: TimeTicket,
        from: SplitPos,
        to: SplitPos,
        content: Option<String>,
        max_created_at_by_actor: HashMap<ActorId, TimeTicket>,
        executed_at: TimeTicket,
    },
    /// Apply style attributes to a text range.
    Style {
        parent_created_at: TimeTicket,
        from: SplitPos,
        to: SplitPos,
        attributes: Vec<(String, String)>,
        executed_at: TimeTicket,
    },
    /// Add to a counter.
    Increase {
        parent_created_at: TimeTicket,
        value: PrimitiveValue,
        executed_at: TimeTicket,
    },
    /// Replace a tree range with new subtrees.
    TreeEdit {
        parent_created_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        contents: Vec<TreeNodeDesc>,
        executed_at: TimeTicket,
    },
    /// Re-parent a tree node. LWW on the parent pointer; cycles are
    /// rejected at execution.
    TreeMove {
        parent_created_at: TimeTicket,
        target: TreeNodeId,
        new_parent: TreeNodeId,
        new_left: Option<TreeNodeId>,
        executed_at: TimeTicket,
    },
}

impl Operation {
    pub fn parent_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::Increase { parent_created_at, .. }
            | Operation::TreeEdit { parent_created_at, .. }
            | Operation::TreeMove { parent_created_at, .. } => *parent_created_at,
        }
    }

    pub fn executed_at(&self) -> TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::TreeEdit { executed_at, .. }
            | Operation::TreeMove { executed_at, .. } => *executed_at,
        }
    }

    /// Applies the operation to `root`.
    pub fn execute(&self, root: &mut CrdtRoot) -> Result<Vec<OpInfo>, CoreError> {
        match self {
            Operation::Set {
                parent_created_at,
                key,
                value,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let created_at = *executed_at;
                let outcome = root.object_mut(*parent_created_at)?.rht.set(key, created_at);
                root.register(*parent_created_at, value.to_element(created_at));
                match outcome {
                    SetOutcome::Won(Some(displaced)) => {
                        root.remove_element(displaced, *executed_at)?;
                    }
                    SetOutcome::Won(None) => {}
                    SetOutcome::Lost => {
                        root.remove_element(created_at, *executed_at)?;
                    }
                }
                Ok(vec![OpInfo::Set {
                    path,
                    key: key.clone(),
                }])
            }

            Operation::Add {
                parent_created_at,
                prev_created_at,
                value,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let created_at = *executed_at;
                root.array_mut(*parent_created_at)?.list.insert_after(
                    *prev_created_at,
                    created_at,
                    *executed_at,
                )?;
                root.register(*parent_created_at, value.to_element(created_at));
                let index = root
                    .array(*parent_created_at)?
                    .list
                    .index_of(created_at)
                    .unwrap_or(0);
                Ok(vec![OpInfo::Add { path, index }])
            }

            Operation::Move {
                parent_created_at,
                prev_created_at,
                created_at,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                {
                    let array = root.array(*parent_created_at)?;
                    if !array.list.contains(*created_at) {
                        return Err(CoreError::StructureError(created_at.to_string()));
                    }
                }
                let won = root
                    .find_mut(*created_at)?
                    .meta_mut()
                    .set_moved_at(*executed_at);
                if won {
                    root.array_mut(*parent_created_at)?.list.move_after(
                        *prev_created_at,
                        *created_at,
                        *executed_at,
                    )?;
                }
                let index = root
                    .array(*parent_created_at)?
                    .list
                    .index_of(*created_at)
                    .unwrap_or(0);
                Ok(vec![OpInfo::Move { path, index }])
            }

            Operation::Remove {
                parent_created_at,
                created_at,
                executed_at,
            } => {
                let path = root.create_path(*created_at)?;
                match root.find(*parent_created_at)? {
                    CrdtElement::Array(_) => {
                        root.array_mut(*parent_created_at)?.list.remove(*created_at)?;
                    }
                    CrdtElement::Object(_) => {}
                    _ => {
                        return Err(CoreError::TypeMismatch(
                            parent_created_at.to_string(),
                            "container",
                        ))
                    }
                }
                root.remove_element(*created_at, *executed_at)?;
                Ok(vec![OpInfo::Remove { path }])
            }

            Operation::Edit {
                parent_created_at,
                from,
                to,
                content,
                max_created_at_by_actor,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let text = root.text_mut(*parent_created_at)?;
                let (_, _, changes) = text.edit(
                    from,
                    to,
                    *executed_at,
                    content.as_deref(),
                    Some(max_created_at_by_actor),
                )?;
                let has_tombstones = text.has_removed_nodes();
                if has_tombstones {
                    root.mark_has_removed_nodes(*parent_created_at);
                }
                Ok(changes
                    .into_iter()
                    .map(|c| OpInfo::Edit {
                        path: path.clone(),
                        from: c.from,
                        to: c.to,
                        content: c.content,
                        actor: c.actor,
                    })
                    .collect())
            }

            Operation::Style {
                parent_created_at,
                from,
                to,
                attributes,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let text = root.text_mut(*parent_created_at)?;
                let (from_idx, to_idx) = text.style(from, to, attributes, *executed_at)?;
                Ok(vec![OpInfo::Style {
                    path,
                    from: from_idx,
                    to: to_idx,
                }])
            }

            Operation::Increase {
                parent_created_at,
                value,
                executed_at: _,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let counter = root.counter_mut(*parent_created_at)?;
                counter.increase(value);
                Ok(vec![OpInfo::Increase {
                    path,
                    value: counter.to_json(),
                }])
            }

            Operation::TreeEdit {
                parent_created_at,
                from,
                to,
                contents,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let tree = root.tree_mut(*parent_created_at)?;
                let (from_idx, to_idx) = tree.edit(from, to, contents, *executed_at)?;
                let has_tombstones = tree.has_removed_nodes();
                if has_tombstones {
                    root.mark_has_removed_nodes(*parent_created_at);
                }
                Ok(vec![OpInfo::TreeEdit {
                    path,
                    from: from_idx,
                    to: to_idx,
                }])
            }

            Operation::TreeMove {
                parent_created_at,
                target,
                new_parent,
                new_left,
                executed_at,
            } => {
                let path = root.create_path(*parent_created_at)?;
                let tree = root.tree_mut(*parent_created_at)?;
                tree.move_node(*target, *new_parent, *new_left, *executed_at)?;
                Ok(vec![OpInfo::TreeMove { path }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor(b: u8) -> ActorId {
        ActorId([b; 12])
    }

    fn t(lamport: i64) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(1))
    }

    fn set_int(key: &str, v: i32, at: TimeTicket) -> Operation {
        Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: key.into(),
            value: ElementContent::Primitive(PrimitiveValue::Integer(v)),
            executed_at: at,
        }
    }

    #[test]
    fn set_writes_an_object_key() {
        let mut root = CrdtRoot::new();
        let infos = set_int("a", 1, t(1)).execute(&mut root).unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Set {
                path: "$".into(),
                key: "a".into()
            }]
        );
        assert_eq!(root.to_json(), json!({"a": 1}));
    }

    #[test]
    fn concurrent_sets_resolve_lww_in_any_order() {
        let newer = set_int("k", 2, t(5));
        let older = set_int("k", 1, t(3));

        let mut ab = CrdtRoot::new();
        older.execute(&mut ab).unwrap();
        newer.execute(&mut ab).unwrap();

        let mut ba = CrdtRoot::new();
        newer.execute(&mut ba).unwrap();
        older.execute(&mut ba).unwrap();

        assert_eq!(ab.to_json(), json!({"k": 2}));
        assert_eq!(ba.to_json(), json!({"k": 2}));
        // The loser is registered as a tombstone, not dropped.
        assert!(ba.contains(t(3)));
        assert!(ba.find(t(3)).unwrap().is_removed());
    }

    #[test]
    fn add_and_move_order_an_array() {
        let mut root = CrdtRoot::new();
        Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: "list".into(),
            value: ElementContent::Array,
            executed_at: t(1),
        }
        .execute(&mut root)
        .unwrap();
        for (i, at) in [t(2), t(3), t(4)].iter().enumerate() {
            Operation::Add {
                parent_created_at: t(1),
                prev_created_at: if i == 0 { TimeTicket::INITIAL } else { t(i as i64 + 1) },
                value: ElementContent::Primitive(PrimitiveValue::Integer(i as i32)),
                executed_at: *at,
            }
            .execute(&mut root)
            .unwrap();
        }
        assert_eq!(root.to_json(), json!({"list": [0, 1, 2]}));

        Operation::Move {
            parent_created_at: t(1),
            prev_created_at: TimeTicket::INITIAL,
            created_at: t(4),
            executed_at: t(5),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(root.to_json(), json!({"list": [2, 0, 1]}));
    }

    #[test]
    fn remove_tombstones_in_object_and_array() {
        let mut root = CrdtRoot::new();
        set_int("k", 1, t(1)).execute(&mut root).unwrap();
        Operation::Remove {
            parent_created_at: TimeTicket::INITIAL,
            created_at: t(1),
            executed_at: t(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(root.to_json(), json!({}));
        assert!(root.contains(t(1)));
    }

    #[test]
    fn edit_against_unknown_target_fails() {
        let mut root = CrdtRoot::new();
        let op = Operation::Increase {
            parent_created_at: t(9),
            value: PrimitiveValue::Integer(1),
            executed_at: t(10),
        };
        assert!(matches!(
            op.execute(&mut root),
            Err(CoreError::StructureError(_))
        ));
    }

    #[test]
    fn type_mismatch_is_detected() {
        let mut root = CrdtRoot::new();
        set_int("k", 1, t(1)).execute(&mut root).unwrap();
        let op = Operation::Increase {
            parent_created_at: t(1),
            value: PrimitiveValue::Integer(1),
            executed_at: t(2),
        };
        assert!(matches!(
            op.execute(&mut root),
            Err(CoreError::TypeMismatch(_, "counter"))
        ));
    }

    #[test]
    fn increase_accumulates_on_counter() {
        let mut root = CrdtRoot::new();
        Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: "n".into(),
            value: ElementContent::Counter(CounterValue::Long(10)),
            executed_at: t(1),
        }
        .execute(&mut root)
        .unwrap();
        let infos = Operation::Increase {
            parent_created_at: t(1),
            value: PrimitiveValue::Integer(5),
            executed_at: t(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Increase {
                path: "$.n".into(),
                value: json!(15)
            }]
        );
        assert_eq!(root.to_json(), json!({"n": 15}));
    }

    #[test]
    fn text_edit_executes_and_reports_changes() {
        let mut root = CrdtRoot::new();
        Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: "t".into(),
            value: ElementContent::Text,
            executed_at: t(1),
        }
        .execute(&mut root)
        .unwrap();
        let text = root.text_mut(t(1)).unwrap();
        let from = text.find_pos(0).unwrap();
        let infos = Operation::Edit {
            parent_created_at: t(1),
            from,
            to: from,
            content: Some("hi".into()),
            max_created_at_by_actor: HashMap::new(),
            executed_at: t(2),
        }
        .execute(&mut root)
        .unwrap();
        assert_eq!(
            infos,
            vec![OpInfo::Edit {
                path: "$.t".into(),
                from: 0,
                to: 0,
                content: Some("hi".into()),
                actor: actor(1),
            }]
        );
        assert_eq!(root.to_json(), json!({"t": "hi"}));
    }
}
