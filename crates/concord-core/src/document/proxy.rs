//! Ephemeral typed handles used inside `update` closures.
//!
//! Each handle holds the target element's creation ticket and borrows
//! the change context. Mutations issue a ticket, execute eagerly on
//! the working copy (so later edits observe earlier ones), and record
//! the operation for the atomic commit.

use serde_json::Value;

use crate::crdt::{TreeNodeDesc, TreeNodeId};
use crate::error::CoreError;
use crate::ops::{ElementContent, Operation};
use crate::time::TimeTicket;
use crate::value::{CounterValue, PrimitiveValue};

use super::context::ChangeContext;

fn json_to_primitive(value: &Value) -> Result<PrimitiveValue, CoreError> {
    Ok(match value {
        Value::Null => PrimitiveValue::Null,
        Value::Bool(b) => PrimitiveValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                PrimitiveValue::Long(i)
            } else if let Some(f) = n.as_f64() {
                PrimitiveValue::Double(f)
            } else {
                return Err(CoreError::OutOfRange(n.to_string()));
            }
        }
        Value::String(s) => PrimitiveValue::String(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(CoreError::Unexpected(
                "containers are decomposed before primitive conversion".to_string(),
            ))
        }
    })
}

/// Subtree content for tree edits; ids are issued when the edit is
/// recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeContent {
    pub kind: String,
    pub value: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<TreeContent>,
}

impl TreeContent {
    pub fn element(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: crate::crdt::tree::TEXT_KIND.into(),
            value: value.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TreeContent>) -> Self {
        self.children = children;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }
}

fn content_to_desc(ctx: &mut ChangeContext<'_>, content: &TreeContent) -> TreeNodeDesc {
    let id = TreeNodeId::new(ctx.issue_time_ticket(), 0);
    TreeNodeDesc {
        id,
        kind: content.kind.clone(),
        value: content.value.clone(),
        attributes: content.attributes.clone(),
        children: content
            .children
            .iter()
            .map(|c| content_to_desc(ctx, c))
            .collect(),
    }
}

// ── ObjectRef ──────────────────────────────────────────────────────────────

/// Handle on an object element (the root object or a nested one).
pub struct ObjectRef<'a, 'b> {
    pub(super) ctx: &'a mut ChangeContext<'b>,
    pub(super) target: TimeTicket,
}

impl<'a, 'b> ObjectRef<'a, 'b> {
    fn set_content(&mut self, key: &str, value: ElementContent) -> Result<TimeTicket, CoreError> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Set {
            parent_created_at: self.target,
            key: key.to_string(),
            value,
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(executed_at)
    }

    /// Writes `value` under `key`, decomposing nested JSON containers
    /// into their own elements.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), CoreError> {
        match value {
            Value::Object(entries) => {
                let created = self.set_content(key, ElementContent::Object)?;
                let mut nested = ObjectRef {
                    ctx: &mut *self.ctx,
                    target: created,
                };
                for (k, v) in entries {
                    nested.set(&k, v)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                let created = self.set_content(key, ElementContent::Array)?;
                let mut nested = ArrayRef {
                    ctx: &mut *self.ctx,
                    target: created,
                };
                for item in items {
                    nested.push(item)?;
                }
                Ok(())
            }
            scalar => {
                let primitive = json_to_primitive(&scalar)?;
                self.set_content(key, ElementContent::Primitive(primitive))?;
                Ok(())
            }
        }
    }

    pub fn new_counter(&mut self, key: &str, value: CounterValue) -> Result<(), CoreError> {
        self.set_content(key, ElementContent::Counter(value))?;
        Ok(())
    }

    pub fn new_text(&mut self, key: &str) -> Result<TextRef<'_, 'b>, CoreError> {
        let created = self.set_content(key, ElementContent::Text)?;
        Ok(TextRef {
            ctx: &mut *self.ctx,
            target: created,
        })
    }

    pub fn new_tree(&mut self, key: &str, kind: &str) -> Result<TreeRef<'_, 'b>, CoreError> {
        let root_id = TreeNodeId::new(self.ctx.issue_time_ticket(), 0);
        let created = self.set_content(
            key,
            ElementContent::Tree {
                root: TreeNodeDesc::element(root_id, kind),
            },
        )?;
        Ok(TreeRef {
            ctx: &mut *self.ctx,
            target: created,
        })
    }

    fn child_id(&self, key: &str) -> Result<TimeTicket, CoreError> {
        let object = self.ctx.root_ref().object(self.target)?;
        let id = object
            .rht
            .get(key)
            .ok_or_else(|| CoreError::NotFound(key.to_string()))?;
        if self.ctx.root_ref().find(id)?.is_removed() {
            return Err(CoreError::NotFound(key.to_string()));
        }
        Ok(id)
    }

    pub fn object(&mut self, key: &str) -> Result<ObjectRef<'_, 'b>, CoreError> {
        let id = self.child_id(key)?;
        self.ctx.root_ref().object(id)?;
        Ok(ObjectRef {
            ctx: &mut *self.ctx,
            target: id,
        })
    }

    pub fn array(&mut self, key: &str) -> Result<ArrayRef<'_, 'b>, CoreError> {
        let id = self.child_id(key)?;
        self.ctx.root_ref().array(id)?;
        Ok(ArrayRef {
            ctx: &mut *self.ctx,
            target: id,
        })
    }

    pub fn text(&mut self, key: &str) -> Result<TextRef<'_, 'b>, CoreError> {
        let id = self.child_id(key)?;
        self.ctx.root_ref().text(id)?;
        Ok(TextRef {
            ctx: &mut *self.ctx,
            target: id,
        })
    }

    pub fn counter(&mut self, key: &str) -> Result<CounterRef<'_, 'b>, CoreError> {
        let id = self.child_id(key)?;
        self.ctx.root_ref().counter(id)?;
        Ok(CounterRef {
            ctx: &mut *self.ctx,
            target: id,
        })
    }

    pub fn tree(&mut self, key: &str) -> Result<TreeRef<'_, 'b>, CoreError> {
        let id = self.child_id(key)?;
        self.ctx.root_ref().tree(id)?;
        Ok(TreeRef {
            ctx: &mut *self.ctx,
            target: id,
        })
    }

    pub fn remove(&mut self, key: &str) -> Result<(), CoreError> {
        let id = self.child_id(key)?;
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Remove {
            parent_created_at: self.target,
            created_at: id,
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        self.ctx.root_ref().element_to_json(self.target)
    }
}

// ── ArrayRef ───────────────────────────────────────────────────────────────

/// Handle on an array element.
pub struct ArrayRef<'a, 'b> {
    pub(super) ctx: &'a mut ChangeContext<'b>,
    pub(super) target: TimeTicket,
}

impl<'a, 'b> ArrayRef<'a, 'b> {
    fn add_content(
        &mut self,
        prev: TimeTicket,
        value: ElementContent,
    ) -> Result<TimeTicket, CoreError> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Add {
            parent_created_at: self.target,
            prev_created_at: prev,
            value,
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(executed_at)
    }

    fn add_json(&mut self, prev: TimeTicket, value: Value) -> Result<TimeTicket, CoreError> {
        match value {
            Value::Object(entries) => {
                let created = self.add_content(prev, ElementContent::Object)?;
                let mut nested = ObjectRef {
                    ctx: &mut *self.ctx,
                    target: created,
                };
                for (k, v) in entries {
                    nested.set(&k, v)?;
                }
                Ok(created)
            }
            Value::Array(items) => {
                let created = self.add_content(prev, ElementContent::Array)?;
                let mut nested = ArrayRef {
                    ctx: &mut *self.ctx,
                    target: created,
                };
                for item in items {
                    nested.push(item)?;
                }
                Ok(created)
            }
            scalar => {
                let primitive = json_to_primitive(&scalar)?;
                self.add_content(prev, ElementContent::Primitive(primitive))
            }
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), CoreError> {
        let prev = self.ctx.root_ref().array(self.target)?.list.last();
        self.add_json(prev, value)?;
        Ok(())
    }

    pub fn insert(&mut self, index: usize, value: Value) -> Result<(), CoreError> {
        let prev = if index == 0 {
            TimeTicket::INITIAL
        } else {
            self.ctx
                .root_ref()
                .array(self.target)?
                .list
                .get(index - 1)
                .ok_or_else(|| CoreError::OutOfRange(index.to_string()))?
        };
        self.add_json(prev, value)?;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<(), CoreError> {
        let id = self
            .ctx
            .root_ref()
            .array(self.target)?
            .list
            .get(index)
            .ok_or_else(|| CoreError::OutOfRange(index.to_string()))?;
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Remove {
            parent_created_at: self.target,
            created_at: id,
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(())
    }

    /// Moves the element at `from_index` to sit right of the element
    /// currently at `to_after` (`None` = the front).
    pub fn move_after_index(
        &mut self,
        from_index: usize,
        to_after: Option<usize>,
    ) -> Result<(), CoreError> {
        let list = &self.ctx.root_ref().array(self.target)?.list;
        let created_at = list
            .get(from_index)
            .ok_or_else(|| CoreError::OutOfRange(from_index.to_string()))?;
        let prev = match to_after {
            None => TimeTicket::INITIAL,
            Some(i) => list
                .get(i)
                .ok_or_else(|| CoreError::OutOfRange(i.to_string()))?,
        };
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Move {
            parent_created_at: self.target,
            prev_created_at: prev,
            created_at,
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ctx
            .root_ref()
            .array(self.target)
            .map(|a| a.list.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        self.ctx.root_ref().element_to_json(self.target)
    }
}

// ── TextRef ────────────────────────────────────────────────────────────────

/// Handle on a text element. Indices are UTF-16 code units.
pub struct TextRef<'a, 'b> {
    pub(super) ctx: &'a mut ChangeContext<'b>,
    pub(super) target: TimeTicket,
}

impl<'a, 'b> TextRef<'a, 'b> {
    /// Replaces `[from, to)` with `content` (empty = pure deletion).
    pub fn edit(&mut self, from: u32, to: u32, content: &str) -> Result<(), CoreError> {
        let executed_at = self.ctx.issue_time_ticket();
        let target = self.target;
        let text = self.ctx.root().text_mut(target)?;
        let from_pos = text.find_pos(from)?;
        let to_pos = text.find_pos(to)?;
        let body = (!content.is_empty()).then(|| content.to_string());
        let (_, max_map, _) =
            text.edit(&from_pos, &to_pos, executed_at, body.as_deref(), None)?;
        self.ctx.push(Operation::Edit {
            parent_created_at: target,
            from: from_pos,
            to: to_pos,
            content: body,
            max_created_at_by_actor: max_map,
            executed_at,
        });
        Ok(())
    }

    pub fn style(
        &mut self,
        from: u32,
        to: u32,
        attributes: &[(&str, &str)],
    ) -> Result<(), CoreError> {
        let executed_at = self.ctx.issue_time_ticket();
        let target = self.target;
        let attributes: Vec<(String, String)> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let text = self.ctx.root().text_mut(target)?;
        let from_pos = text.find_pos(from)?;
        let to_pos = text.find_pos(to)?;
        text.style(&from_pos, &to_pos, &attributes, executed_at)?;
        self.ctx.push(Operation::Style {
            parent_created_at: target,
            from: from_pos,
            to: to_pos,
            attributes,
            executed_at,
        });
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.ctx
            .root_ref()
            .text(self.target)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_plain(&self) -> String {
        self.ctx
            .root_ref()
            .text(self.target)
            .map(|t| t.to_plain())
            .unwrap_or_default()
    }
}

// ── CounterRef ─────────────────────────────────────────────────────────────

/// Handle on a counter element.
pub struct CounterRef<'a, 'b> {
    pub(super) ctx: &'a mut ChangeContext<'b>,
    pub(super) target: TimeTicket,
}

impl<'a, 'b> CounterRef<'a, 'b> {
    pub fn increase(&mut self, delta: i64) -> Result<(), CoreError> {
        let executed_at = self.ctx.issue_time_ticket();
        let op = Operation::Increase {
            parent_created_at: self.target,
            value: PrimitiveValue::Long(delta),
            executed_at,
        };
        op.execute(self.ctx.root())?;
        self.ctx.push(op);
        Ok(())
    }

    pub fn value(&self) -> Value {
        self.ctx
            .root_ref()
            .counter(self.target)
            .map(|c| c.to_json())
            .unwrap_or(Value::Null)
    }
}

// ── TreeRef ────────────────────────────────────────────────────────────────

/// Handle on a tree element. Indices follow the token model.
pub struct TreeRef<'a, 'b> {
    pub(super) ctx: &'a mut ChangeContext<'b>,
    pub(super) target: TimeTicket,
}

impl<'a, 'b> TreeRef<'a, 'b> {
    /// Replaces `[from, to)` with `contents`.
    pub fn edit(
        &mut self,
        from: u32,
        to: u32,
        contents: &[TreeContent],
    ) -> Result<(), CoreError> {
        let descs: Vec<TreeNodeDesc> = contents
            .iter()
            .map(|c| content_to_desc(self.ctx, c))
            .collect();
        let executed_at = self.ctx.issue_time_ticket();
        let target = self.target;
        let tree = self.ctx.root().tree_mut(target)?;
        let from_pos = tree.find_pos(from)?;
        let to_pos = tree.find_pos(to)?;
        tree.edit(&from_pos, &to_pos, &descs, executed_at)?;
        self.ctx.push(Operation::TreeEdit {
            parent_created_at: target,
            from: from_pos,
            to: to_pos,
            contents: descs,
            executed_at,
        });
        Ok(())
    }

    pub fn to_xml(&self) -> String {
        self.ctx
            .root_ref()
            .tree(self.target)
            .map(|t| t.to_xml())
            .unwrap_or_default()
    }

    pub fn size(&self) -> u32 {
        self.ctx
            .root_ref()
            .tree(self.target)
            .map(|t| t.size())
            .unwrap_or(0)
    }
}
