//! Replicated hashtable: a last-writer-wins map keyed by string.
//!
//! Used for text style attributes and tree element attributes. The
//! stored entry for a key always carries the greatest `updated_at`
//! ever seen for that key, which makes replay order-independent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::time::TimeTicket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhtNode {
    pub value: String,
    pub updated_at: TimeTicket,
}

/// LWW map from string key to `(value, updated_at)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rht {
    nodes: HashMap<String, RhtNode>,
    /// First-write order of keys, preserved for JSON rendering.
    order: Vec<String>,
}

impl Rht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` under `key` unless a later write is already
    /// stored. Returns `true` when the write won.
    pub fn set(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> bool {
        match self.nodes.get(key) {
            Some(node) if executed_at <= node.updated_at => false,
            existing => {
                if existing.is_none() {
                    self.order.push(key.to_string());
                }
                self.nodes.insert(
                    key.to_string(),
                    RhtNode {
                        value: value.to_string(),
                        updated_at: executed_at,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Result<&str, CoreError> {
        self.nodes
            .get(key)
            .map(|n| n.value.as_str())
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entries in first-write key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RhtNode)> {
        self.order
            .iter()
            .filter_map(|k| self.nodes.get(k).map(|n| (k.as_str(), n)))
    }

    /// Attribute fragment for XML rendering, keys in lexicographic
    /// order: ` a="1" b="2"`.
    pub fn to_xml_attributes(&self) -> String {
        let mut keys: Vec<&String> = self.nodes.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            let node = &self.nodes[key];
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&node.value);
            out.push('"');
        }
        out
    }

    /// JSON object view in first-write key order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, node) in self.iter() {
            map.insert(key.to_string(), serde_json::Value::String(node.value.clone()));
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ActorId;

    fn t(lamport: i64) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId([1; 12]))
    }

    #[test]
    fn set_then_get() {
        let mut rht = Rht::new();
        assert!(rht.set("k", "v", t(1)));
        assert_eq!(rht.get("k").unwrap(), "v");
        assert!(matches!(rht.get("missing"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn later_write_wins() {
        let mut rht = Rht::new();
        rht.set("k", "v1", t(5));
        assert!(!rht.set("k", "v0", t(3)));
        assert_eq!(rht.get("k").unwrap(), "v1");
        assert!(rht.set("k", "v2", t(9)));
        assert_eq!(rht.get("k").unwrap(), "v2");
    }

    #[test]
    fn deepcopy_keeps_winner() {
        let mut rht = Rht::new();
        rht.set("k", "v1", t(5));
        rht.set("k", "v0", t(3));
        let copy = rht.clone();
        assert_eq!(copy.get("k").unwrap(), "v1");
        assert_eq!(copy, rht);
    }

    #[test]
    fn xml_attributes_sorted() {
        let mut rht = Rht::new();
        rht.set("b", "2", t(1));
        rht.set("a", "1", t(2));
        assert_eq!(rht.to_xml_attributes(), r#" a="1" b="2""#);
    }

    #[test]
    fn json_preserves_first_write_order() {
        let mut rht = Rht::new();
        rht.set("b", "2", t(1));
        rht.set("a", "1", t(2));
        rht.set("b", "3", t(3));
        let json = rht.to_json();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
