//! Object element: a last-writer-wins map from string keys to elements.

use std::collections::HashMap;

use crate::time::TimeTicket;

use super::element::ElementMeta;

/// Result of an [`ElementRht::set`] contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The write won. Carries the displaced child id, if any; the
    /// caller tombstones it.
    Won(Option<TimeTicket>),
    /// A child with a greater creation ticket already holds the key;
    /// the caller tombstones the incoming element instead.
    Lost,
}

/// Key → winning child id. Keys keep pointing at tombstoned children
/// until GC purges them; visibility is decided at the registry level.
#[derive(Debug, Clone, Default)]
pub struct ElementRht {
    entries: HashMap<String, TimeTicket>,
    /// First-write order of keys, preserved for iteration.
    order: Vec<String>,
}

impl ElementRht {
    pub fn new() -> Self {
        Self::default()
    }

    /// LWW write: the child with the greater creation ticket keeps the
    /// key.
    pub fn set(&mut self, key: &str, child: TimeTicket) -> SetOutcome {
        match self.entries.get(key).copied() {
            Some(old) if child <= old => SetOutcome::Lost,
            old => {
                if old.is_none() {
                    self.order.push(key.to_string());
                }
                self.entries.insert(key.to_string(), child);
                SetOutcome::Won(old)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<TimeTicket> {
        self.entries.get(key).copied()
    }

    /// The key currently mapping to `child`, used for path rendering.
    pub fn key_of(&self, child: TimeTicket) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, id)| **id == child)
            .map(|(k, _)| k.as_str())
    }

    /// Drops the entry for a purged child. Leaves the key absent.
    pub fn purge(&mut self, child: TimeTicket) {
        if let Some(key) = self.key_of(child).map(str::to_string) {
            self.entries.remove(&key);
            self.order.retain(|k| *k != key);
        }
    }

    /// `(key, child id)` pairs in first-write key order, tombstoned
    /// children included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TimeTicket)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|id| (k.as_str(), *id)))
    }
}

/// LWW-register map element.
#[derive(Debug, Clone)]
pub struct CrdtObject {
    pub meta: ElementMeta,
    pub rht: ElementRht,
}

impl CrdtObject {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            rht: ElementRht::new(),
        }
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
    fn set_fresh_key_wins() {
        let mut rht = ElementRht::new();
        assert_eq!(rht.set("k", t(1)), SetOutcome::Won(None));
        assert_eq!(rht.get("k"), Some(t(1)));
    }

    #[test]
    fn later_child_displaces_earlier() {
        let mut rht = ElementRht::new();
        rht.set("k", t(1));
        assert_eq!(rht.set("k", t(5)), SetOutcome::Won(Some(t(1))));
        assert_eq!(rht.get("k"), Some(t(5)));
    }

    #[test]
    fn earlier_child_loses() {
        let mut rht = ElementRht::new();
        rht.set("k", t(5));
        assert_eq!(rht.set("k", t(1)), SetOutcome::Lost);
        assert_eq!(rht.get("k"), Some(t(5)));
    }

    #[test]
    fn purge_drops_entry() {
        let mut rht = ElementRht::new();
        rht.set("a", t(1));
        rht.set("b", t(2));
        rht.purge(t(1));
        assert_eq!(rht.get("a"), None);
        let keys: Vec<&str> = rht.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b"]);
    }
}
