//! Per-actor presence: ephemeral state (cursor, name, ...) replicated
//! alongside changes but outside the document tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::time::ActorId;

/// Arbitrary JSON-serializable presence entries.
pub type PresenceData = HashMap<String, serde_json::Value>;

/// Presence mutation carried by a change. `Put` merges the submitted
/// keys into the actor's existing presence; keys it does not name are
/// left untouched. `Clear` removes the actor entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceChange {
    Put { entries: PresenceData },
    Clear,
}

/// The presence map of all known actors.
#[derive(Debug, Clone, Default)]
pub struct Presences {
    map: HashMap<ActorId, PresenceData>,
}

impl Presences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a presence change for `actor`. Returns `true` when the
    /// peer set or any entry changed.
    pub fn apply(&mut self, actor: ActorId, change: &PresenceChange) -> bool {
        match change {
            PresenceChange::Put { entries } => {
                let data = self.map.entry(actor).or_default();
                let mut changed = false;
                for (key, value) in entries {
                    if data.get(key) != Some(value) {
                        data.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                changed
            }
            PresenceChange::Clear => self.map.remove(&actor).is_some(),
        }
    }

    pub fn get(&self, actor: &ActorId) -> Option<&PresenceData> {
        self.map.get(actor)
    }

    /// Known peers, sorted for deterministic event payloads.
    pub fn peers(&self) -> Vec<ActorId> {
        let mut peers: Vec<ActorId> = self.map.keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn set_all(&mut self, entries: Vec<(ActorId, PresenceData)>) {
        self.map = entries.into_iter().collect();
    }

    pub fn export_all(&self) -> Vec<(ActorId, PresenceData)> {
        let mut all: Vec<(ActorId, PresenceData)> =
            self.map.iter().map(|(a, d)| (*a, d.clone())).collect();
        all.sort_by_key(|(a, _)| *a);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor(b: u8) -> ActorId {
        ActorId([b; 12])
    }

    #[test]
    fn put_merges_into_existing_entries() {
        let mut presences = Presences::new();
        let mut first = PresenceData::new();
        first.insert("name".into(), json!("ada"));
        first.insert("cursor".into(), json!(0));
        presences.apply(actor(1), &PresenceChange::Put { entries: first });

        let mut second = PresenceData::new();
        second.insert("cursor".into(), json!(4));
        presences.apply(actor(1), &PresenceChange::Put { entries: second });

        let data = presences.get(&actor(1)).unwrap();
        assert_eq!(data["name"], json!("ada"));
        assert_eq!(data["cursor"], json!(4));
    }

    #[test]
    fn clear_removes_the_actor() {
        let mut presences = Presences::new();
        presences.apply(
            actor(1),
            &PresenceChange::Put {
                entries: PresenceData::new(),
            },
        );
        assert_eq!(presences.peers(), vec![actor(1)]);
        assert!(presences.apply(actor(1), &PresenceChange::Clear));
        assert!(presences.peers().is_empty());
    }

    #[test]
    fn unchanged_put_reports_no_change() {
        let mut presences = Presences::new();
        let mut entries = PresenceData::new();
        entries.insert("k".into(), json!(1));
        assert!(presences.apply(actor(1), &PresenceChange::Put { entries: entries.clone() }));
        assert!(!presences.apply(actor(1), &PresenceChange::Put { entries }));
    }
}
