//! The document: a root registry, a clock, a local change buffer, and
//! the push/pull protocol over change packs.

pub mod change;
pub mod context;
pub mod event;
pub mod presence;
pub mod proxy;

pub use change::{Change, ChangePack, Checkpoint};
pub use event::DocEvent;
pub use presence::{PresenceChange, PresenceData, Presences};
pub use proxy::{ArrayRef, CounterRef, ObjectRef, TextRef, TreeContent, TreeRef};

use std::collections::HashMap;

use crate::codec;
use crate::crdt::CrdtRoot;
use crate::error::CoreError;
use crate::time::{ActorId, ChangeId, TimeTicket};

use context::ChangeContext;

/// Whether the document participates in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    Detached,
    Attached,
}

/// A replicated document.
///
/// All mutation is serialized per instance: inbound pack application
/// and outbound `update` are mutually exclusive by `&mut self`. The
/// CRDT algorithms themselves are synchronous; only the surrounding
/// transport suspends.
pub struct Document {
    key: String,
    status: DocStatus,
    root: CrdtRoot,
    change_id: ChangeId,
    checkpoint: Checkpoint,
    local_changes: Vec<Change>,
    presences: Presences,
    /// Newest applied change lamport per actor; dedupes re-delivered
    /// changes so pack application is idempotent.
    seen_lamports: HashMap<ActorId, i64>,
    subscribers: Vec<Box<dyn Fn(&DocEvent)>>,
}

impl Document {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: DocStatus::Detached,
            root: CrdtRoot::new(),
            change_id: ChangeId::INITIAL,
            checkpoint: Checkpoint::INITIAL,
            local_changes: Vec::new(),
            presences: Presences::new(),
            seen_lamports: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> DocStatus {
        self.status
    }

    pub fn actor_id(&self) -> ActorId {
        self.change_id.actor
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Assigns the replica identity all further changes carry.
    pub fn activate(&mut self, actor: ActorId) {
        self.change_id = self.change_id.with_actor(actor);
    }

    pub fn deactivate(&mut self) {
        self.status = DocStatus::Detached;
        self.change_id = self.change_id.with_actor(ActorId::INITIAL);
    }

    pub fn attach(&mut self) {
        self.status = DocStatus::Attached;
    }

    pub fn detach(&mut self) {
        self.status = DocStatus::Detached;
    }

    // ── Events ─────────────────────────────────────────────────────────────

    pub fn subscribe(&mut self, handler: impl Fn(&DocEvent) + 'static) {
        self.subscribers.push(Box::new(handler));
    }

    fn emit(&self, event: DocEvent) {
        for handler in &self.subscribers {
            handler(&event);
        }
    }

    // ── Local editing ──────────────────────────────────────────────────────

    /// Runs `f` against proxies over a deep copy of the root; on
    /// success the recorded operations commit atomically as one change
    /// and land in the local buffer. On error the copy is dropped and
    /// the root is untouched.
    pub fn update<F>(&mut self, message: Option<&str>, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut ObjectRef<'_, '_>) -> Result<(), CoreError>,
    {
        let mut working = self.root.clone();
        let next_id = self.change_id.next();
        let mut ctx = ChangeContext::new(&mut working, next_id, message.map(str::to_string));
        {
            let mut root_ref = ObjectRef {
                ctx: &mut ctx,
                target: TimeTicket::INITIAL,
            };
            f(&mut root_ref)?;
        }
        let Some(change) = ctx.into_change() else {
            return Ok(());
        };
        self.commit_local(change)
    }

    /// Merges `entries` into this actor's presence as a buffered
    /// change.
    pub fn update_presence(&mut self, entries: PresenceData) -> Result<(), CoreError> {
        let change = Change {
            id: self.change_id.next(),
            message: None,
            operations: Vec::new(),
            presence_change: Some(PresenceChange::Put { entries }),
        };
        self.commit_local(change)
    }

    /// Removes this actor's presence as a buffered change.
    pub fn clear_presence(&mut self) -> Result<(), CoreError> {
        let change = Change {
            id: self.change_id.next(),
            message: None,
            operations: Vec::new(),
            presence_change: Some(PresenceChange::Clear),
        };
        self.commit_local(change)
    }

    fn commit_local(&mut self, change: Change) -> Result<(), CoreError> {
        let infos = change.execute(&mut self.root)?;
        self.change_id = change.id;
        self.observe_lamport(change.id);
        if let Some(presence_change) = &change.presence_change {
            if self.presences.apply(change.id.actor, presence_change) {
                self.emit(DocEvent::PeersChanged {
                    peers: self.presences.peers(),
                });
            }
        }
        let message = change.message.clone();
        self.local_changes.push(change);
        self.emit(DocEvent::LocalChange { message, infos });
        Ok(())
    }

    // ── Sync ───────────────────────────────────────────────────────────────

    /// Applies a pack from the server: optional snapshot, remote
    /// changes in order, checkpoint forwarding, buffer pruning, and
    /// garbage collection. A change that fails to execute is logged
    /// and stops further application of the pack.
    pub fn apply_change_pack(&mut self, pack: &ChangePack) -> Result<(), CoreError> {
        if let Some(bytes) = &pack.snapshot {
            let snapshot = codec::decode_snapshot(bytes)?;
            self.root = codec::import_root(&snapshot.root)?;
            self.presences.set_all(snapshot.presences.clone());
            self.change_id = self.change_id.sync_lamport(snapshot.lamport);
            self.seen_lamports.clear();
            self.emit(DocEvent::Snapshot);
        }

        for change in &pack.changes {
            self.change_id = self.change_id.sync_lamport(change.id.lamport);
            if self.already_seen(change.id) {
                continue;
            }
            match change.execute(&mut self.root) {
                Ok(infos) => {
                    self.observe_lamport(change.id);
                    if let Some(presence_change) = &change.presence_change {
                        if self.presences.apply(change.id.actor, presence_change) {
                            self.emit(DocEvent::PeersChanged {
                                peers: self.presences.peers(),
                            });
                        }
                    }
                    self.emit(DocEvent::RemoteChange {
                        actor: change.id.actor,
                        message: change.message.clone(),
                        infos,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        actor = %change.id.actor,
                        lamport = change.id.lamport,
                        "change failed to execute; pack application stopped"
                    );
                    return Ok(());
                }
            }
        }

        self.checkpoint = self.checkpoint.forward(&pack.checkpoint);
        self.local_changes
            .retain(|c| c.id.client_seq > pack.checkpoint.client_seq);
        if let Some(min_synced) = pack.min_synced_ticket {
            self.root.garbage_collect(min_synced);
        }
        Ok(())
    }

    /// Bundles the local buffer for pushing to the server.
    pub fn create_change_pack(&self) -> ChangePack {
        ChangePack::new(
            self.key.clone(),
            Checkpoint::new(self.checkpoint.server_seq, self.change_id.client_seq),
            self.local_changes.clone(),
        )
    }

    /// Encodes the current root, presences, and clock as snapshot
    /// bytes for embedding in a pack.
    pub fn create_snapshot(&self) -> Result<Vec<u8>, CoreError> {
        let snapshot = codec::Snapshot {
            root: codec::export_root(&self.root)?,
            presences: self.presences.export_all(),
            lamport: self.change_id.lamport,
        };
        codec::encode_snapshot(&snapshot)
    }

    fn already_seen(&self, id: ChangeId) -> bool {
        self.seen_lamports
            .get(&id.actor)
            .map_or(false, |seen| *seen >= id.lamport)
    }

    fn observe_lamport(&mut self, id: ChangeId) {
        let entry = self.seen_lamports.entry(id.actor).or_insert(id.lamport);
        if id.lamport > *entry {
            *entry = id.lamport;
        }
    }

    // ── Views ──────────────────────────────────────────────────────────────

    /// Canonical JSON view of the document.
    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    /// Read-only access to the root registry.
    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn presence_of(&self, actor: &ActorId) -> Option<&PresenceData> {
        self.presences.get(actor)
    }

    pub fn peers(&self) -> Vec<ActorId> {
        self.presences.peers()
    }

    pub fn pending_change_count(&self) -> usize {
        self.local_changes.len()
    }

    /// Host-driven GC entry point; packs normally drive this through
    /// their min-synced ticket.
    pub fn garbage_collect(&mut self, min_synced: TimeTicket) -> usize {
        self.root.garbage_collect(min_synced)
    }
}
