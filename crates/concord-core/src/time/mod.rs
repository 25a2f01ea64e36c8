//! Logical time and replica identity.
//!
//! Every operation in a document is stamped with a [`TimeTicket`], a
//! totally ordered hybrid logical timestamp. Tickets are issued by a
//! [`ChangeId`]-driven context: one lamport value per change, one
//! delimiter per operation within the change.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── ActorId ────────────────────────────────────────────────────────────────

/// A stable 12-byte identifier for a replica within a document session.
///
/// The all-zero actor is the "nil" actor used by system tickets; it
/// sorts before every real actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub [u8; 12]);

impl ActorId {
    /// The nil actor. Owns [`TimeTicket::INITIAL`].
    pub const INITIAL: ActorId = ActorId([0x00; 12]);

    /// The greatest possible actor. Owns [`TimeTicket::MAX`].
    pub const MAX: ActorId = ActorId([0xFF; 12]);

    /// Generates a fresh random actor id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        ActorId(bytes)
    }

    /// Parses a 24-character lowercase hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(ActorId(bytes))
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            return write!(f, "nil");
        }
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ── TimeTicket ─────────────────────────────────────────────────────────────

/// An immutable logical timestamp: `(lamport, actor, delimiter)`.
///
/// The derived ordering compares lamport first, then actor bytes, then
/// delimiter — the total order every LWW contest and RGA tie-break in
/// the document relies on. The nil actor stands in for "no actor yet"
/// and sorts first among equal lamport values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeTicket {
    pub lamport: i64,
    pub actor: ActorId,
    pub delimiter: u32,
}

impl TimeTicket {
    /// The ticket owned by every document's root object.
    pub const INITIAL: TimeTicket = TimeTicket {
        lamport: 0,
        actor: ActorId::INITIAL,
        delimiter: 0,
    };

    /// An upper bound for every issuable ticket. Purging tombstones
    /// with `MAX` as the minimum synced ticket drops all of them.
    pub const MAX: TimeTicket = TimeTicket {
        lamport: i64::MAX,
        actor: ActorId::MAX,
        delimiter: u32::MAX,
    };

    pub const fn new(lamport: i64, delimiter: u32, actor: ActorId) -> Self {
        Self {
            lamport,
            actor,
            delimiter,
        }
    }

    /// Returns `true` when `self` is strictly later than `other`.
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }
}

/// Canonical string form `"<lamport>:<actor-or-nil>:<delimiter>"`, used
/// for debugging and as a map key in event payloads.
impl fmt::Display for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lamport, self.actor, self.delimiter)
    }
}

// ── ChangeId ───────────────────────────────────────────────────────────────

/// Identifier of a change: per-actor sequence plus a lamport value.
///
/// `client_seq` orders the changes a single client produced and is what
/// server acknowledgements refer to; `lamport` orders changes across
/// clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeId {
    pub client_seq: u32,
    pub lamport: i64,
    pub actor: ActorId,
}

impl ChangeId {
    pub const INITIAL: ChangeId = ChangeId {
        client_seq: 0,
        lamport: 0,
        actor: ActorId::INITIAL,
    };

    pub const fn new(client_seq: u32, lamport: i64, actor: ActorId) -> Self {
        Self {
            client_seq,
            lamport,
            actor,
        }
    }

    /// The id the next local change will carry.
    pub fn next(&self) -> ChangeId {
        ChangeId {
            client_seq: self.client_seq + 1,
            lamport: self.lamport + 1,
            actor: self.actor,
        }
    }

    /// Receive rule: adopt the remote lamport when it is ahead. The
    /// next local change then bumps past it via [`ChangeId::next`].
    pub fn sync_lamport(&self, other_lamport: i64) -> ChangeId {
        ChangeId {
            client_seq: self.client_seq,
            lamport: self.lamport.max(other_lamport),
            actor: self.actor,
        }
    }

    pub fn with_actor(&self, actor: ActorId) -> ChangeId {
        ChangeId {
            client_seq: self.client_seq,
            lamport: self.lamport,
            actor,
        }
    }

    /// Issues the `delimiter`-th ticket of this change.
    pub fn ticket(&self, delimiter: u32) -> TimeTicket {
        TimeTicket::new(self.lamport, delimiter, self.actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorId {
        ActorId([b; 12])
    }

    #[test]
    fn ticket_order_lamport_first() {
        let a = TimeTicket::new(1, 5, actor(9));
        let b = TimeTicket::new(2, 0, actor(1));
        assert!(b.after(&a));
    }

    #[test]
    fn ticket_order_actor_breaks_lamport_tie() {
        let a = TimeTicket::new(1, 0, actor(1));
        let b = TimeTicket::new(1, 0, actor(2));
        assert!(b.after(&a));
        assert!(!a.after(&b));
    }

    #[test]
    fn ticket_order_delimiter_last() {
        let a = TimeTicket::new(1, 1, actor(1));
        let b = TimeTicket::new(1, 2, actor(1));
        assert!(b.after(&a));
    }

    #[test]
    fn ticket_total_order_is_exclusive_and_transitive() {
        let tickets = [
            TimeTicket::INITIAL,
            TimeTicket::new(1, 0, actor(1)),
            TimeTicket::new(1, 0, actor(2)),
            TimeTicket::new(1, 1, actor(1)),
            TimeTicket::new(2, 0, ActorId::INITIAL),
            TimeTicket::MAX,
        ];
        for a in &tickets {
            for b in &tickets {
                let lt = a < b;
                let gt = a > b;
                let eq = a == b;
                assert_eq!(u8::from(lt) + u8::from(gt) + u8::from(eq), 1);
                for c in &tickets {
                    if a < b && b < c {
                        assert!(a < c);
                    }
                }
            }
        }
    }

    #[test]
    fn initial_sorts_before_everything_else() {
        assert!(TimeTicket::new(0, 1, ActorId::INITIAL).after(&TimeTicket::INITIAL));
        assert!(TimeTicket::MAX.after(&TimeTicket::INITIAL));
    }

    #[test]
    fn ticket_canonical_string() {
        assert_eq!(TimeTicket::INITIAL.to_string(), "0:nil:0");
        let t = TimeTicket::new(7, 3, actor(0xAB));
        assert_eq!(t.to_string(), "7:abababababababababababab:3");
    }

    #[test]
    fn actor_hex_round_trip() {
        let a = actor(0x1F);
        assert_eq!(ActorId::from_hex(&a.to_string()), Some(a));
        assert_eq!(ActorId::from_hex("xyz"), None);
    }

    #[test]
    fn change_id_next_bumps_both() {
        let id = ChangeId::new(3, 10, actor(1));
        let next = id.next();
        assert_eq!(next.client_seq, 4);
        assert_eq!(next.lamport, 11);
        assert_eq!(next.actor, actor(1));
    }

    #[test]
    fn change_id_sync_lamport_adopts_max() {
        let id = ChangeId::new(3, 10, actor(1));
        assert_eq!(id.sync_lamport(20).lamport, 20);
        assert_eq!(id.sync_lamport(5).lamport, 10);
        assert_eq!(id.sync_lamport(20).client_seq, 3);
    }

    #[test]
    fn change_issues_increasing_tickets() {
        let id = ChangeId::new(1, 4, actor(1));
        let t1 = id.ticket(1);
        let t2 = id.ticket(2);
        assert!(t2.after(&t1));
        assert_eq!(t1.lamport, 4);
    }
}
