use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackfillError;

/// Identity of a node in the cluster.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// A fresh random peer id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id (for tests and simulations).
    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.simple().to_string();
        write!(f, "PeerId({}...)", &hex[..8])
    }
}

/// Address of a mailbox owned by `peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxAddr {
    pub peer: PeerId,
    pub id: u64,
}

impl fmt::Display for MailboxAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.peer, self.id)
    }
}

/// Correlates every message of one backfill attempt.
///
/// Minted once per session and never reused, so a late cancel for an old
/// session cannot be confused with a newer session to the same peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackfillSessionId(Uuid);

impl BackfillSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BackfillSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BackfillSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BackfillSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackfillSessionId({})", self.0)
    }
}

/// Terminal state of a backfill session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The store was told `end_backfill`.
    Committed,
    /// The store was told `cancel_backfill`.
    Aborted,
}

impl Outcome {
    pub fn of(result: &Result<(), BackfillError>) -> Self {
        match result {
            Ok(()) => Outcome::Committed,
            Err(_) => Outcome::Aborted,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => f.write_str("committed"),
            Outcome::Aborted => f.write_str("aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = BackfillSessionId::new();
        let b = BackfillSessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn peer_debug_is_short() {
        let peer = PeerId::from_u128(0xabcdef);
        let dbg = format!("{peer:?}");
        assert!(dbg.starts_with("PeerId("));
        assert!(dbg.len() < 24, "got {dbg}");
    }

    #[test]
    fn mailbox_display() {
        let addr = MailboxAddr {
            peer: PeerId::from_u128(1),
            id: 42,
        };
        assert!(addr.to_string().ends_with("#42"));
    }

    #[test]
    fn outcome_of_result() {
        assert_eq!(Outcome::of(&Ok(())), Outcome::Committed);
        assert_eq!(Outcome::of(&Err(BackfillError::Cancelled)), Outcome::Aborted);
    }
}
