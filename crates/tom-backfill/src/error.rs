/// Errors for the backfill layer.
///
/// `BackfillError` is what a caller of a backfill session sees. The
/// transport and wire errors are what the substrate underneath returns.
use std::fmt;

use crate::types::{MailboxAddr, PeerId};

/// Why a session was aborted on the backfiller's side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisruptionReason {
    /// The transport connection to the backfiller was lost.
    LostContact,
    /// The backfiller withdrew its published metadata.
    WentOffline,
    /// The backfiller sent bytes that do not decode as the expected message.
    MalformedMessage,
}

impl DisruptionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisruptionReason::LostContact => "lost contact with backfiller",
            DisruptionReason::WentOffline => "backfiller went offline",
            DisruptionReason::MalformedMessage => "backfiller sent a malformed message",
        }
    }
}

impl fmt::Display for DisruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a backfill session.
///
/// Every session that does not commit ends with one of these. The local
/// store has been cancelled and, if the handshake went out, the backfiller
/// has been told to drop the session.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("backfill interrupted")]
    Cancelled,

    #[error("resource disrupted: {0}")]
    Disrupted(DisruptionReason),

    /// A local protocol value could not be serialized.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl BackfillError {
    /// The disruption reason, if the session was disrupted.
    pub fn disruption(&self) -> Option<DisruptionReason> {
        match self {
            BackfillError::Disrupted(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackfillError::Cancelled)
    }
}

/// Errors returned by a [`Cluster`](crate::cluster::Cluster) when sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to peer {peer}")]
    Disconnected { peer: PeerId },

    #[error("no such mailbox: {addr}")]
    NoSuchMailbox { addr: MailboxAddr },

    #[error("mailbox full: {addr}")]
    MailboxFull { addr: MailboxAddr },

    #[error("mailbox closed: {addr}")]
    MailboxClosed { addr: MailboxAddr },
}

/// Failure of a typed send: encoding or delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// MessagePack encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<rmp_serde::encode::Error> for WireError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        WireError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for WireError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        WireError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_cancelled() {
        assert_eq!(BackfillError::Cancelled.to_string(), "backfill interrupted");
    }

    #[test]
    fn test_display_disrupted() {
        let err = BackfillError::Disrupted(DisruptionReason::LostContact);
        assert_eq!(err.to_string(), "resource disrupted: lost contact with backfiller");

        let err = BackfillError::Disrupted(DisruptionReason::WentOffline);
        assert_eq!(err.to_string(), "resource disrupted: backfiller went offline");
    }

    #[test]
    fn disruption_accessor() {
        let err = BackfillError::Disrupted(DisruptionReason::WentOffline);
        assert_eq!(err.disruption(), Some(DisruptionReason::WentOffline));
        assert!(!err.is_cancelled());
        assert_eq!(BackfillError::Cancelled.disruption(), None);
        assert!(BackfillError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_display_transport() {
        let peer = PeerId::from_u128(7);
        let err = TransportError::Disconnected { peer };
        assert_eq!(err.to_string(), format!("not connected to peer {peer}"));
    }

    #[test]
    fn wire_error_converts() {
        let err: BackfillError = WireError::Decode("eof".into()).into();
        assert_eq!(err.to_string(), "wire error: decode failed: eof");
    }
}
