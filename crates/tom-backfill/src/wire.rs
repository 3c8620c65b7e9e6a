/// Wire messages exchanged by the backfill protocol.
///
/// Every mailbox payload is MessagePack. Each mailbox carries exactly one
/// message type, so there is no outer tag.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::{BackfillSessionId, MailboxAddr, PeerId};

/// Handshake, backfillee → backfiller. Sent once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRequestMessage<R> {
    pub session_id: BackfillSessionId,
    pub request: R,
    /// Where the backfiller sends chunks.
    pub chunk_mailbox: MailboxAddr,
    /// Where the backfiller sends the single `BackfillDone`.
    pub done_mailbox: MailboxAddr,
}

/// Backfillee → backfiller: drop this session. Sent at most once, only
/// after the handshake and only when the session did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBackfill {
    pub session_id: BackfillSessionId,
}

/// Backfiller → backfillee: every chunk has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackfillDone;

/// Liveness ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub from: PeerId,
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
