/// Published metadata entries.
///
/// A peer publishes a value (for a backfiller: the mailboxes it serves
/// on) and other peers hold read-only views of it. Withdrawal is
/// terminal: once an entry is withdrawn, or its publisher is dropped,
/// every view reports it gone for good.
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::{MailboxAddr, PeerId};

/// The entry a backfiller publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillerMetadata {
    /// Receives `BackfillRequestMessage`s.
    pub backfill_mailbox: MailboxAddr,
    /// Receives `CancelBackfill`s.
    pub cancel_backfill_mailbox: MailboxAddr,
}

/// Publish `value` on behalf of `peer`.
pub fn publish<T>(peer: PeerId, value: T) -> (MetadataPublisher<T>, MetadataView<T>) {
    let (tx, rx) = watch::channel(Some(value));
    (MetadataPublisher { tx }, MetadataView { peer, rx })
}

/// Owning side of an entry.
pub struct MetadataPublisher<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> MetadataPublisher<T> {
    /// Replace the published value.
    pub fn update(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Withdraw the entry. Views observe it immediately.
    pub fn withdraw(self) {
        self.tx.send_replace(None);
    }
}

/// Read-only view of an entry published by `peer()`.
pub struct MetadataView<T> {
    peer: PeerId,
    rx: watch::Receiver<Option<T>>,
}

impl<T> Clone for MetadataView<T> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer,
            rx: self.rx.clone(),
        }
    }
}

impl<T> MetadataView<T> {
    /// The peer that owns the entry.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// True once the entry has been withdrawn or its publisher dropped.
    pub fn is_withdrawn(&self) -> bool {
        self.rx.has_changed().is_err() || self.rx.borrow().is_none()
    }

    /// Resolve once the entry is withdrawn.
    pub async fn withdrawn(&self) {
        let mut rx = self.rx.clone();
        // Err means the publisher is gone, which is a withdrawal too.
        let _ = rx.wait_for(Option::is_none).await;
    }
}

impl<T: Clone> MetadataView<T> {
    /// Current value, `None` once withdrawn.
    pub fn get(&self) -> Option<T> {
        if self.rx.has_changed().is_err() {
            return None;
        }
        self.rx.borrow().clone()
    }
}

impl<T> std::fmt::Debug for MetadataView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataView")
            .field("peer", &self.peer)
            .field("withdrawn", &self.is_withdrawn())
            .finish()
    }
}
