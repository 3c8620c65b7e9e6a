//! In-process cluster: every peer lives in the same address space.
//!
//! A `MemoryNetwork` is the shared registry; each peer gets a
//! `MemoryCluster` endpoint from it. Links between peers can be severed
//! and restored to inject faults.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::{Cluster, Mailbox};
use crate::error::TransportError;
use crate::signal::Signal;
use crate::types::{MailboxAddr, PeerId};

struct DisconnectWatch {
    observer: PeerId,
    peer: PeerId,
    signal: Signal,
}

#[derive(Default)]
struct NetworkState {
    next_mailbox_id: u64,
    mailboxes: HashMap<MailboxAddr, mpsc::Sender<Vec<u8>>>,
    /// Severed links, stored with the smaller id first.
    severed: HashSet<(PeerId, PeerId)>,
    watches: Vec<DisconnectWatch>,
    /// Messages accepted per destination peer.
    delivered: HashMap<PeerId, u64>,
}

impl NetworkState {
    fn is_connected(&self, a: PeerId, b: PeerId) -> bool {
        a == b || !self.severed.contains(&link(a, b))
    }

    /// Look up the sender for `dest` as seen from `from`.
    fn route(&mut self, from: PeerId, dest: &MailboxAddr) -> Result<mpsc::Sender<Vec<u8>>, TransportError> {
        if !self.is_connected(from, dest.peer) {
            return Err(TransportError::Disconnected { peer: dest.peer });
        }
        let Some(tx) = self.mailboxes.get(dest) else {
            return Err(TransportError::NoSuchMailbox { addr: *dest });
        };
        if tx.is_closed() {
            self.mailboxes.remove(dest);
            return Err(TransportError::MailboxClosed { addr: *dest });
        }
        Ok(tx.clone())
    }

    /// Forget mailboxes whose receiver is gone and watches nobody holds.
    fn prune(&mut self) {
        self.mailboxes.retain(|_, tx| !tx.is_closed());
        self.watches.retain(|w| !w.signal.is_orphaned());
    }

    fn count_delivery(&mut self, peer: PeerId) {
        *self.delivered.entry(peer).or_insert(0) += 1;
    }
}

fn link(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared registry for a set of in-process peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Endpoint for a specific peer id.
    pub fn endpoint(&self, peer: PeerId) -> MemoryCluster {
        MemoryCluster {
            local: peer,
            network: self.clone(),
        }
    }

    /// Endpoint for a fresh random peer.
    pub fn join(&self) -> MemoryCluster {
        self.endpoint(PeerId::random())
    }

    /// Sever the link between `a` and `b`.
    ///
    /// Sends across the link fail from now on and every disconnect signal
    /// either side holds for the other is pulsed.
    pub fn disconnect(&self, a: PeerId, b: PeerId) {
        let mut state = self.lock();
        if !state.severed.insert(link(a, b)) {
            return;
        }
        tracing::debug!("memory network: link {a} <-> {b} severed");
        state.watches.retain(|w| {
            let hit = (w.observer == a && w.peer == b) || (w.observer == b && w.peer == a);
            if hit {
                w.signal.pulse();
            }
            !hit
        });
    }

    /// Restore the link between `a` and `b`. Signals already pulsed stay
    /// pulsed; new watchers start unset.
    pub fn reconnect(&self, a: PeerId, b: PeerId) {
        if self.lock().severed.remove(&link(a, b)) {
            tracing::debug!("memory network: link {a} <-> {b} restored");
        }
    }

    pub fn is_connected(&self, a: PeerId, b: PeerId) -> bool {
        self.lock().is_connected(a, b)
    }

    /// Number of messages accepted for any mailbox owned by `peer`.
    pub fn delivered_to(&self, peer: PeerId) -> u64 {
        self.lock().delivered.get(&peer).copied().unwrap_or(0)
    }

    /// Mailboxes and disconnect watches currently held in the registry.
    pub fn registered(&self) -> (usize, usize) {
        let state = self.lock();
        (state.mailboxes.len(), state.watches.len())
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryCluster {
    local: PeerId,
    network: MemoryNetwork,
}

impl MemoryCluster {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait::async_trait]
impl Cluster for MemoryCluster {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn open_mailbox(&self, capacity: usize) -> Mailbox {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut state = self.network.lock();
        state.prune();
        state.next_mailbox_id += 1;
        let addr = MailboxAddr {
            peer: self.local,
            id: state.next_mailbox_id,
        };
        state.mailboxes.insert(addr, tx);
        Mailbox::new(addr, rx)
    }

    async fn send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.network.lock().route(self.local, dest)?;
        tx.send(data)
            .await
            .map_err(|_| TransportError::MailboxClosed { addr: *dest })?;
        self.network.lock().count_delivery(dest.peer);
        Ok(())
    }

    fn try_send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let tx = state.route(self.local, dest)?;
        tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::MailboxFull { addr: *dest },
            mpsc::error::TrySendError::Closed(_) => TransportError::MailboxClosed { addr: *dest },
        })?;
        state.count_delivery(dest.peer);
        Ok(())
    }

    fn watch_disconnect(&self, peer: PeerId) -> Signal {
        let mut state = self.network.lock();
        state.prune();
        if !state.is_connected(self.local, peer) {
            return Signal::pulsed();
        }
        let signal = Signal::new();
        state.watches.push(DisconnectWatch {
            observer: self.local,
            peer,
            signal: signal.clone(),
        });
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();

        let mut inbox = bob.open_mailbox(8);
        for i in 0..5u8 {
            alice.send_raw(&inbox.addr(), vec![i]).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(inbox.recv().await, Some(vec![i]));
        }
        assert_eq!(net.delivered_to(bob.local_peer()), 5);
        assert_eq!(net.delivered_to(alice.local_peer()), 0);
    }

    #[tokio::test]
    async fn unknown_mailbox_fails_loudly() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bogus = MailboxAddr {
            peer: PeerId::from_u128(99),
            id: 1,
        };
        let err = alice.send_raw(&bogus, vec![1]).await.unwrap_err();
        assert_eq!(err, TransportError::NoSuchMailbox { addr: bogus });
    }

    #[tokio::test]
    async fn dropped_mailbox_is_closed() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();

        let inbox = bob.open_mailbox(1);
        let addr = inbox.addr();
        drop(inbox);

        let err = alice.try_send_raw(&addr, vec![1]).unwrap_err();
        assert_eq!(err, TransportError::MailboxClosed { addr });
        // Second attempt: the entry is gone.
        let err = alice.try_send_raw(&addr, vec![1]).unwrap_err();
        assert_eq!(err, TransportError::NoSuchMailbox { addr });
    }

    #[tokio::test]
    async fn try_send_reports_full() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();

        let inbox = bob.open_mailbox(1);
        alice.try_send_raw(&inbox.addr(), vec![1]).unwrap();
        let err = alice.try_send_raw(&inbox.addr(), vec![2]).unwrap_err();
        assert_eq!(err, TransportError::MailboxFull { addr: inbox.addr() });
    }

    #[tokio::test]
    async fn disconnect_pulses_watchers_and_blocks_sends() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();
        let carol = net.join();

        let alice_sees_bob = alice.watch_disconnect(bob.local_peer());
        let bob_sees_alice = bob.watch_disconnect(alice.local_peer());
        let alice_sees_carol = alice.watch_disconnect(carol.local_peer());
        let inbox = bob.open_mailbox(4);

        net.disconnect(alice.local_peer(), bob.local_peer());

        assert!(alice_sees_bob.is_pulsed());
        assert!(bob_sees_alice.is_pulsed());
        assert!(!alice_sees_carol.is_pulsed());

        let err = alice.send_raw(&inbox.addr(), vec![1]).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected { peer: bob.local_peer() });

        // Watching an already-severed link is pulsed from the start.
        assert!(alice.watch_disconnect(bob.local_peer()).is_pulsed());

        net.reconnect(alice.local_peer(), bob.local_peer());
        assert!(net.is_connected(alice.local_peer(), bob.local_peer()));
        assert!(!alice.watch_disconnect(bob.local_peer()).is_pulsed());
        alice.send_raw(&inbox.addr(), vec![1]).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_mailboxes_and_watches_are_reclaimed() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();

        for _ in 0..100 {
            let _inbox = alice.open_mailbox(4);
            let _watch = alice.watch_disconnect(bob.local_peer());
        }
        let kept = bob.open_mailbox(4);
        let watching = bob.watch_disconnect(alice.local_peer());

        // Only the last round's leftovers can linger until the next prune.
        let (mailboxes, watches) = net.registered();
        assert!(mailboxes <= 2, "mailboxes={mailboxes}");
        assert!(watches <= 2, "watches={watches}");

        // Live entries survive pruning.
        alice.try_send_raw(&kept.addr(), vec![1]).unwrap();
        net.disconnect(alice.local_peer(), bob.local_peer());
        assert!(watching.is_pulsed());
    }
}
