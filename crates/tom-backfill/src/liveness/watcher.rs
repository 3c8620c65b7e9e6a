/// One-shot watchers on a peer or a published resource.
///
/// Both latch: once pulsed they stay pulsed, even if the peer comes back.
/// Build a new watcher for the next session.
use crate::cluster::Cluster;
use crate::metadata::MetadataView;
use crate::signal::Signal;
use crate::types::PeerId;

/// Pulsed when the transport connection to `peer` is lost.
#[derive(Debug)]
pub struct DisconnectWatcher {
    peer: PeerId,
    signal: Signal,
}

impl DisconnectWatcher {
    pub fn new<C: Cluster + ?Sized>(cluster: &C, peer: PeerId) -> Self {
        Self {
            peer,
            signal: cluster.watch_disconnect(peer),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn is_pulsed(&self) -> bool {
        self.signal.is_pulsed()
    }

    pub async fn wait(&self) {
        self.signal.wait().await
    }
}

/// Pulsed when a published metadata entry is withdrawn.
#[derive(Debug)]
pub struct DeathWatcher<T> {
    view: MetadataView<T>,
    signal: Signal,
}

impl<T> DeathWatcher<T> {
    pub fn new(view: &MetadataView<T>) -> Self {
        let watcher = Self {
            view: view.clone(),
            signal: Signal::new(),
        };
        watcher.is_pulsed();
        watcher
    }

    /// Point query. Checks the entry directly, so a withdrawal is seen
    /// even before anyone has waited on the watcher.
    pub fn is_pulsed(&self) -> bool {
        if !self.signal.is_pulsed() && self.view.is_withdrawn() {
            self.signal.pulse();
        }
        self.signal.is_pulsed()
    }

    pub async fn wait(&self) {
        if self.is_pulsed() {
            return;
        }
        self.view.withdrawn().await;
        self.signal.pulse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cluster::MemoryNetwork;
    use crate::metadata;

    #[test]
    fn death_watcher_latches() {
        let peer = PeerId::from_u128(1);
        let (publisher, view) = metadata::publish(peer, 0u8);
        let watcher = DeathWatcher::new(&view);
        assert!(!watcher.is_pulsed());

        publisher.withdraw();
        assert!(watcher.is_pulsed());

        // A new entry for the same peer does not revive the old watcher.
        let (_publisher, _view) = metadata::publish(peer, 1u8);
        assert!(watcher.is_pulsed());
    }

    #[test]
    fn death_watcher_on_withdrawn_entry_starts_pulsed() {
        let (publisher, view) = metadata::publish(PeerId::from_u128(1), ());
        drop(publisher);
        assert!(DeathWatcher::new(&view).is_pulsed());
    }

    #[tokio::test(start_paused = true)]
    async fn death_watcher_wait_wakes() {
        let (publisher, view) = metadata::publish(PeerId::from_u128(1), ());
        let watcher = DeathWatcher::new(&view);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.withdraw();
        });
        tokio::time::timeout(Duration::from_secs(1), watcher.wait())
            .await
            .expect("withdrawal must wake the watcher");
        assert!(watcher.is_pulsed());
    }

    #[tokio::test]
    async fn disconnect_watcher_follows_link() {
        let net = MemoryNetwork::new();
        let alice = net.join();
        let bob = net.join();

        let watcher = DisconnectWatcher::new(&alice, bob.local_peer());
        assert_eq!(watcher.peer(), bob.local_peer());
        assert!(!watcher.is_pulsed());

        net.disconnect(alice.local_peer(), bob.local_peer());
        assert!(watcher.is_pulsed());
        watcher.wait().await;

        net.reconnect(alice.local_peer(), bob.local_peer());
        assert!(watcher.is_pulsed(), "disconnect watcher must not reset");
    }
}
