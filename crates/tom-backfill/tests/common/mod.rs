//! Shared fixtures for the backfill integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tom_backfill::{
    wire, CancelBackfill, Cluster, Mailbox, MailboxAddr, MemoryCluster, PeerId, Signal,
    TransportError,
};

// ── RecordingCluster ───────────────────────────────────────────────────

/// Cluster wrapper that records every send attempt, then delegates.
///
/// Attempts are recorded even when delivery fails, so tests can check what
/// the backfillee tried to say across a severed link.
#[derive(Clone)]
pub struct RecordingCluster {
    inner: MemoryCluster,
    sent: Arc<Mutex<Vec<(MailboxAddr, Vec<u8>)>>>,
    on_delivered: Arc<Mutex<Option<DeliveryHook>>>,
}

type DeliveryHook = Box<dyn FnOnce(&MailboxAddr, &[u8]) + Send>;

impl RecordingCluster {
    pub fn new(inner: MemoryCluster) -> Self {
        Self {
            inner,
            sent: Arc::new(Mutex::new(Vec::new())),
            on_delivered: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `hook` once, right after the next awaited send is delivered and
    /// before that send returns to the caller.
    pub fn once_delivered(&self, hook: impl FnOnce(&MailboxAddr, &[u8]) + Send + 'static) {
        *self.on_delivered.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn sent(&self) -> Vec<(MailboxAddr, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Cancels addressed to `mailbox`, decoded.
    pub fn cancels_to(&self, mailbox: MailboxAddr) -> Vec<CancelBackfill> {
        self.sent()
            .into_iter()
            .filter(|(dest, _)| *dest == mailbox)
            .map(|(_, bytes)| wire::decode(&bytes).unwrap())
            .collect()
    }

    fn record(&self, dest: &MailboxAddr, data: &[u8]) {
        self.sent.lock().unwrap().push((*dest, data.to_vec()));
    }
}

#[async_trait::async_trait]
impl Cluster for RecordingCluster {
    fn local_peer(&self) -> PeerId {
        self.inner.local_peer()
    }

    fn open_mailbox(&self, capacity: usize) -> Mailbox {
        self.inner.open_mailbox(capacity)
    }

    async fn send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError> {
        self.record(dest, &data);
        let copy = data.clone();
        self.inner.send_raw(dest, data).await?;
        let hook = self.on_delivered.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(dest, &copy);
        }
        Ok(())
    }

    fn try_send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError> {
        self.record(dest, &data);
        self.inner.try_send_raw(dest, data)
    }

    fn watch_disconnect(&self, peer: PeerId) -> Signal {
        self.inner.watch_disconnect(peer)
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
