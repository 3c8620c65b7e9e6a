//! Toy protocol for exercising backfills end to end.
//!
//! - `Region`: a set of string keys
//! - `DummyStore`: key/value store that journals every store-contract call
//!   and panics on contract violations
//! - `DummyBackfiller`: serves handshakes from a snapshot of another store

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::cluster::{send_message, Cluster, Mailbox};
use crate::metadata::{self, BackfillerMetadata, MetadataPublisher, MetadataView};
use crate::signal::Signal;
use crate::store::BackfillStore;
use crate::types::{BackfillSessionId, MailboxAddr};
use crate::wire::{self, BackfillDone, BackfillRequestMessage, CancelBackfill};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Region ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    keys: BTreeSet<String>,
}

impl Region {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Single-letter keys `first..=last`.
    pub fn from_range(first: char, last: char) -> Self {
        Self::from_keys((first..=last).map(String::from))
    }

    pub fn a_thru_z() -> Self {
        Self::from_range('a', 'z')
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn is_superset(&self, other: &Region) -> bool {
        self.keys.is_superset(&other.keys)
    }

    pub fn intersection(&self, other: &Region) -> Region {
        Self {
            keys: self.keys.intersection(&other.keys).cloned().collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyRequest {
    pub region: Region,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyChunk {
    pub key: String,
    pub value: String,
    pub timestamp: u64,
}

// ── Store ──────────────────────────────────────────────────────────────

/// One call on the store contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    BeginBackfill,
    BackfillChunk { key: String },
    CancelBackfill,
    EndBackfill,
}

/// Shared, cloneable record of the calls a `DummyStore` received.
#[derive(Debug, Clone, Default)]
pub struct StoreJournal {
    calls: Arc<Mutex<Vec<StoreCall>>>,
    /// Chunk counts someone is waiting for.
    thresholds: Arc<Mutex<Vec<(usize, Signal)>>>,
}

impl StoreJournal {
    fn record(&self, call: StoreCall) {
        let is_chunk = matches!(call, StoreCall::BackfillChunk { .. });
        lock(&self.calls).push(call);
        if is_chunk {
            let applied = self.chunk_count();
            lock(&self.thresholds).retain(|(n, signal)| {
                if applied >= *n {
                    signal.pulse();
                }
                applied < *n
            });
        }
    }

    /// Pulsed once at least `n` chunks have been applied.
    pub fn on_chunks(&self, n: usize) -> Signal {
        let mut thresholds = lock(&self.thresholds);
        if self.chunk_count() >= n {
            return Signal::pulsed();
        }
        let signal = Signal::new();
        thresholds.push((n, signal.clone()));
        signal
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    pub fn chunk_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, StoreCall::BackfillChunk { .. }))
            .count()
    }

    pub fn end_count(&self) -> usize {
        self.count(&StoreCall::EndBackfill)
    }

    pub fn cancel_count(&self) -> usize {
        self.count(&StoreCall::CancelBackfill)
    }

    pub fn begin_count(&self) -> usize {
        self.count(&StoreCall::BeginBackfill)
    }

    fn count(&self, call: &StoreCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }
}

/// Key/value store over a region.
#[derive(Debug)]
pub struct DummyStore {
    region: Region,
    values: BTreeMap<String, String>,
    timestamps: BTreeMap<String, u64>,
    in_backfill: bool,
    apply_delay: Duration,
    journal: StoreJournal,
}

impl DummyStore {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            values: BTreeMap::new(),
            timestamps: BTreeMap::new(),
            in_backfill: false,
            apply_delay: Duration::ZERO,
            journal: StoreJournal::default(),
        }
    }

    /// A store over `region` holding `value-<key>` for every key.
    pub fn filled(region: Region) -> Self {
        let mut store = Self::new(region);
        let keys: Vec<String> = store.region.keys().map(String::from).collect();
        for (ts, key) in keys.into_iter().enumerate() {
            let value = format!("value-{key}");
            store.put(key, value, ts as u64 + 1);
        }
        store
    }

    /// Make every chunk application wait this long.
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn put(&mut self, key: String, value: String, timestamp: u64) {
        self.timestamps.insert(key.clone(), timestamp);
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn timestamp(&self, key: &str) -> Option<u64> {
        self.timestamps.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn in_backfill(&self) -> bool {
        self.in_backfill
    }

    pub fn journal(&self) -> StoreJournal {
        self.journal.clone()
    }

    /// Chunks this store can serve for `region`, in key order.
    pub fn chunks_for(&self, region: &Region) -> Vec<DummyChunk> {
        let wanted = self.region.intersection(region);
        wanted
            .keys()
            .filter_map(|key| {
                let value = self.values.get(key)?;
                Some(DummyChunk {
                    key: key.to_string(),
                    value: value.clone(),
                    timestamp: self.timestamps.get(key).copied().unwrap_or(0),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl BackfillStore for DummyStore {
    type Request = DummyRequest;
    type Chunk = DummyChunk;

    fn begin_backfill(&mut self) -> DummyRequest {
        assert!(!self.in_backfill, "begin_backfill while a backfill is open");
        self.in_backfill = true;
        self.journal.record(StoreCall::BeginBackfill);
        DummyRequest {
            region: self.region.clone(),
        }
    }

    async fn backfill_chunk(&mut self, chunk: DummyChunk) {
        assert!(self.in_backfill, "backfill_chunk outside a backfill");
        assert!(
            self.region.contains(&chunk.key),
            "chunk for key {:?} outside the store region",
            chunk.key
        );
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        self.journal.record(StoreCall::BackfillChunk {
            key: chunk.key.clone(),
        });
        self.put(chunk.key, chunk.value, chunk.timestamp);
    }

    fn cancel_backfill(&mut self) {
        assert!(self.in_backfill, "cancel_backfill without begin_backfill");
        self.in_backfill = false;
        self.journal.record(StoreCall::CancelBackfill);
    }

    fn end_backfill(&mut self) {
        assert!(self.in_backfill, "end_backfill without begin_backfill");
        self.in_backfill = false;
        self.journal.record(StoreCall::EndBackfill);
    }
}

// ── Backfiller ─────────────────────────────────────────────────────────

/// Knobs for fault-injection.
#[derive(Debug, Clone, Default)]
pub struct BackfillerOptions {
    /// Wait this long before each chunk.
    pub chunk_delay: Duration,
    /// Stop after this many chunks and hold the session open (no `done`)
    /// until it is cancelled.
    pub pause_after: Option<usize>,
}

/// What a `DummyBackfiller` has seen and done.
#[derive(Debug, Clone, Default)]
pub struct BackfillerStats {
    pub requests: Vec<BackfillSessionId>,
    pub cancels: Vec<BackfillSessionId>,
    pub chunks_sent: u64,
    pub done_sent: u64,
}

#[derive(Default)]
struct Shared {
    stats: Mutex<BackfillerStats>,
    sessions: Mutex<HashMap<BackfillSessionId, CancellationToken>>,
}

/// Serves backfills from a snapshot of a `DummyStore`.
///
/// Publishes `BackfillerMetadata` for its mailboxes; withdrawing it (or
/// dropping the backfiller) takes the backfiller offline.
pub struct DummyBackfiller {
    publisher: Option<MetadataPublisher<BackfillerMetadata>>,
    view: MetadataView<BackfillerMetadata>,
    shared: Arc<Shared>,
    paused: Signal,
    _server: AbortOnDropHandle<()>,
}

impl DummyBackfiller {
    pub fn spawn<C>(cluster: Arc<C>, source: &DummyStore, options: BackfillerOptions) -> Self
    where
        C: Cluster + 'static,
    {
        let request_mailbox = cluster.open_mailbox(16);
        let cancel_mailbox = cluster.open_mailbox(16);
        let meta = BackfillerMetadata {
            backfill_mailbox: request_mailbox.addr(),
            cancel_backfill_mailbox: cancel_mailbox.addr(),
        };
        let (publisher, view) = metadata::publish(cluster.local_peer(), meta);

        let shared = Arc::new(Shared::default());
        let paused = Signal::new();
        let server = Server {
            cluster,
            source: source.snapshot(),
            options,
            shared: shared.clone(),
            paused: paused.clone(),
        };
        let server = AbortOnDropHandle::new(tokio::spawn(
            server.run(request_mailbox, cancel_mailbox),
        ));

        Self {
            publisher: Some(publisher),
            view,
            shared,
            paused,
            _server: server,
        }
    }

    pub fn view(&self) -> MetadataView<BackfillerMetadata> {
        self.view.clone()
    }

    /// Take the backfiller offline. Idempotent.
    pub fn withdraw(&mut self) {
        if let Some(publisher) = self.publisher.take() {
            publisher.withdraw();
        }
    }

    /// Pulsed when a session hits `pause_after`.
    pub fn paused(&self) -> Signal {
        self.paused.clone()
    }

    pub fn stats(&self) -> BackfillerStats {
        lock(&self.shared.stats).clone()
    }
}

impl Drop for DummyBackfiller {
    fn drop(&mut self) {
        for token in lock(&self.shared.sessions).values() {
            token.cancel();
        }
    }
}

impl DummyStore {
    fn snapshot(&self) -> DummyStore {
        let mut copy = DummyStore::new(self.region.clone());
        copy.values = self.values.clone();
        copy.timestamps = self.timestamps.clone();
        copy
    }
}

struct Server<C: Cluster> {
    cluster: Arc<C>,
    source: DummyStore,
    options: BackfillerOptions,
    shared: Arc<Shared>,
    paused: Signal,
}

impl<C: Cluster + 'static> Server<C> {
    async fn run(self, mut requests: Mailbox, mut cancels: Mailbox) {
        loop {
            tokio::select! {
                bytes = requests.recv() => {
                    let Some(bytes) = bytes else { return };
                    match wire::decode::<BackfillRequestMessage<DummyRequest>>(&bytes) {
                        Ok(req) => self.start_session(req),
                        Err(e) => tracing::warn!("backfiller: bad request: {e}"),
                    }
                }
                bytes = cancels.recv() => {
                    let Some(bytes) = bytes else { return };
                    match wire::decode::<CancelBackfill>(&bytes) {
                        Ok(cancel) => self.cancel_session(cancel.session_id),
                        Err(e) => tracing::warn!("backfiller: bad cancel: {e}"),
                    }
                }
            }
        }
    }

    fn start_session(&self, req: BackfillRequestMessage<DummyRequest>) {
        let session_id = req.session_id;
        tracing::debug!("backfiller: session {session_id} requested");
        lock(&self.shared.stats).requests.push(session_id);

        let token = CancellationToken::new();
        lock(&self.shared.sessions).insert(session_id, token.clone());

        let chunks = self.source.chunks_for(&req.request.region);
        let ctx = SessionContext {
            cluster: self.cluster.clone(),
            shared: self.shared.clone(),
            paused: self.paused.clone(),
            options: self.options.clone(),
            session_id,
            chunk_mailbox: req.chunk_mailbox,
            done_mailbox: req.done_mailbox,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = ctx.serve(chunks) => {}
            }
            lock(&ctx.shared.sessions).remove(&session_id);
        });
    }

    fn cancel_session(&self, session_id: BackfillSessionId) {
        tracing::debug!("backfiller: session {session_id} cancelled by backfillee");
        lock(&self.shared.stats).cancels.push(session_id);
        if let Some(token) = lock(&self.shared.sessions).remove(&session_id) {
            token.cancel();
        }
    }
}

struct SessionContext<C: Cluster> {
    cluster: Arc<C>,
    shared: Arc<Shared>,
    paused: Signal,
    options: BackfillerOptions,
    session_id: BackfillSessionId,
    chunk_mailbox: MailboxAddr,
    done_mailbox: MailboxAddr,
}

impl<C: Cluster> SessionContext<C> {
    async fn serve(&self, chunks: Vec<DummyChunk>) {
        for (sent, chunk) in chunks.into_iter().enumerate() {
            if self.options.pause_after == Some(sent) {
                self.paused.pulse();
                std::future::pending::<()>().await;
            }
            if !self.options.chunk_delay.is_zero() {
                tokio::time::sleep(self.options.chunk_delay).await;
            }
            if let Err(e) = send_message(&*self.cluster, &self.chunk_mailbox, &chunk).await {
                tracing::debug!("backfiller: session {}: chunk send failed: {e}", self.session_id);
                return;
            }
            lock(&self.shared.stats).chunks_sent += 1;
        }
        if let Err(e) = send_message(&*self.cluster, &self.done_mailbox, &BackfillDone).await {
            tracing::debug!("backfiller: session {}: done send failed: {e}", self.session_id);
            return;
        }
        lock(&self.shared.stats).done_sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_algebra() {
        let a_m = Region::from_range('a', 'm');
        let all = Region::a_thru_z();
        assert_eq!(a_m.len(), 13);
        assert_eq!(all.len(), 26);
        assert!(all.is_superset(&a_m));
        assert!(!a_m.is_superset(&all));
        assert_eq!(all.intersection(&a_m), a_m);
        assert!(Region::empty().is_empty());
    }

    #[test]
    fn filled_store_serves_intersection_in_order() {
        let source = DummyStore::filled(Region::from_range('a', 'e'));
        let chunks = source.chunks_for(&Region::from_keys(["d", "b", "z"]));
        let keys: Vec<_> = chunks.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "d"]);
        assert_eq!(chunks[0].value, "value-b");
        assert_eq!(chunks[0].timestamp, 2);
    }

    #[tokio::test]
    async fn store_journals_contract_calls() {
        let mut store = DummyStore::new(Region::from_range('a', 'c'));
        let journal = store.journal();

        let req = store.begin_backfill();
        assert_eq!(req.region, Region::from_range('a', 'c'));
        store
            .backfill_chunk(DummyChunk {
                key: "b".into(),
                value: "v".into(),
                timestamp: 9,
            })
            .await;
        store.end_backfill();

        assert_eq!(
            journal.calls(),
            vec![
                StoreCall::BeginBackfill,
                StoreCall::BackfillChunk { key: "b".into() },
                StoreCall::EndBackfill,
            ]
        );
        assert_eq!(store.get("b"), Some("v"));
        assert_eq!(store.timestamp("b"), Some(9));
        assert!(!store.in_backfill());
    }

    #[tokio::test]
    async fn chunk_threshold_fires_once_reached() {
        let mut store = DummyStore::new(Region::from_range('a', 'e'));
        let journal = store.journal();
        let two = journal.on_chunks(2);
        assert!(journal.on_chunks(0).is_pulsed());

        store.begin_backfill();
        let mut pulsed = Vec::new();
        for key in ["a", "b", "c"] {
            store
                .backfill_chunk(DummyChunk {
                    key: key.into(),
                    value: "v".into(),
                    timestamp: 1,
                })
                .await;
            pulsed.push(two.is_pulsed());
        }
        assert_eq!(pulsed, vec![false, true, true]);
        assert!(journal.on_chunks(3).is_pulsed());
        assert!(!journal.on_chunks(4).is_pulsed());
        assert_eq!(lock(&journal.thresholds).len(), 1);
    }

    #[tokio::test]
    async fn dropped_backfiller_closes_its_mailboxes() {
        use crate::cluster::MemoryNetwork;
        use crate::error::TransportError;

        let net = MemoryNetwork::new();
        let client = net.join();
        let source = DummyStore::filled(Region::from_range('a', 'c'));
        let backfiller =
            DummyBackfiller::spawn(Arc::new(net.join()), &source, BackfillerOptions::default());
        let meta = backfiller.view().get().unwrap();

        drop(backfiller);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = client
            .send_raw(&meta.backfill_mailbox, vec![0])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MailboxClosed { .. }), "{err:?}");
    }

    #[test]
    fn cancel_without_chunks_is_accepted() {
        let mut store = DummyStore::new(Region::a_thru_z());
        store.begin_backfill();
        store.cancel_backfill();
        assert_eq!(store.journal().cancel_count(), 1);
    }

    #[test]
    #[should_panic(expected = "end_backfill without begin_backfill")]
    fn double_end_is_a_contract_violation() {
        let mut store = DummyStore::new(Region::a_thru_z());
        store.begin_backfill();
        store.end_backfill();
        store.end_backfill();
    }
}
