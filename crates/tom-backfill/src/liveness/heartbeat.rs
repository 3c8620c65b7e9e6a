/// Heartbeat sender and receiver.
///
/// The sender emits a ping every `interval` while armed. The receiver
/// raises a timeout once no ping has been noted for `timeout`, then stops
/// watching until re-armed. Both sit on `LivenessTimer`, so disarming
/// takes effect before the call returns.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::timer::LivenessTimer;
use crate::cluster::{try_send_message, Cluster};
use crate::signal::Signal;
use crate::types::MailboxAddr;
use crate::wire::Heartbeat;

/// Emits one heartbeat to the peer.
pub trait SendHeartbeat: Send + 'static {
    fn send_heartbeat(&mut self);
}

impl<F: FnMut() + Send + 'static> SendHeartbeat for F {
    fn send_heartbeat(&mut self) {
        self()
    }
}

/// Reacts to a missed heartbeat.
pub trait OnHeartbeatTimeout: Send + 'static {
    fn on_heartbeat_timeout(&mut self);
}

impl<F: FnMut() + Send + 'static> OnHeartbeatTimeout for F {
    fn on_heartbeat_timeout(&mut self) {
        self()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Sender ─────────────────────────────────────────────────────────────

/// Periodic heartbeat emitter, `Stopped` until started.
pub struct HeartbeatSender<E: SendHeartbeat> {
    interval: Duration,
    emitter: Arc<Mutex<E>>,
    timer: Option<LivenessTimer>,
}

impl<E: SendHeartbeat> HeartbeatSender<E> {
    pub fn new(interval: Duration, emitter: E) -> Self {
        Self {
            interval,
            emitter: Arc::new(Mutex::new(emitter)),
            timer: None,
        }
    }

    /// Arm the periodic timer. The first heartbeat goes out one interval
    /// from now. No-op if already sending.
    pub fn start_sending_heartbeats(&mut self) {
        if self.is_sending() {
            return;
        }
        let interval = self.interval;
        let emitter = self.emitter.clone();
        self.timer = Some(LivenessTimer::start(Instant::now() + interval, move |at| {
            lock(&emitter).send_heartbeat();
            Some(at + interval)
        }));
    }

    /// Disarm. No heartbeat is emitted after this returns.
    pub fn stop_sending_heartbeats(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    pub fn is_sending(&self) -> bool {
        self.timer.as_ref().is_some_and(LivenessTimer::is_armed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Sends a `Heartbeat` wire message to a peer's mailbox.
///
/// Fire-and-forget: a failed send is logged and the next tick tries again.
pub struct MailboxHeartbeat<C: Cluster> {
    cluster: Arc<C>,
    dest: MailboxAddr,
}

impl<C: Cluster> MailboxHeartbeat<C> {
    pub fn new(cluster: Arc<C>, dest: MailboxAddr) -> Self {
        Self { cluster, dest }
    }
}

impl<C: Cluster + 'static> SendHeartbeat for MailboxHeartbeat<C> {
    fn send_heartbeat(&mut self) {
        let msg = Heartbeat {
            from: self.cluster.local_peer(),
        };
        if let Err(e) = try_send_message(&*self.cluster, &self.dest, &msg) {
            tracing::debug!("heartbeat to {} failed: {e}", self.dest);
        }
    }
}

// ── Receiver ───────────────────────────────────────────────────────────

/// Watches for the absence of heartbeats.
pub struct HeartbeatReceiver<H: OnHeartbeatTimeout> {
    timeout: Duration,
    handler: Arc<Mutex<H>>,
    last_heartbeat: Arc<Mutex<Instant>>,
    timer: Option<LivenessTimer>,
}

impl<H: OnHeartbeatTimeout> HeartbeatReceiver<H> {
    pub fn new(timeout: Duration, handler: H) -> Self {
        Self {
            timeout,
            handler: Arc::new(Mutex::new(handler)),
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
            timer: None,
        }
    }

    /// Record a heartbeat, pushing the timeout back.
    pub fn note_heartbeat(&self) {
        *lock(&self.last_heartbeat) = Instant::now();
    }

    /// Start watching. The timeout is measured from now, or from the next
    /// heartbeat. Re-arms if already watching.
    pub fn watch_heartbeat(&mut self) {
        self.unwatch_heartbeat();
        self.note_heartbeat();

        let timeout = self.timeout;
        let handler = self.handler.clone();
        let last_heartbeat = self.last_heartbeat.clone();
        self.timer = Some(LivenessTimer::start(Instant::now() + timeout, move |_| {
            let due = *lock(&last_heartbeat) + timeout;
            if Instant::now() < due {
                return Some(due);
            }
            lock(&handler).on_heartbeat_timeout();
            None
        }));
    }

    /// Stop watching. Idempotent.
    pub fn unwatch_heartbeat(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    /// True while armed and not yet timed out.
    pub fn is_watching(&self) -> bool {
        self.timer.as_ref().is_some_and(LivenessTimer::is_armed)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Timeout handler that pulses a signal: the peer is suspected dead.
pub struct SuspectOnTimeout {
    suspected: Signal,
}

impl OnHeartbeatTimeout for SuspectOnTimeout {
    fn on_heartbeat_timeout(&mut self) {
        tracing::debug!("heartbeat timed out, peer suspected");
        self.suspected.pulse();
    }
}

impl HeartbeatReceiver<SuspectOnTimeout> {
    /// A receiver whose timeout pulses the returned signal.
    pub fn with_signal(timeout: Duration) -> (Self, Signal) {
        let suspected = Signal::new();
        let handler = SuspectOnTimeout {
            suspected: suspected.clone(),
        };
        (Self::new(timeout, handler), suspected)
    }
}
