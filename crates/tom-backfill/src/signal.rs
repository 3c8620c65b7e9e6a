/// Signal: one-shot, monotonic event.
///
/// Starts unset, can be pulsed once, never resets. Clones share state, so
/// one side can `pulse()` while another `wait()`s on it inside a
/// `tokio::select!`.
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that is already set.
    pub fn pulsed() -> Self {
        let signal = Self::new();
        signal.pulse();
        signal
    }

    /// Set the signal. Returns `true` if this call set it.
    pub fn pulse(&self) -> bool {
        self.tx.send_if_modified(|pulsed| {
            if *pulsed {
                false
            } else {
                *pulsed = true;
                true
            }
        })
    }

    /// Non-blocking point query.
    pub fn is_pulsed(&self) -> bool {
        *self.tx.borrow()
    }

    /// True when no other clone of this signal is alive.
    pub(crate) fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.tx) == 1
    }

    /// Resolve once the signal is set (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|pulsed| *pulsed).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("pulsed", &self.is_pulsed())
            .finish()
    }
}
