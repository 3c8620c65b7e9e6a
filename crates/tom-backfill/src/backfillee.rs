//! Backfillee side of a backfill session.
//!
//! Brings the local store up to date from a backfiller:
//! 1. Watch the backfiller: transport disconnect + metadata withdrawal
//! 2. `begin_backfill` on the store, guarded by `cancel_backfill`
//! 3. Open chunk + done mailboxes, send the handshake
//! 4. Arm a guard that tells the backfiller we gave up
//! 5. Apply chunks until done, disconnect, withdrawal or cancellation
//! 6. Commit (disarm both guards, `end_backfill`) or let the guards unwind
//!
//! Whatever the exit path, the store sees exactly one of `end_backfill` /
//! `cancel_backfill`, and the backfiller gets a cancel for every session
//! whose handshake it received but which did not commit.

use tokio_util::sync::CancellationToken;

use crate::cluster::{send_message, try_send_message, Cluster};
use crate::config::BackfillConfig;
use crate::error::{BackfillError, DisruptionReason, SendError};
use crate::guard::CleanupGuard;
use crate::liveness::{DeathWatcher, DisconnectWatcher};
use crate::metadata::{BackfillerMetadata, MetadataView};
use crate::signal::Signal;
use crate::store::BackfillStore;
use crate::types::BackfillSessionId;
use crate::wire::{self, BackfillDone, BackfillRequestMessage, CancelBackfill};

/// Drives one backfill session. Consumed by [`Backfillee::run`].
pub struct Backfillee<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    config: BackfillConfig,
    session_id: BackfillSessionId,
}

impl<'a, C: Cluster + ?Sized> Backfillee<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self::with_config(cluster, BackfillConfig::new())
    }

    pub fn with_config(cluster: &'a C, config: BackfillConfig) -> Self {
        Self {
            cluster,
            config,
            session_id: BackfillSessionId::new(),
        }
    }

    /// Id carried by every message of this session.
    pub fn session_id(&self) -> BackfillSessionId {
        self.session_id
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(())` once the store has been told `end_backfill`.
    /// Fails with `Cancelled` if `interruptor` fires (checked before any
    /// side effect), or `Disrupted` if the backfiller is lost.
    pub async fn run<S: BackfillStore>(
        self,
        store: &mut S,
        backfiller: &MetadataView<BackfillerMetadata>,
        interruptor: &CancellationToken,
    ) -> Result<(), BackfillError> {
        let session_id = self.session_id;
        let peer = backfiller.peer();
        let result = self.session(store, backfiller, interruptor).await;
        match &result {
            Ok(()) => tracing::info!("backfill {session_id} from {peer}: committed"),
            Err(e) => tracing::warn!("backfill {session_id} from {peer}: aborted: {e}"),
        }
        result
    }

    async fn session<S: BackfillStore>(
        &self,
        store: &mut S,
        backfiller: &MetadataView<BackfillerMetadata>,
        interruptor: &CancellationToken,
    ) -> Result<(), BackfillError> {
        if interruptor.is_cancelled() {
            return Err(BackfillError::Cancelled);
        }

        let session_id = self.session_id;
        let backfiller_is_offline = DeathWatcher::new(backfiller);
        let backfiller_has_died = DisconnectWatcher::new(self.cluster, backfiller.peer());

        // From here on we owe the store exactly one end or cancel.
        let request = store.begin_backfill();
        let mut store = CleanupGuard::new(store, |store: &mut S| store.cancel_backfill());

        let mut chunk_mailbox = self.cluster.open_mailbox(self.config.chunk_mailbox_capacity);
        let mut done_mailbox = self.cluster.open_mailbox(1);
        let backfill_is_done = Signal::new();

        // A withdrawn backfiller has no mailboxes to send to.
        if backfiller_is_offline.is_pulsed() {
            return Err(BackfillError::Disrupted(DisruptionReason::WentOffline));
        }
        let Some(metadata) = backfiller.get() else {
            return Err(BackfillError::Disrupted(DisruptionReason::WentOffline));
        };

        let handshake = BackfillRequestMessage {
            session_id,
            request,
            chunk_mailbox: chunk_mailbox.addr(),
            done_mailbox: done_mailbox.addr(),
        };
        let sent = tokio::select! {
            res = send_message(self.cluster, &metadata.backfill_mailbox, &handshake) => Some(res),
            _ = backfiller_has_died.wait() => None,
            _ = backfiller_is_offline.wait() => None,
            _ = interruptor.cancelled() => None,
        };
        match sent {
            Some(Ok(())) => {
                let to = metadata.backfill_mailbox;
                tracing::debug!("backfill {session_id}: handshake sent to {to}");
            }
            Some(Err(SendError::Wire(e))) => return Err(e.into()),
            Some(Err(SendError::Transport(e))) => {
                tracing::warn!("backfill {session_id}: handshake failed: {e}");
                return Err(BackfillError::Disrupted(DisruptionReason::LostContact));
            }
            None => {
                return Err(abort_reason(
                    backfiller_has_died.is_pulsed(),
                    backfiller_is_offline.is_pulsed(),
                    interruptor.is_cancelled(),
                )
                .unwrap_or(BackfillError::Disrupted(DisruptionReason::LostContact)));
            }
        }

        if backfiller_is_offline.is_pulsed() {
            return Err(BackfillError::Disrupted(DisruptionReason::WentOffline));
        }

        // Tell the backfiller we gave up, unless we reach the commit.
        let cluster = self.cluster;
        let cancel_mailbox = metadata.cancel_backfill_mailbox;
        let backfiller_notifier = CleanupGuard::on_exit(move |()| {
            match try_send_message(cluster, &cancel_mailbox, &CancelBackfill { session_id }) {
                Ok(()) => tracing::debug!("backfill {session_id}: cancel sent to {cancel_mailbox}"),
                Err(e) => {
                    tracing::warn!("backfill {session_id}: cancel to {cancel_mailbox} failed: {e}")
                }
            }
        });

        // Liveness first so a busy chunk stream cannot starve it; chunks
        // before done so everything already delivered is applied.
        let mut chunks_applied = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = backfiller_has_died.wait() => break,
                _ = backfiller_is_offline.wait() => break,
                _ = interruptor.cancelled() => break,
                bytes = chunk_mailbox.recv() => {
                    let Some(bytes) = bytes else {
                        return Err(BackfillError::Disrupted(DisruptionReason::LostContact));
                    };
                    let chunk = wire::decode::<S::Chunk>(&bytes).map_err(|e| {
                        tracing::warn!("backfill {session_id}: bad chunk: {e}");
                        BackfillError::Disrupted(DisruptionReason::MalformedMessage)
                    })?;
                    store.backfill_chunk(chunk).await;
                    chunks_applied += 1;
                }
                bytes = done_mailbox.recv() => {
                    let Some(bytes) = bytes else {
                        return Err(BackfillError::Disrupted(DisruptionReason::LostContact));
                    };
                    wire::decode::<BackfillDone>(&bytes).map_err(|e| {
                        tracing::warn!("backfill {session_id}: bad done message: {e}");
                        BackfillError::Disrupted(DisruptionReason::MalformedMessage)
                    })?;
                    backfill_is_done.pulse();
                    break;
                }
            }
        }

        resolve(
            backfiller_has_died.is_pulsed(),
            backfiller_is_offline.is_pulsed(),
            interruptor.is_cancelled(),
            backfill_is_done.is_pulsed(),
        )?;

        tracing::debug!("backfill {session_id}: done after {chunks_applied} chunks");
        backfiller_notifier.disarm();
        store.disarm().end_backfill();
        Ok(())
    }
}

/// Run one backfill session with the default config.
pub async fn run_backfill<S, C>(
    store: &mut S,
    cluster: &C,
    backfiller: &MetadataView<BackfillerMetadata>,
    interruptor: &CancellationToken,
) -> Result<(), BackfillError>
where
    S: BackfillStore,
    C: Cluster + ?Sized,
{
    Backfillee::new(cluster)
        .run(store, backfiller, interruptor)
        .await
}

/// First abort condition, in priority order: disconnect, withdrawal,
/// cancellation.
fn abort_reason(died: bool, offline: bool, cancelled: bool) -> Option<BackfillError> {
    if died {
        Some(BackfillError::Disrupted(DisruptionReason::LostContact))
    } else if offline {
        Some(BackfillError::Disrupted(DisruptionReason::WentOffline))
    } else if cancelled {
        Some(BackfillError::Cancelled)
    } else {
        None
    }
}

/// Outcome once the composite wait returns. Loss of the backfiller wins
/// over a completion that raced in.
fn resolve(died: bool, offline: bool, cancelled: bool, done: bool) -> Result<(), BackfillError> {
    if let Some(err) = abort_reason(died, offline, cancelled) {
        return Err(err);
    }
    debug_assert!(done, "composite wait returned with nothing set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn disconnect_beats_completion() {
        let err = resolve(true, false, false, true).unwrap_err();
        assert_eq!(err.disruption(), Some(DisruptionReason::LostContact));
    }

    #[test]
    fn withdrawal_beats_cancellation() {
        let err = resolve(false, true, true, true).unwrap_err();
        assert_eq!(err.disruption(), Some(DisruptionReason::WentOffline));
    }

    #[test]
    fn cancellation_beats_completion() {
        let err = resolve(false, false, true, true).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn completion_alone_commits() {
        assert!(resolve(false, false, false, true).is_ok());
    }

    proptest! {
        /// Only a clean completion with no abort condition commits, and
        /// the reported abort follows the fixed priority order.
        #[test]
        fn priority_order(died in any::<bool>(), offline in any::<bool>(), cancelled in any::<bool>()) {
            let result = resolve(died, offline, cancelled, true);
            prop_assert_eq!(result.is_ok(), !died && !offline && !cancelled);
            if let Err(err) = result {
                match err {
                    BackfillError::Disrupted(DisruptionReason::LostContact) => prop_assert!(died),
                    BackfillError::Disrupted(DisruptionReason::WentOffline) => prop_assert!(!died && offline),
                    BackfillError::Cancelled => prop_assert!(!died && !offline && cancelled),
                    other => prop_assert!(false, "unexpected {other:?}"),
                }
            }
        }
    }
}
