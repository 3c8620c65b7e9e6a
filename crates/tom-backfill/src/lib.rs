//! ToM backfill protocol.
//!
//! A backfillee replica asks a current backfiller for everything in its
//! region, applies the streamed chunks to its store and commits, or
//! unwinds cleanly when the backfiller disconnects, withdraws or the
//! caller cancels. Heartbeats and one-shot watchers supply the liveness
//! signals the session reacts to.
//!
//! Wire format: MessagePack (compact binary).

pub mod backfillee;
pub mod cluster;
pub mod config;
pub mod dummy;
pub mod error;
pub mod guard;
pub mod liveness;
pub mod metadata;
pub mod signal;
pub mod store;
pub mod types;
pub mod wire;

pub use backfillee::{run_backfill, Backfillee};
pub use cluster::{
    send_message, try_send_message, Cluster, Mailbox, MemoryCluster, MemoryNetwork,
};
pub use config::BackfillConfig;
pub use error::{BackfillError, DisruptionReason, SendError, TransportError, WireError};
pub use guard::CleanupGuard;
pub use liveness::{
    DeathWatcher, DisconnectWatcher, HeartbeatReceiver, HeartbeatSender, MailboxHeartbeat,
    OnHeartbeatTimeout, SendHeartbeat, SuspectOnTimeout,
};
pub use metadata::{publish, BackfillerMetadata, MetadataPublisher, MetadataView};
pub use signal::Signal;
pub use store::BackfillStore;
pub use types::{BackfillSessionId, MailboxAddr, Outcome, PeerId};
pub use wire::{BackfillDone, BackfillRequestMessage, CancelBackfill, Heartbeat};
