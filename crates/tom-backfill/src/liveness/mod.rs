//! Liveness detection for backfill and replication peers.
//!
//! Heartbeats for suspected-failure detection, plus one-shot watchers on
//! transport disconnects and withdrawn metadata.
pub mod heartbeat;
mod timer;
pub mod watcher;

pub use heartbeat::{
    HeartbeatReceiver, HeartbeatSender, MailboxHeartbeat, OnHeartbeatTimeout, SendHeartbeat,
    SuspectOnTimeout,
};
pub use watcher::{DeathWatcher, DisconnectWatcher};
