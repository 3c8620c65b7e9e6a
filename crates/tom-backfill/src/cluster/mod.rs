//! Message substrate used by the backfill protocol.
//!
//! Point-to-point addressed mailboxes plus per-peer disconnect signals.
//! Deployments implement `Cluster` over their node transport; `memory` is the
//! in-process implementation used by tests and the simulator.

pub mod memory;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{SendError, TransportError};
use crate::signal::Signal;
use crate::types::{MailboxAddr, PeerId};
use crate::wire;

pub use memory::{MemoryCluster, MemoryNetwork};

#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Our own identity.
    fn local_peer(&self) -> PeerId;

    /// Register a mailbox owned by this peer. Dropping the returned
    /// `Mailbox` closes the address.
    fn open_mailbox(&self, capacity: usize) -> Mailbox;

    /// Deliver bytes to a mailbox, waiting for capacity if it is full.
    async fn send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError>;

    /// Fire-and-forget delivery that never waits. Used from cleanup paths,
    /// which cannot suspend.
    fn try_send_raw(&self, dest: &MailboxAddr, data: Vec<u8>) -> Result<(), TransportError>;

    /// Signal pulsed once the connection to `peer` is lost. Already pulsed
    /// if we are not connected right now.
    fn watch_disconnect(&self, peer: PeerId) -> Signal;
}

/// Inbound end of a mailbox.
#[derive(Debug)]
pub struct Mailbox {
    addr: MailboxAddr,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Mailbox {
    pub fn new(addr: MailboxAddr, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { addr, rx }
    }

    /// The address peers send to.
    pub fn addr(&self) -> MailboxAddr {
        self.addr
    }

    /// Next payload, in arrival order. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

/// Encode `msg` and send it, waiting for mailbox capacity.
pub async fn send_message<C, T>(cluster: &C, dest: &MailboxAddr, msg: &T) -> Result<(), SendError>
where
    C: Cluster + ?Sized,
    T: Serialize + Sync,
{
    let bytes = wire::encode(msg)?;
    cluster.send_raw(dest, bytes).await?;
    Ok(())
}

/// Encode `msg` and send it without waiting.
pub fn try_send_message<C, T>(cluster: &C, dest: &MailboxAddr, msg: &T) -> Result<(), SendError>
where
    C: Cluster + ?Sized,
    T: Serialize,
{
    let bytes = wire::encode(msg)?;
    cluster.try_send_raw(dest, bytes)?;
    Ok(())
}
