/// Scenario runner: one backfillee, one backfiller, one in-memory network.
///
/// The backfiller holds every key and the backfillee asks for all of them.
/// Fault scenarios pause the backfiller halfway through, inject the fault
/// once the backfillee has applied the first half, and check the session
/// ends the way the fault says it must.
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tom_backfill::dummy::{BackfillerOptions, DummyBackfiller, DummyStore, Region};
use tom_backfill::{
    wire, BackfillConfig, BackfillError, Backfillee, Cluster, DisruptionReason, Heartbeat,
    HeartbeatReceiver, HeartbeatSender, Mailbox, MailboxHeartbeat, MemoryNetwork, Outcome, Signal,
    SuspectOnTimeout,
};

use crate::report::SimReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// No fault: the session commits.
    Commit,
    /// Sever the link mid-transfer.
    Disconnect,
    /// Backfiller withdraws its metadata mid-transfer.
    Offline,
    /// Fire the interruptor mid-transfer.
    Cancel,
    /// Backfiller stops heartbeating mid-transfer.
    HeartbeatLoss,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Commit => "commit",
            Scenario::Disconnect => "disconnect",
            Scenario::Offline => "offline",
            Scenario::Cancel => "cancel",
            Scenario::HeartbeatLoss => "heartbeat-loss",
        }
    }

    fn expected(&self) -> Expected {
        match self {
            Scenario::Commit => Expected::Committed,
            Scenario::Disconnect => Expected::Disrupted(DisruptionReason::LostContact),
            Scenario::Offline => Expected::Disrupted(DisruptionReason::WentOffline),
            Scenario::Cancel | Scenario::HeartbeatLoss => Expected::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Committed,
    Disrupted(DisruptionReason),
    Cancelled,
}

impl Expected {
    fn matches(&self, result: &Result<(), BackfillError>) -> bool {
        match (self, result) {
            (Expected::Committed, Ok(())) => true,
            (Expected::Disrupted(reason), Err(e)) => e.disruption() == Some(*reason),
            (Expected::Cancelled, Err(e)) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Committed => f.write_str("committed"),
            Expected::Disrupted(reason) => write!(f, "aborted ({reason})"),
            Expected::Cancelled => f.write_str("aborted (cancelled)"),
        }
    }
}

pub struct SimParams {
    pub keys: usize,
    pub scenario: Scenario,
    pub chunk_delay: Duration,
    pub config: BackfillConfig,
}

pub async fn run(params: SimParams) -> anyhow::Result<SimReport> {
    let SimParams {
        keys,
        scenario,
        chunk_delay,
        config,
    } = params;
    let faulty = scenario != Scenario::Commit;
    if faulty && keys < 2 {
        bail!("scenario {} needs at least 2 keys", scenario.name());
    }
    let pause_after = faulty.then_some(keys / 2);

    let net = MemoryNetwork::new();
    let backfillee = Arc::new(net.join());
    let backfiller_node = Arc::new(net.join());

    let region = Region::from_keys((0..keys).map(|i| format!("k{i:06}")));
    let source = DummyStore::filled(region.clone());
    let mut backfiller = DummyBackfiller::spawn(
        backfiller_node.clone(),
        &source,
        BackfillerOptions {
            chunk_delay,
            pause_after,
        },
    );
    let view = backfiller.view();
    let paused = backfiller.paused();

    let mut store = DummyStore::new(region);
    let journal = store.journal();
    let half_applied = journal.on_chunks(keys / 2);
    let interruptor = CancellationToken::new();

    // Heartbeats flow backfiller -> backfillee for the whole session.
    let mut heartbeat_inbox = backfillee.open_mailbox(16);
    let mut sender = HeartbeatSender::new(
        config.heartbeat_interval,
        MailboxHeartbeat::new(backfiller_node.clone(), heartbeat_inbox.addr()),
    );
    let (mut receiver, suspected) = HeartbeatReceiver::with_signal(config.heartbeat_timeout);
    sender.start_sending_heartbeats();
    receiver.watch_heartbeat();

    let session = Backfillee::with_config(&*backfillee, config.clone());
    let session_id = session.session_id();
    tracing::info!("sim: scenario {} over {keys} keys, session {session_id}", scenario.name());

    let started = Instant::now();
    let finished = Signal::new();
    let run = async {
        let result = session.run(&mut store, &view, &interruptor).await;
        finished.pulse();
        result
    };
    let fault = async {
        if !faulty {
            return;
        }
        tokio::select! {
            _ = finished.wait() => {}
            _ = async {
                paused.wait().await;
                half_applied.wait().await;
                tracing::info!("sim: injecting {} after {} chunks", scenario.name(), keys / 2);
                match scenario {
                    Scenario::Commit => {}
                    Scenario::Disconnect => {
                        net.disconnect(backfillee.local_peer(), backfiller_node.local_peer())
                    }
                    Scenario::Offline => backfiller.withdraw(),
                    Scenario::Cancel => interruptor.cancel(),
                    Scenario::HeartbeatLoss => sender.stop_sending_heartbeats(),
                }
            } => {}
        }
    };
    let drive = async { tokio::join!(run, fault).0 };

    let result = tokio::select! {
        result = drive => result,
        res = keep_alive(&mut heartbeat_inbox, &receiver, &suspected, &interruptor) => {
            res?;
            bail!("heartbeat pump stopped");
        }
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    sender.stop_sending_heartbeats();
    receiver.unwatch_heartbeat();

    // Give a delivered cancel time to be processed.
    if result.is_err() {
        let deadline = Instant::now() + Duration::from_millis(200);
        while backfiller.stats().cancels.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let expected = scenario.expected();
    let matched = expected.matches(&result);
    if !matched {
        tracing::warn!("sim: expected {expected}, got {result:?}");
    }
    Ok(SimReport {
        event: "backfill_session",
        scenario: scenario.name().to_string(),
        session_id: session_id.to_string(),
        outcome: Outcome::of(&result).to_string(),
        error: result.as_ref().err().map(ToString::to_string),
        expected: expected.to_string(),
        matched,
        keys,
        chunks_applied: journal.chunk_count(),
        cancels_received: backfiller.stats().cancels.len(),
        elapsed_ms,
    })
}

/// Feed heartbeats into the receiver; cancel the session once the
/// backfiller is suspected. Only returns if the inbox closes.
async fn keep_alive(
    inbox: &mut Mailbox,
    receiver: &HeartbeatReceiver<SuspectOnTimeout>,
    suspected: &Signal,
    interruptor: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            bytes = inbox.recv() => {
                let Some(bytes) = bytes else { return Ok(()) };
                match wire::decode::<Heartbeat>(&bytes) {
                    Ok(hb) => {
                        tracing::trace!("sim: heartbeat from {}", hb.from);
                        receiver.note_heartbeat();
                    }
                    Err(e) => tracing::warn!("sim: bad heartbeat: {e}"),
                }
            }
            _ = suspected.wait(), if !interruptor.is_cancelled() => {
                tracing::warn!("sim: backfiller missed its heartbeats, cancelling session");
                interruptor.cancel();
            }
        }
    }
}
