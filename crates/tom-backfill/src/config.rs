use std::time::Duration;

/// Configuration for backfill sessions and heartbeats.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use tom_backfill::BackfillConfig;
///
/// let config = BackfillConfig::new()
///     .chunk_mailbox_capacity(128)
///     .heartbeat_interval(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Capacity of the inbound chunk mailbox. A full mailbox makes the
    /// backfiller wait before sending more.
    pub chunk_mailbox_capacity: usize,
    /// Period between two heartbeats sent to a peer.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is suspected dead.
    pub heartbeat_timeout: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackfillConfig {
    /// Create a new config with defaults.
    ///
    /// `TOM_BACKFILL_HEARTBEAT_MS` and `TOM_BACKFILL_HEARTBEAT_TIMEOUT_MS`
    /// override the heartbeat timings when set. Builder methods win over
    /// the environment.
    pub fn new() -> Self {
        let heartbeat_interval = env_millis("TOM_BACKFILL_HEARTBEAT_MS")
            .unwrap_or(Duration::from_secs(1));
        let heartbeat_timeout = env_millis("TOM_BACKFILL_HEARTBEAT_TIMEOUT_MS")
            .unwrap_or(Duration::from_secs(5));

        Self {
            chunk_mailbox_capacity: 64,
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    /// Set the inbound chunk mailbox capacity (default: 64).
    pub fn chunk_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.chunk_mailbox_capacity = capacity;
        self
    }

    /// Set the heartbeat period (default: 1 s).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat silence timeout (default: 5 s).
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_mailbox_capacity == 0 {
            return Err("chunk mailbox capacity must be non-zero".into());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat interval must be non-zero".into());
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(format!(
                "heartbeat timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.heartbeat_timeout, self.heartbeat_interval
            ));
        }
        Ok(())
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
