use serde::de::DeserializeOwned;
use serde::Serialize;

/// The local store a backfill writes into.
///
/// Contract: after `begin_backfill`, exactly one of `end_backfill` or
/// `cancel_backfill` follows. `cancel_backfill` must be accepted even if no
/// chunk was applied. The backfill driver honours this on every exit path;
/// violating it is a programming error, not a recoverable condition.
#[async_trait::async_trait]
pub trait BackfillStore: Send {
    /// What the store asks the backfiller for.
    type Request: Serialize + DeserializeOwned + Send + Sync;
    /// One unit of transferred data.
    type Chunk: Serialize + DeserializeOwned + Send;

    /// Enter backfill mode and describe the data needed.
    fn begin_backfill(&mut self) -> Self::Request;

    /// Apply one chunk. May wait if the store's write path is slow.
    async fn backfill_chunk(&mut self, chunk: Self::Chunk);

    /// Leave backfill mode, discarding the attempt.
    fn cancel_backfill(&mut self);

    /// Leave backfill mode, keeping everything applied.
    fn end_backfill(&mut self);
}
