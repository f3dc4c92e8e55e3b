use futures::future::BoxFuture;
use tokio::sync::watch;
use uuid::Uuid;

use crate::dao::models::{PlayerEntity, RoomBundle, RoomCode, RoundEntity};
use crate::dao::storage::StorageResult;

/// Outcome of a transaction attempt that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The decide function produced writes and they were persisted.
    Committed,
    /// The decide function found its preconditions unmet; nothing was
    /// written. A non-error by design: callers may retry on a later change
    /// notification.
    Aborted,
}

/// Decision returned by a transaction's decide function.
#[derive(Debug, Clone)]
pub enum TxDecision {
    /// Preconditions unmet; write nothing.
    Abort,
    /// Replace the room bundle with this value, conditional on the snapshot
    /// still being current.
    Commit(Box<RoomBundle>),
}

/// Pure decision function evaluated against a snapshot of the room bundle.
///
/// The store re-reads the bundle, runs the function, and performs a
/// compare-and-update; a concurrent modification surfaces as
/// [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict)
/// so the caller's retry supervisor can re-run the whole sequence.
pub type TxFn = Box<dyn Fn(&RoomBundle) -> TxDecision + Send + Sync>;

/// Change-notification handle for one room: a watch receiver that always
/// holds the full current bundle and wakes on every mutation.
pub type RoomWatch = watch::Receiver<RoomBundle>;

/// Abstraction over the shared document store both participants coordinate
/// through. Implementations must provide point reads, full-document change
/// notifications, and an optimistic-concurrency transaction primitive.
pub trait RoomStore: Send + Sync {
    /// Create a fresh room bundle. Fails with `Conflict` when the code is
    /// already taken.
    fn create_room(&self, bundle: RoomBundle) -> BoxFuture<'static, StorageResult<()>>;

    /// Point-read the full bundle for a room.
    fn find_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Option<RoomBundle>>>;

    /// Point-read a single round record.
    fn find_round(
        &self,
        code: RoomCode,
        round: u8,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;

    /// Point-read a single player record.
    fn find_player(
        &self,
        code: RoomCode,
        uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// Run one read-verify-write transaction attempt against the room's
    /// bundle. `NotFound` when the room does not exist; `Conflict` when the
    /// compare-and-update lost a race.
    fn transact(
        &self,
        code: RoomCode,
        decide: TxFn,
    ) -> BoxFuture<'static, StorageResult<TxOutcome>>;

    /// Subscribe to the room's change notifications. The receiver is seeded
    /// with the current bundle and observes a monotonically advancing
    /// sequence of versions thereafter (intermediate versions may coalesce).
    fn watch_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomWatch>>;

    /// Cheap liveness probe against the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Attempt to re-establish a broken backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
