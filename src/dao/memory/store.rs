use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::watch;
use uuid::Uuid;

use crate::dao::models::{PlayerEntity, RoomBundle, RoomCode, RoundEntity};
use crate::dao::room_store::{RoomStore, RoomWatch, TxDecision, TxFn, TxOutcome};
use crate::dao::storage::{StorageError, StorageResult};

/// One room's versioned bundle plus its change-notification channel.
struct RoomSlot {
    version: u64,
    bundle: RoomBundle,
    notify: watch::Sender<RoomBundle>,
}

/// In-memory [`RoomStore`] keyed by room code. Compare-and-update is a
/// version check under the slot lock; change notifications ride a watch
/// channel seeded with the current bundle.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<RoomCode, RoomSlot>>,
}

impl MemoryRoomStore {
    /// Fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, code: &RoomCode) -> StorageResult<(u64, RoomBundle)> {
        let slot = self
            .rooms
            .get(code)
            .ok_or_else(|| StorageError::not_found(code.as_str()))?;
        Ok((slot.version, slot.bundle.clone()))
    }

    fn commit(&self, code: &RoomCode, seen_version: u64, next: RoomBundle) -> StorageResult<()> {
        let mut slot = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| StorageError::not_found(code.as_str()))?;
        if slot.version != seen_version {
            return Err(StorageError::conflict(code.as_str()));
        }
        slot.version += 1;
        slot.bundle = next;
        let _ = slot.notify.send(slot.bundle.clone());
        Ok(())
    }
}

impl RoomStore for MemoryRoomStore {
    fn create_room(&self, bundle: RoomBundle) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let code = bundle.room.code.clone();
            use dashmap::mapref::entry::Entry;
            match store.rooms.entry(code.clone()) {
                Entry::Occupied(_) => Err(StorageError::conflict(code.as_str())),
                Entry::Vacant(slot) => {
                    let (notify, _rx) = watch::channel(bundle.clone());
                    slot.insert(RoomSlot {
                        version: 1,
                        bundle,
                        notify,
                    });
                    Ok(())
                }
            }
        })
    }

    fn find_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Option<RoomBundle>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.rooms.get(&code).map(|slot| slot.bundle.clone())) })
    }

    fn find_round(
        &self,
        code: RoomCode,
        round: u8,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .rooms
                .get(&code)
                .and_then(|slot| slot.bundle.rounds.get(&round).cloned()))
        })
    }

    fn find_player(
        &self,
        code: RoomCode,
        uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .rooms
                .get(&code)
                .and_then(|slot| slot.bundle.players.get(&uid).cloned()))
        })
    }

    fn transact(
        &self,
        code: RoomCode,
        decide: TxFn,
    ) -> BoxFuture<'static, StorageResult<TxOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            // Honest compare-and-update: the decide function runs against a
            // snapshot taken outside the slot lock, so a concurrent commit
            // between snapshot and write surfaces as a conflict.
            let (version, bundle) = store.snapshot(&code)?;
            match decide(&bundle) {
                TxDecision::Abort => Ok(TxOutcome::Aborted),
                TxDecision::Commit(next) => {
                    store.commit(&code, version, *next)?;
                    Ok(TxOutcome::Committed)
                }
            }
        })
    }

    fn watch_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomWatch>> {
        let store = self.clone();
        Box::pin(async move {
            let slot = store
                .rooms
                .get(&code)
                .ok_or_else(|| StorageError::not_found(code.as_str()))?;
            Ok(slot.notify.subscribe())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
