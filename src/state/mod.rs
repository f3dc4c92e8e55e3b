pub mod phase;
pub mod room;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{Role, RoomCode},
        room_store::RoomStore,
    },
    error::ServiceError,
};

/// Cheaply clonable handle to the central application state.
pub type SharedState = Arc<AppState>;

/// Resolution of a participant token: which room, which role, which uid.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Room the participant belongs to.
    pub code: RoomCode,
    /// Role the participant holds.
    pub role: Role,
    /// Participant identity.
    pub uid: Uuid,
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Central application state storing the installed store backend, the
/// participant session registry, and per-room driver task handles. All
/// session state hangs off this context object; there are no module-level
/// mutable caches.
pub struct AppState {
    config: AppConfig,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    sessions: DashMap<String, Claim>,
    drivers: DashMap<RoomCode, JoinHandle<()>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            room_store: RwLock::new(None),
            degraded: degraded_tx,
            sessions: DashMap::new(),
            drivers: DashMap::new(),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the current room store or fail with the degraded-mode error.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.room_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub(crate) async fn update_degraded(&self, value: bool) {
        if *self.degraded.borrow() == value {
            return;
        }

        let _ = self.degraded.send(value);
    }

    /// Register a participant claim, returning the opaque token that
    /// authenticates subsequent writes.
    pub fn register_session(&self, claim: Claim) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), claim);
        token
    }

    /// Resolve a participant token back into its claim.
    pub fn claim_for(&self, token: &str) -> Option<Claim> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    /// True when a live driver task is registered for the room.
    pub fn driver_running(&self, code: &RoomCode) -> bool {
        self.drivers
            .get(code)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Record the driver task for a room, replacing any finished handle.
    pub fn register_driver(&self, code: RoomCode, handle: JoinHandle<()>) {
        self.drivers.insert(code, handle);
    }
}
