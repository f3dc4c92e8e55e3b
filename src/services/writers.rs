//! Typed per-role writer handles.
//!
//! The store itself cannot tell the two participants apart; the only
//! concurrency-control strategy in the system is the convention that the
//! host commits phase transitions while each side writes only its own
//! role-keyed sub-fields. These types make that convention a compile-time
//! property: transition and finalize entry points accept [`HostWriter`]
//! only, and a [`ParticipantWriter`] can only address its own role's side
//! of the document.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::{
        models::{Role, RoomCode},
        room_store::RoomStore,
    },
    error::ServiceError,
    state::{Claim, SharedState},
};

/// Write handle scoped to one participant of one room. Grants access to the
/// participant's own role-keyed fields only.
#[derive(Clone)]
pub struct ParticipantWriter {
    store: Arc<dyn RoomStore>,
    claim: Claim,
}

impl ParticipantWriter {
    /// Build a writer from a resolved claim.
    pub fn new(store: Arc<dyn RoomStore>, claim: Claim) -> Self {
        Self { store, claim }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Room this writer is scoped to.
    pub fn code(&self) -> &RoomCode {
        &self.claim.code
    }

    /// Role whose sub-fields this writer may mutate.
    pub fn role(&self) -> Role {
        self.claim.role
    }

    /// Participant identity.
    pub fn uid(&self) -> Uuid {
        self.claim.uid
    }
}

/// Write handle carrying the host's extra authority: committing phase
/// transitions and resolving the snippet race.
#[derive(Clone)]
pub struct HostWriter {
    inner: ParticipantWriter,
}

impl HostWriter {
    /// Build a host writer; rejects non-host claims.
    pub fn new(store: Arc<dyn RoomStore>, claim: Claim) -> Result<Self, ServiceError> {
        if claim.role != Role::Host {
            return Err(ServiceError::Unauthorized(
                "only the host may drive phase transitions".into(),
            ));
        }
        Ok(Self {
            inner: ParticipantWriter::new(store, claim),
        })
    }

    /// The participant-scoped view of this writer.
    pub fn participant(&self) -> &ParticipantWriter {
        &self.inner
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        self.inner.store()
    }

    /// Room this writer is scoped to.
    pub fn code(&self) -> &RoomCode {
        self.inner.code()
    }

    /// Host identity.
    pub fn uid(&self) -> Uuid {
        self.inner.uid()
    }
}

/// Resolve a participant token into a writer for its own role.
pub async fn participant_writer(
    state: &SharedState,
    token: &str,
    code: &RoomCode,
) -> Result<ParticipantWriter, ServiceError> {
    let claim = resolve_claim(state, token, code)?;
    let store = state.require_room_store().await?;
    Ok(ParticipantWriter::new(store, claim))
}

/// Resolve a participant token into a host writer; rejects guests.
pub async fn host_writer(
    state: &SharedState,
    token: &str,
    code: &RoomCode,
) -> Result<HostWriter, ServiceError> {
    let claim = resolve_claim(state, token, code)?;
    let store = state.require_room_store().await?;
    HostWriter::new(store, claim)
}

fn resolve_claim(
    state: &SharedState,
    token: &str,
    code: &RoomCode,
) -> Result<Claim, ServiceError> {
    let claim = state
        .claim_for(token)
        .ok_or_else(|| ServiceError::Unauthorized("unknown participant token".into()))?;
    if &claim.code != code {
        return Err(ServiceError::Unauthorized(
            "token does not belong to this room".into(),
        ));
    }
    Ok(claim)
}
