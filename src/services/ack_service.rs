//! Per-round acknowledgment handshake.
//!
//! Each participant confirms completion of the marking and award phases for
//! the current round with a single-field, monotonic patch: once true, an
//! acknowledgment is never un-set, and re-sending it is a safe no-op. The
//! host driver reacts to completed pairs via change notifications.

use std::time::Duration;

use crate::{
    dao::{
        models::{ROUNDS_PER_MATCH, RoomBundle},
        room_store::TxDecision,
    },
    error::ServiceError,
    services::{
        retry::{RetryPolicy, with_backoff},
        writers::ParticipantWriter,
    },
    state::room::AckKind,
};

/// Acknowledgments are single-field patches and must stay safe to retry;
/// compare-and-update collisions with the peer's unrelated writes are
/// absorbed here instead of surfacing to the client.
const PATCH_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_millis(50),
};

/// Acknowledge completion of the marking phase for `round`.
pub async fn set_marking_ack(writer: &ParticipantWriter, round: u8) -> Result<(), ServiceError> {
    acknowledge(writer, AckKind::Marking, round).await
}

/// Acknowledge the award screen for `round`.
pub async fn set_award_ack(writer: &ParticipantWriter, round: u8) -> Result<(), ServiceError> {
    acknowledge(writer, AckKind::Award, round).await
}

async fn acknowledge(
    writer: &ParticipantWriter,
    kind: AckKind,
    round: u8,
) -> Result<(), ServiceError> {
    if !(1..=ROUNDS_PER_MATCH).contains(&round) {
        return Err(ServiceError::InvalidInput(format!(
            "round must be 1-{ROUNDS_PER_MATCH}, got {round}"
        )));
    }

    let role = writer.role();
    let store = writer.store().clone();
    let code = writer.code().clone();

    // An aborted transaction means the flag was already set; both outcomes
    // are success for the caller.
    with_backoff("acknowledge", PATCH_RETRY, move || {
        let store = store.clone();
        let code = code.clone();
        async move {
            store
                .transact(
                    code,
                    Box::new(move |current: &RoomBundle| {
                        let map = match kind {
                            AckKind::Marking => current.room.marking_ack.get(role),
                            AckKind::Award => current.room.award_ack.get(role),
                        };
                        if map.get(&round).copied().unwrap_or(false) {
                            // Already acknowledged; the patch is monotonic.
                            return TxDecision::Abort;
                        }

                        let mut next = current.clone();
                        let map = match kind {
                            AckKind::Marking => next.room.marking_ack.get_mut(role),
                            AckKind::Award => next.room.award_ack.get_mut(role),
                        };
                        map.insert(round, true);
                        TxDecision::Commit(Box::new(next))
                    }),
                )
                .await
                .map_err(Into::into)
        }
    })
    .await?;

    Ok(())
}
