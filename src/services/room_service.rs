use std::collections::BTreeMap;
use std::time::SystemTime;

use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{
        CountdownEntity, ITEMS_PER_ROUND, Phase, ROUNDS_PER_MATCH, Role, RoomBundle, RoomCode,
        RoomEntity, RoomMeta, RoundEntity, ScoresEntity,
    },
    dao::room_store::{TxDecision, TxOutcome},
    dao::storage::StorageError,
    dto::room::{CreateRoomRequest, JoinedRoom, RoomCreated, RoomView},
    error::ServiceError,
    services::{driver, writers::HostWriter},
    state::{Claim, SharedState, now_ms, phase, room},
};

/// Characters used for generated room codes; visually ambiguous glyphs are
/// left out.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
/// Length of generated room codes.
const ROOM_CODE_LENGTH: usize = 4;
/// Generation attempts before giving up on a free code.
const ROOM_CODE_ATTEMPTS: usize = 4;

/// Bootstrap a fresh room seeded with five rounds of content and register
/// the host's session.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomCreated, ServiceError> {
    let store = state.require_room_store().await?;
    let (rounds, chosen_code) = build_seed_rounds(request)?;

    let host_uid = Uuid::new_v4();

    let mut attempt = 0;
    let code = loop {
        let code = match &chosen_code {
            Some(code) => code.clone(),
            None => generate_room_code(),
        };

        let bundle = RoomBundle {
            room: RoomEntity {
                code: code.clone(),
                state: Phase::Lobby,
                round: 1,
                meta: RoomMeta {
                    host_uid,
                    guest_uid: None,
                    created_at: SystemTime::now(),
                },
                countdown: None,
                answers: Default::default(),
                marking: Default::default(),
                marking_ack: Default::default(),
                award_ack: Default::default(),
                scores: ScoresEntity::default(),
            },
            rounds: rounds.clone(),
            players: BTreeMap::new(),
        };

        match store.create_room(bundle).await {
            Ok(()) => break code,
            Err(StorageError::Conflict { .. }) if chosen_code.is_some() => {
                return Err(ServiceError::InvalidState(format!(
                    "room code `{code}` is already in use"
                )));
            }
            Err(StorageError::Conflict { .. }) if attempt + 1 < ROOM_CODE_ATTEMPTS => {
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    let token = state.register_session(Claim {
        code: code.clone(),
        role: Role::Host,
        uid: host_uid,
    });

    driver::ensure_driver(state, &code).await?;
    info!(room = %code, "room created");

    Ok(RoomCreated {
        code: code.to_string(),
        host_uid,
        token,
    })
}

/// Join an existing room as the guest, committing the lobby -> keyroom
/// transition and registering the guest's session.
pub async fn join_room(state: &SharedState, code: &RoomCode) -> Result<JoinedRoom, ServiceError> {
    let store = state.require_room_store().await?;
    let guest_uid = Uuid::new_v4();

    let outcome = store
        .transact(
            code.clone(),
            Box::new(move |current: &RoomBundle| {
                if current.room.state != Phase::Lobby || current.room.meta.guest_uid.is_some() {
                    return TxDecision::Abort;
                }
                let Ok(step) = phase::compute_transition(
                    current.room.state,
                    current.room.round,
                    phase::RoomEvent::GuestJoined,
                ) else {
                    return TxDecision::Abort;
                };

                let mut next = current.clone();
                next.room.meta.guest_uid = Some(guest_uid);
                next.room.state = step.phase;
                next.room.round = step.round;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await?;

    if outcome == TxOutcome::Aborted {
        let taken = store
            .find_room(code.clone())
            .await?
            .is_some_and(|bundle| bundle.room.meta.guest_uid.is_some());
        let reason = if taken {
            "room already has a guest"
        } else {
            "room is not in the lobby"
        };
        return Err(ServiceError::InvalidState(reason.into()));
    }

    let token = state.register_session(Claim {
        code: code.clone(),
        role: Role::Guest,
        uid: guest_uid,
    });

    driver::ensure_driver(state, code).await?;
    info!(room = %code, "guest joined");

    Ok(JoinedRoom {
        code: code.to_string(),
        guest_uid,
        token,
    })
}

/// Host confirmation that the content pack is unsealed; commits
/// keyroom -> coderoom. Re-invocation after the flip is a no-op.
pub async fn confirm_unsealed(host: &HostWriter) -> Result<(), ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(|current: &RoomBundle| {
                let Ok(step) = phase::compute_transition(
                    current.room.state,
                    current.room.round,
                    phase::RoomEvent::PackUnsealed,
                ) else {
                    return TxDecision::Abort;
                };

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await?;
    Ok(())
}

/// Host starts the match: commits coderoom -> countdown and arms round 1's
/// countdown in the same transaction.
pub async fn start_match(state: &SharedState, host: &HostWriter) -> Result<(), ServiceError> {
    let lead_ms = state.config().countdown_lead_ms;
    let deadline = now_ms() + lead_ms;

    host.store()
        .transact(
            host.code().clone(),
            Box::new(move |current: &RoomBundle| {
                let Ok(step) = phase::compute_transition(
                    current.room.state,
                    current.room.round,
                    phase::RoomEvent::MatchStarted,
                ) else {
                    return TxDecision::Abort;
                };

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                next.room.countdown = Some(CountdownEntity { start_at: deadline });
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await?;

    driver::ensure_driver(state, host.code()).await?;
    Ok(())
}

/// Point-read a room and project it for the wire, resolving the navigation
/// hint when a participant token is supplied.
pub async fn room_view(
    state: &SharedState,
    code: &RoomCode,
    token: Option<&str>,
) -> Result<RoomView, ServiceError> {
    let store = state.require_room_store().await?;
    let bundle = store
        .find_room(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{code}` not found")))?;

    let role = token
        .and_then(|token| state.claim_for(token))
        .filter(|claim| &claim.code == code)
        .and_then(|claim| room::role_of(&bundle.room, claim.uid));

    Ok(RoomView::from_bundle(&bundle, role))
}

/// Validate and convert the seed input into round records; returns the
/// optional caller-chosen code alongside.
fn build_seed_rounds(
    request: CreateRoomRequest,
) -> Result<(BTreeMap<u8, RoundEntity>, Option<RoomCode>), ServiceError> {
    let CreateRoomRequest { code, rounds } = request;

    let code = code
        .map(|code| {
            RoomCode::parse(&code)
                .map_err(|err| ServiceError::InvalidInput(err.to_string()))
        })
        .transpose()?;

    if rounds.len() != ROUNDS_PER_MATCH as usize {
        return Err(ServiceError::InvalidInput(format!(
            "a match requires exactly {ROUNDS_PER_MATCH} seeded rounds, got {}",
            rounds.len()
        )));
    }

    let mut seeded = BTreeMap::new();
    for (index, seed) in rounds.into_iter().enumerate() {
        let round = index as u8 + 1;
        if seed.host_items.len() != ITEMS_PER_ROUND || seed.guest_items.len() != ITEMS_PER_ROUND {
            return Err(ServiceError::InvalidInput(format!(
                "round {round} must carry exactly {ITEMS_PER_ROUND} items per side"
            )));
        }
        seeded.insert(
            round,
            RoundEntity::seeded(
                round,
                seed.host_items.into_iter().map(Into::into).collect(),
                seed.guest_items.into_iter().map(Into::into).collect(),
            ),
        );
    }

    Ok((seeded, code))
}

fn generate_room_code() -> RoomCode {
    let mut rng = rand::rng();
    let raw: String = (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    RoomCode::parse(&raw).expect("generated codes are always canonical")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryRoomStore;
    use crate::dto::room::{QuestionItemInput, RoundSeedInput};
    use crate::state::AppState;

    fn seed_request(code: Option<&str>) -> CreateRoomRequest {
        let item = |n: u8| QuestionItemInput {
            prompt: format!("question {n}"),
            choices: vec![],
            answer: format!("answer {n}"),
        };
        CreateRoomRequest {
            code: code.map(Into::into),
            rounds: (0..5)
                .map(|_| RoundSeedInput {
                    host_items: vec![item(1), item(2), item(3)],
                    guest_items: vec![item(4), item(5), item(6)],
                })
                .collect(),
        }
    }

    async fn app_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state
            .install_room_store(Arc::new(MemoryRoomStore::new()))
            .await;
        state
    }

    #[tokio::test]
    async fn create_room_seeds_five_rounds() {
        let state = app_state().await;
        let created = create_room(&state, seed_request(Some("QD12"))).await.unwrap();
        assert_eq!(created.code, "QD12");

        let store = state.room_store().await.unwrap();
        let bundle = store
            .find_room(RoomCode::parse("QD12").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bundle.room.state, Phase::Lobby);
        assert_eq!(bundle.rounds.len(), 5);
        assert!(bundle.rounds.values().all(|r| r.host_items.len() == 3));
    }

    #[tokio::test]
    async fn create_room_rejects_taken_code() {
        let state = app_state().await;
        create_room(&state, seed_request(Some("QD12"))).await.unwrap();
        let err = create_room(&state, seed_request(Some("QD12")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn create_room_rejects_short_seed() {
        let state = app_state().await;
        let mut request = seed_request(None);
        request.rounds.pop();
        let err = create_room(&state, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn join_transitions_lobby_to_keyroom() {
        let state = app_state().await;
        create_room(&state, seed_request(Some("QD12"))).await.unwrap();
        let code = RoomCode::parse("QD12").unwrap();

        let joined = join_room(&state, &code).await.unwrap();

        let store = state.room_store().await.unwrap();
        let bundle = store.find_room(code).await.unwrap().unwrap();
        assert_eq!(bundle.room.state, Phase::Keyroom);
        assert_eq!(bundle.room.meta.guest_uid, Some(joined.guest_uid));
    }

    #[tokio::test]
    async fn second_join_is_rejected() {
        let state = app_state().await;
        create_room(&state, seed_request(Some("QD12"))).await.unwrap();
        let code = RoomCode::parse("QD12").unwrap();

        join_room(&state, &code).await.unwrap();
        let err = join_room(&state, &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unseal_then_start_arms_round_one() {
        let state = app_state().await;
        let created = create_room(&state, seed_request(Some("QD12"))).await.unwrap();
        let code = RoomCode::parse("QD12").unwrap();
        join_room(&state, &code).await.unwrap();

        let host = crate::services::writers::host_writer(&state, &created.token, &code)
            .await
            .unwrap();
        confirm_unsealed(&host).await.unwrap();
        // A duplicate confirmation is a safe no-op.
        confirm_unsealed(&host).await.unwrap();
        start_match(&state, &host).await.unwrap();

        let store = state.room_store().await.unwrap();
        let bundle = store.find_room(code).await.unwrap().unwrap();
        assert_eq!(bundle.room.state, Phase::Countdown);
        assert_eq!(bundle.room.round, 1);
        assert!(bundle.room.countdown.is_some());
    }

    #[tokio::test]
    async fn generated_codes_are_canonical() {
        for _ in 0..32 {
            let code = generate_room_code();
            assert!(RoomCode::parse(code.as_str()).is_ok());
        }
    }
}
