//! Host-only phase transitions outside the finalizer.
//!
//! Every transition is one store transaction whose precondition is the
//! expected current phase, derived from the legal phase graph. Duplicate or
//! racing trigger invocations therefore abort instead of re-flipping; timer
//! expiry is advisory and the store stays the final arbiter.

use crate::{
    dao::models::{CountdownEntity, Phase, RoomBundle},
    dao::room_store::{TxDecision, TxOutcome},
    error::ServiceError,
    services::writers::HostWriter,
    state::{
        phase::{RoomEvent, compute_transition},
        room::{AckKind, answers_complete, both_acked, content_ready},
    },
};

/// Commit countdown -> questions once the deadline passed on the caller's
/// clock, deferring while the round's content is incomplete.
///
/// Returns `Aborted` when the flip is deferred (missing content) or already
/// happened; the driver re-evaluates on the next change notification.
pub async fn advance_to_questions(host: &HostWriter) -> Result<TxOutcome, ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(|current: &RoomBundle| {
                let room = &current.room;
                let Ok(step) =
                    compute_transition(room.state, room.round, RoomEvent::CountdownElapsed)
                else {
                    return TxDecision::Abort;
                };
                // Never flip into an empty questions phase: wait for the
                // round record to carry its three items per side.
                let ready = current
                    .rounds
                    .get(&room.round)
                    .is_some_and(content_ready);
                if !ready {
                    return TxDecision::Abort;
                }

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await
        .map_err(Into::into)
}

/// Commit questions -> marking once both sides' answer lists are complete.
pub async fn begin_marking(host: &HostWriter) -> Result<TxOutcome, ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(|current: &RoomBundle| {
                let room = &current.room;
                let Ok(step) =
                    compute_transition(room.state, room.round, RoomEvent::AnswersComplete)
                else {
                    return TxDecision::Abort;
                };
                if !answers_complete(room, room.round) {
                    return TxDecision::Abort;
                }

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await
        .map_err(Into::into)
}

/// Commit the award exit once both award acknowledgments are present:
/// award -> countdown(round+1) with a freshly armed deadline, or
/// award -> maths after the final round.
pub async fn advance_round(
    host: &HostWriter,
    now_ms: i64,
    countdown_lead_ms: i64,
) -> Result<TxOutcome, ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(move |current: &RoomBundle| {
                let room = &current.room;
                if room.state != Phase::Award || !both_acked(room, AckKind::Award, room.round) {
                    return TxDecision::Abort;
                }

                // Round 5 leaves the cycle; earlier rounds re-enter it with
                // the next countdown armed atomically.
                let advanced = compute_transition(room.state, room.round, RoomEvent::RoundAdvanced);
                let (step, countdown) = match advanced {
                    Ok(step) => (
                        step,
                        Some(CountdownEntity {
                            start_at: now_ms + countdown_lead_ms,
                        }),
                    ),
                    Err(_) => {
                        let Ok(step) =
                            compute_transition(room.state, room.round, RoomEvent::MathsStarted)
                        else {
                            return TxDecision::Abort;
                        };
                        (step, None)
                    }
                };

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                next.room.countdown = countdown;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await
        .map_err(Into::into)
}

/// Commit maths -> final on the host's request.
pub async fn complete_maths(host: &HostWriter) -> Result<TxOutcome, ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(|current: &RoomBundle| {
                let room = &current.room;
                let Ok(step) =
                    compute_transition(room.state, room.round, RoomEvent::MathsCompleted)
                else {
                    return TxDecision::Abort;
                };

                let mut next = current.clone();
                next.room.state = step.phase;
                next.room.round = step.round;
                TxDecision::Commit(Box::new(next))
            }),
        )
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;
    use crate::dao::memory::MemoryRoomStore;
    use crate::dao::models::{
        AnswerEntity, QuestionItemEntity, Role, RoomCode, RoomEntity, RoomMeta, RoundEntity,
        ScoresEntity,
    };
    use crate::dao::room_store::RoomStore;
    use crate::state::Claim;

    fn item() -> QuestionItemEntity {
        QuestionItemEntity {
            prompt: "p".into(),
            choices: vec![],
            answer: "a".into(),
        }
    }

    fn answers() -> Vec<AnswerEntity> {
        (0..3)
            .map(|n| AnswerEntity {
                question: format!("q{n}"),
                chosen: "x".into(),
                correct: "x".into(),
            })
            .collect()
    }

    struct Fixture {
        store: Arc<dyn RoomStore>,
        code: RoomCode,
        host: HostWriter,
    }

    async fn fixture(mutate: impl FnOnce(&mut RoomBundle)) -> Fixture {
        let host_uid = Uuid::new_v4();
        let code = RoomCode::parse("QD12").unwrap();
        let mut rounds = BTreeMap::new();
        for round in 1..=5u8 {
            rounds.insert(round, RoundEntity::seeded(round, vec![item(); 3], vec![item(); 3]));
        }
        let mut bundle = RoomBundle {
            room: RoomEntity {
                code: code.clone(),
                state: Phase::Countdown,
                round: 1,
                meta: RoomMeta {
                    host_uid,
                    guest_uid: Some(Uuid::new_v4()),
                    created_at: SystemTime::now(),
                },
                countdown: Some(CountdownEntity { start_at: 1_000 }),
                answers: Default::default(),
                marking: Default::default(),
                marking_ack: Default::default(),
                award_ack: Default::default(),
                scores: ScoresEntity::default(),
            },
            rounds,
            players: BTreeMap::new(),
        };
        mutate(&mut bundle);

        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        store.create_room(bundle).await.unwrap();
        let host = HostWriter::new(
            store.clone(),
            Claim {
                code: code.clone(),
                role: Role::Host,
                uid: host_uid,
            },
        )
        .unwrap();
        Fixture { store, code, host }
    }

    async fn current_room(fixture: &Fixture) -> RoomEntity {
        fixture
            .store
            .find_room(fixture.code.clone())
            .await
            .unwrap()
            .unwrap()
            .room
    }

    #[tokio::test]
    async fn countdown_flips_to_questions_when_content_ready() {
        let fixture = fixture(|_| {}).await;
        let outcome = advance_to_questions(&fixture.host).await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed);

        let room = current_room(&fixture).await;
        assert_eq!(room.state, Phase::Questions);
        // The countdown stays armed: it is the round's timing baseline.
        assert!(room.countdown.is_some());
    }

    #[tokio::test]
    async fn countdown_defers_without_round_content() {
        let fixture = fixture(|bundle| {
            bundle.rounds.get_mut(&1).unwrap().guest_items.pop();
        })
        .await;

        let outcome = advance_to_questions(&fixture.host).await.unwrap();
        assert_eq!(outcome, TxOutcome::Aborted);
        assert_eq!(current_room(&fixture).await.state, Phase::Countdown);
    }

    #[tokio::test]
    async fn duplicate_flip_is_a_no_op() {
        let fixture = fixture(|_| {}).await;
        assert_eq!(
            advance_to_questions(&fixture.host).await.unwrap(),
            TxOutcome::Committed
        );
        assert_eq!(
            advance_to_questions(&fixture.host).await.unwrap(),
            TxOutcome::Aborted
        );
        assert_eq!(current_room(&fixture).await.state, Phase::Questions);
    }

    #[tokio::test]
    async fn marking_begins_once_both_answer_lists_present() {
        let partial = fixture(|bundle| {
            bundle.room.state = Phase::Questions;
            bundle.room.answers.host.insert(1, answers());
        })
        .await;

        assert_eq!(
            begin_marking(&partial.host).await.unwrap(),
            TxOutcome::Aborted
        );

        let fixture = fixture(|bundle| {
            bundle.room.state = Phase::Questions;
            bundle.room.answers.host.insert(1, answers());
            bundle.room.answers.guest.insert(1, answers());
        })
        .await;
        assert_eq!(
            begin_marking(&fixture.host).await.unwrap(),
            TxOutcome::Committed
        );
        assert_eq!(current_room(&fixture).await.state, Phase::Marking);
    }

    #[tokio::test]
    async fn award_round_three_advances_to_countdown_round_four() {
        let fixture = fixture(|bundle| {
            bundle.room.state = Phase::Award;
            bundle.room.round = 3;
            bundle.room.countdown = None;
            bundle.room.award_ack.host.insert(3, true);
            bundle.room.award_ack.guest.insert(3, true);
        })
        .await;

        let outcome = advance_round(&fixture.host, 50_000, 5_000).await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed);

        let room = current_room(&fixture).await;
        assert_eq!(room.state, Phase::Countdown);
        assert_eq!(room.round, 4);
        assert_eq!(room.countdown.unwrap().start_at, 55_000);
    }

    #[tokio::test]
    async fn award_round_five_advances_to_maths() {
        let fixture = fixture(|bundle| {
            bundle.room.state = Phase::Award;
            bundle.room.round = 5;
            bundle.room.countdown = None;
            bundle.room.award_ack.host.insert(5, true);
            bundle.room.award_ack.guest.insert(5, true);
        })
        .await;

        let outcome = advance_round(&fixture.host, 50_000, 5_000).await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed);

        let room = current_room(&fixture).await;
        assert_eq!(room.state, Phase::Maths);
        assert_eq!(room.round, 5);
        assert!(room.countdown.is_none());
    }

    #[tokio::test]
    async fn award_waits_for_both_acknowledgments() {
        let fixture = fixture(|bundle| {
            bundle.room.state = Phase::Award;
            bundle.room.round = 2;
            bundle.room.award_ack.host.insert(2, true);
        })
        .await;

        assert_eq!(
            advance_round(&fixture.host, 50_000, 5_000).await.unwrap(),
            TxOutcome::Aborted
        );
        assert_eq!(current_room(&fixture).await.state, Phase::Award);
    }

    #[tokio::test]
    async fn maths_completes_to_final() {
        let fixture = fixture(|bundle| {
            bundle.room.state = Phase::Maths;
            bundle.room.round = 5;
            bundle.room.countdown = None;
        })
        .await;

        assert_eq!(
            complete_maths(&fixture.host).await.unwrap(),
            TxOutcome::Committed
        );
        assert_eq!(current_room(&fixture).await.state, Phase::Final);
    }
}
