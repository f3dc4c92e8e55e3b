//! Per-room host driver.
//!
//! The phase transition driver reacts to the room's change notifications
//! exactly like a subscribed client would: on every notification (and on
//! countdown expiry) it evaluates whether a host-authorized step is due and
//! executes it through the transition and finalizer services. The task
//! holds its watch subscription for the life of the room and drops it when
//! the room reaches the final phase.

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::models::{Phase, Role, RoomBundle, RoomCode},
    error::ServiceError,
    services::{
        finalize_service, retry::RetryPolicy, transition_service, writers::HostWriter,
    },
    state::{
        Claim, SharedState, now_ms,
        room::{AckKind, answers_complete, both_acked, content_ready},
    },
};

/// Slack added after a countdown deadline before the timer wakes the
/// driver, absorbing clock granularity.
const TIMER_SLACK_MS: u64 = 25;

/// Host-authorized step the driver decided to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    /// Countdown elapsed with content ready: flip into questions.
    AdvanceToQuestions,
    /// Both answer lists present: flip into marking.
    BeginMarking,
    /// Both marking acknowledgments present: resolve the snippet race.
    FinalizeRace,
    /// Both award acknowledgments present: advance the round or enter maths.
    AdvanceRound,
}

/// Decide the next host step for a room snapshot, if any.
///
/// Pure so the trigger rules are testable in isolation: the countdown timer
/// is advisory (`now_ms` comparison only) and every rule here is
/// re-verified by the corresponding transaction's precondition.
pub fn plan_action(bundle: &RoomBundle, now_ms: i64) -> Option<DriverAction> {
    let room = &bundle.room;
    match room.state {
        Phase::Countdown => {
            let deadline = room.countdown?.start_at;
            let ready = bundle.rounds.get(&room.round).is_some_and(content_ready);
            (now_ms >= deadline && ready).then_some(DriverAction::AdvanceToQuestions)
        }
        Phase::Questions => {
            answers_complete(room, room.round).then_some(DriverAction::BeginMarking)
        }
        Phase::Marking => {
            both_acked(room, AckKind::Marking, room.round).then_some(DriverAction::FinalizeRace)
        }
        Phase::Award => {
            both_acked(room, AckKind::Award, room.round).then_some(DriverAction::AdvanceRound)
        }
        _ => None,
    }
}

/// Duration until the next countdown deadline, when one is armed and still
/// in the future.
fn timer_wait(bundle: &RoomBundle, now_ms: i64) -> Option<Duration> {
    if bundle.room.state != Phase::Countdown {
        return None;
    }
    let deadline = bundle.room.countdown?.start_at;
    let remaining = deadline - now_ms;
    (remaining > 0).then(|| Duration::from_millis(remaining as u64 + TIMER_SLACK_MS))
}

/// Spawn the driver task for a room unless one is already running.
pub async fn ensure_driver(state: &SharedState, code: &RoomCode) -> Result<(), ServiceError> {
    if state.driver_running(code) {
        return Ok(());
    }

    let store = state.require_room_store().await?;
    let bundle = store
        .find_room(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("room `{code}` not found")))?;

    let host = HostWriter::new(
        store,
        Claim {
            code: code.clone(),
            role: Role::Host,
            uid: bundle.room.meta.host_uid,
        },
    )?;

    let handle = tokio::spawn(run(state.clone(), code.clone(), host));
    state.register_driver(code.clone(), handle);
    Ok(())
}

/// Drive one room until it reaches the final phase or its change feed
/// closes.
async fn run(state: SharedState, code: RoomCode, host: HostWriter) {
    let store = match state.require_room_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(room = %code, error = %err, "driver could not obtain a store");
            return;
        }
    };
    let mut watch = match store.watch_room(code.clone()).await {
        Ok(watch) => watch,
        Err(err) => {
            warn!(room = %code, error = %err, "driver could not subscribe to room changes");
            return;
        }
    };

    let policy = RetryPolicy::from_config(state.config());
    let tie_threshold_ms = state.config().tie_threshold_ms;
    let countdown_lead_ms = state.config().countdown_lead_ms;
    info!(room = %code, "driver started");

    loop {
        let bundle = watch.borrow_and_update().clone();

        if bundle.room.state == Phase::Final {
            info!(room = %code, "room finished; driver stopping");
            return;
        }

        if let Some(action) = plan_action(&bundle, now_ms()) {
            debug!(room = %code, ?action, "executing host step");
            let result = match action {
                DriverAction::AdvanceToQuestions => {
                    transition_service::advance_to_questions(&host).await
                }
                DriverAction::BeginMarking => transition_service::begin_marking(&host).await,
                DriverAction::FinalizeRace => {
                    finalize_service::finalize_race_with_retry(&host, tie_threshold_ms, policy)
                        .await
                }
                DriverAction::AdvanceRound => {
                    transition_service::advance_round(&host, now_ms(), countdown_lead_ms).await
                }
            };
            if let Err(err) = result {
                // Stalled phase: stay subscribed and let a later change
                // notification (or countdown timer) re-trigger the step.
                warn!(room = %code, ?action, error = %err, "host step failed");
            }
        }

        let wait = timer_wait(&bundle, now_ms());
        tokio::select! {
            changed = watch.changed() => {
                if changed.is_err() {
                    debug!(room = %code, "change feed closed; driver stopping");
                    return;
                }
            }
            _ = async { sleep(wait.unwrap_or_default()).await }, if wait.is_some() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;
    use crate::dao::models::{
        AnswerEntity, CountdownEntity, QuestionItemEntity, RoomEntity, RoomMeta, RoundEntity,
        ScoresEntity,
    };

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

    fn bundle(state: Phase, round: u8) -> RoomBundle {
        let mut rounds = BTreeMap::new();
        for n in 1..=5u8 {
            rounds.insert(n, RoundEntity::seeded(n, vec![item(); 3], vec![item(); 3]));
        }
        RoomBundle {
            room: RoomEntity {
                code: RoomCode::parse("QD12").unwrap(),
                state,
                round,
                meta: RoomMeta {
                    host_uid: Uuid::new_v4(),
                    guest_uid: Some(Uuid::new_v4()),
                    created_at: SystemTime::now(),
                },
                countdown: Some(CountdownEntity { start_at: 10_000 }),
                answers: Default::default(),
                marking: Default::default(),
                marking_ack: Default::default(),
                award_ack: Default::default(),
                scores: ScoresEntity::default(),
            },
            rounds,
            players: BTreeMap::new(),
        }
    }

    #[test]
    fn countdown_waits_for_the_deadline() {
        let bundle = bundle(Phase::Countdown, 1);
        assert_eq!(plan_action(&bundle, 9_999), None);
        assert_eq!(
            plan_action(&bundle, 10_000),
            Some(DriverAction::AdvanceToQuestions)
        );
    }

    #[test]
    fn countdown_defers_when_content_is_missing() {
        let mut bundle = bundle(Phase::Countdown, 1);
        bundle.rounds.get_mut(&1).unwrap().host_items.pop();
        assert_eq!(plan_action(&bundle, 20_000), None);
    }

    #[test]
    fn unarmed_countdown_plans_nothing() {
        let mut bundle = bundle(Phase::Countdown, 1);
        bundle.room.countdown = None;
        assert_eq!(plan_action(&bundle, 20_000), None);
    }

    #[test]
    fn questions_waits_for_both_answer_lists() {
        let mut bundle = bundle(Phase::Questions, 1);
        assert_eq!(plan_action(&bundle, 20_000), None);

        bundle.room.answers.host.insert(1, answers());
        assert_eq!(plan_action(&bundle, 20_000), None);

        bundle.room.answers.guest.insert(1, answers());
        assert_eq!(plan_action(&bundle, 20_000), Some(DriverAction::BeginMarking));
    }

    #[test]
    fn marking_finalizes_only_after_both_acks() {
        let mut bundle = bundle(Phase::Marking, 3);
        bundle.room.marking_ack.host.insert(3, true);
        assert_eq!(plan_action(&bundle, 20_000), None);

        bundle.room.marking_ack.guest.insert(3, true);
        assert_eq!(
            plan_action(&bundle, 20_000),
            Some(DriverAction::FinalizeRace)
        );
    }

    #[test]
    fn award_advances_only_after_both_acks() {
        let mut bundle = bundle(Phase::Award, 2);
        bundle.room.award_ack.guest.insert(2, true);
        assert_eq!(plan_action(&bundle, 20_000), None);

        bundle.room.award_ack.host.insert(2, true);
        assert_eq!(plan_action(&bundle, 20_000), Some(DriverAction::AdvanceRound));
    }

    #[test]
    fn lobby_and_final_plan_nothing() {
        assert_eq!(plan_action(&bundle(Phase::Lobby, 1), 20_000), None);
        assert_eq!(plan_action(&bundle(Phase::Final, 5), 20_000), None);
        assert_eq!(plan_action(&bundle(Phase::Maths, 5), 20_000), None);
    }

    #[test]
    fn timer_only_armed_for_future_deadlines() {
        let bundle_now = bundle(Phase::Countdown, 1);
        assert!(timer_wait(&bundle_now, 5_000).is_some());
        assert!(timer_wait(&bundle_now, 10_000).is_none());
        assert!(timer_wait(&bundle(Phase::Questions, 1), 5_000).is_none());
    }

    mod round_cycle {
        use std::sync::Arc;
        use std::time::Duration;

        use super::*;
        use crate::config::AppConfig;
        use crate::dao::memory::MemoryRoomStore;
        use crate::dao::room_store::RoomWatch;
        use crate::dto::room::{
            AnswerInput, CreateRoomRequest, QuestionItemInput, RoundSeedInput,
            SubmitAnswersRequest, SubmitVerdictsRequest,
        };
        use crate::dao::models::Verdict;
        use crate::services::{ack_service, room_service, round_service, writers};
        use crate::state::AppState;

        fn seed_request(code: &str) -> CreateRoomRequest {
            let item = |n: u8| QuestionItemInput {
                prompt: format!("question {n}"),
                choices: vec![],
                answer: format!("answer {n}"),
            };
            CreateRoomRequest {
                code: Some(code.into()),
                rounds: (0..5)
                    .map(|_| RoundSeedInput {
                        host_items: vec![item(1), item(2), item(3)],
                        guest_items: vec![item(4), item(5), item(6)],
                    })
                    .collect(),
            }
        }

        fn answers_request(round: u8) -> SubmitAnswersRequest {
            let answer = |n: u8| AnswerInput {
                question: format!("q{n}"),
                chosen: format!("a{n}"),
                correct: format!("a{n}"),
            };
            SubmitAnswersRequest {
                round,
                answers: vec![answer(1), answer(2), answer(3)],
                at_ms: None,
            }
        }

        fn verdicts_request(round: u8) -> SubmitVerdictsRequest {
            SubmitVerdictsRequest {
                round,
                verdicts: vec![Verdict::Right, Verdict::Right, Verdict::Right],
                at_ms: None,
            }
        }

        async fn wait_for_phase(watch: &mut RoomWatch, want: Phase) {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if watch.borrow_and_update().room.state == want {
                        return;
                    }
                    watch.changed().await.expect("change feed stays open");
                }
            })
            .await
            .unwrap_or_else(|_| panic!("room never reached {want:?}"));
        }

        #[tokio::test]
        async fn driver_runs_a_full_round_cycle() {
            let config = AppConfig {
                countdown_lead_ms: 50,
                ..AppConfig::default()
            };
            let state = AppState::new(config);
            state
                .install_room_store(Arc::new(MemoryRoomStore::new()))
                .await;

            let created = room_service::create_room(&state, seed_request("QD12"))
                .await
                .unwrap();
            let code = RoomCode::parse(&created.code).unwrap();
            let joined = room_service::join_room(&state, &code).await.unwrap();

            let host = writers::host_writer(&state, &created.token, &code)
                .await
                .unwrap();
            room_service::confirm_unsealed(&host).await.unwrap();
            room_service::start_match(&state, &host).await.unwrap();

            let store = state.room_store().await.unwrap();
            let mut watch = store.watch_room(code.clone()).await.unwrap();

            // The driver flips into questions once the short countdown
            // elapses.
            wait_for_phase(&mut watch, Phase::Questions).await;

            let host_part = writers::participant_writer(&state, &created.token, &code)
                .await
                .unwrap();
            let guest_part = writers::participant_writer(&state, &joined.token, &code)
                .await
                .unwrap();

            round_service::submit_answers(&host_part, answers_request(1))
                .await
                .unwrap();
            round_service::submit_answers(&guest_part, answers_request(1))
                .await
                .unwrap();
            wait_for_phase(&mut watch, Phase::Marking).await;

            round_service::submit_verdicts(&host_part, verdicts_request(1))
                .await
                .unwrap();
            round_service::submit_verdicts(&guest_part, verdicts_request(1))
                .await
                .unwrap();
            ack_service::set_marking_ack(&host_part, 1).await.unwrap();
            ack_service::set_marking_ack(&guest_part, 1).await.unwrap();
            wait_for_phase(&mut watch, Phase::Award).await;

            let bundle = watch.borrow().clone();
            assert!(bundle.rounds[&1].race_resolved());
            assert_eq!(bundle.room.scores.questions.host, 3);
            assert_eq!(bundle.room.scores.questions.guest, 3);
            assert!(bundle.players[&created.host_uid].retained_snippets.contains_key(&1));
            assert!(bundle.players[&joined.guest_uid].retained_snippets.contains_key(&1));

            ack_service::set_award_ack(&host_part, 1).await.unwrap();
            ack_service::set_award_ack(&guest_part, 1).await.unwrap();
            wait_for_phase(&mut watch, Phase::Countdown).await;

            let bundle = watch.borrow().clone();
            assert_eq!(bundle.room.round, 2);
            assert!(bundle.room.countdown.is_some());
        }
    }
}
