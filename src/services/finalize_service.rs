//! Snippet race finalizer.
//!
//! Exactly once per round, after both marking acknowledgments are in, the
//! host resolves the race between the two reported totals, updates the
//! cumulative scores, stamps snippet retention on both player records, and
//! flips the room into the award phase. The entire read-verify-write runs
//! as one store transaction whose `state == marking` precondition makes a
//! concurrent second finalize a guaranteed no-op, so the operation is safe
//! to invoke redundantly from multiple change-notification callbacks.

use uuid::Uuid;

use crate::{
    dao::models::{Phase, Role, RoomBundle},
    dao::room_store::{TxDecision, TxOutcome},
    error::ServiceError,
    services::{
        retry::{RetryPolicy, with_backoff},
        writers::HostWriter,
    },
    state::{
        phase::{RoomEvent, compute_transition},
        room::{AckKind, both_acked, correct_count},
    },
};

/// Resolved race outcome for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RaceOutcome {
    winner_uid: Option<Uuid>,
    tie: bool,
}

/// Decide the race from both totals under the canonical tie threshold.
fn decide_race(
    host_uid: Uuid,
    host_total_ms: i64,
    guest_uid: Uuid,
    guest_total_ms: i64,
    tie_threshold_ms: i64,
) -> RaceOutcome {
    let diff = (host_total_ms - guest_total_ms).abs();
    if diff <= tie_threshold_ms {
        RaceOutcome {
            winner_uid: None,
            tie: true,
        }
    } else if host_total_ms < guest_total_ms {
        RaceOutcome {
            winner_uid: Some(host_uid),
            tie: false,
        }
    } else {
        RaceOutcome {
            winner_uid: Some(guest_uid),
            tie: false,
        }
    }
}

/// Run one finalize transaction attempt.
///
/// Preconditions checked inside the transaction: the room is in the marking
/// phase, both marking acknowledgments are present for the current round,
/// and both participants' totals have been reported. Any miss aborts
/// without writing; the caller may retry on a later change notification.
pub async fn finalize_race(
    host: &HostWriter,
    tie_threshold_ms: i64,
) -> Result<TxOutcome, ServiceError> {
    host.store()
        .transact(
            host.code().clone(),
            Box::new(move |current: &RoomBundle| {
                let room = &current.room;
                if room.state != Phase::Marking {
                    return TxDecision::Abort;
                }
                let round = room.round;
                if !both_acked(room, AckKind::Marking, round) {
                    return TxDecision::Abort;
                }
                let Some(record) = current.rounds.get(&round) else {
                    return TxDecision::Abort;
                };
                if record.race_resolved() {
                    // Write-once guard; unreachable while still marking, but
                    // the outcome must never be overwritten.
                    return TxDecision::Abort;
                }
                let host_uid = room.meta.host_uid;
                let Some(guest_uid) = room.meta.guest_uid else {
                    return TxDecision::Abort;
                };
                let Some(host_total) = record.timings.get(&host_uid).and_then(|t| t.total_ms)
                else {
                    return TxDecision::Abort;
                };
                let Some(guest_total) = record.timings.get(&guest_uid).and_then(|t| t.total_ms)
                else {
                    return TxDecision::Abort;
                };
                let Ok(step) = compute_transition(room.state, round, RoomEvent::RaceFinalized)
                else {
                    return TxDecision::Abort;
                };

                let outcome =
                    decide_race(host_uid, host_total, guest_uid, guest_total, tie_threshold_ms);

                let host_score = correct_count(
                    room.answers
                        .get(Role::Host)
                        .get(&round)
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                );
                let guest_score = correct_count(
                    room.answers
                        .get(Role::Guest)
                        .get(&round)
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                );

                let mut next = current.clone();

                let record = next
                    .rounds
                    .get_mut(&round)
                    .expect("round record present in snapshot");
                record.snippet_winner_uid = outcome.winner_uid;
                record.snippet_tie = outcome.tie;

                *next.room.scores.questions.get_mut(Role::Host) += host_score;
                *next.room.scores.questions.get_mut(Role::Guest) += guest_score;

                for (uid, role) in [(host_uid, Role::Host), (guest_uid, Role::Guest)] {
                    let retained = outcome.tie || outcome.winner_uid == Some(uid);
                    next.player_mut(uid, role)
                        .retained_snippets
                        .insert(round, retained);
                }

                next.room.state = step.phase;
                next.room.round = step.round;
                next.room.countdown = None;

                TxDecision::Commit(Box::new(next))
            }),
        )
        .await
        .map_err(Into::into)
}

/// Finalize under the retry supervisor: conflicting writes are retried with
/// linear backoff up to the policy's bound.
pub async fn finalize_race_with_retry(
    host: &HostWriter,
    tie_threshold_ms: i64,
    policy: RetryPolicy,
) -> Result<TxOutcome, ServiceError> {
    let host = host.clone();
    with_backoff("finalize_race", policy, move || {
        let host = host.clone();
        async move { finalize_race(&host, tie_threshold_ms).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::dao::memory::MemoryRoomStore;
    use crate::dao::models::{
        AnswerEntity, CountdownEntity, RoomCode, RoomEntity, RoomMeta, RoundEntity, ScoresEntity,
        TimingEntity,
    };
    use crate::dao::room_store::RoomStore;
    use crate::state::Claim;

    const THRESHOLD: i64 = 250;

    struct Fixture {
        store: Arc<dyn RoomStore>,
        code: RoomCode,
        host_writer: HostWriter,
        host_uid: Uuid,
        guest_uid: Uuid,
    }

    fn answers(correct: usize) -> Vec<AnswerEntity> {
        (0..3)
            .map(|n| AnswerEntity {
                question: format!("q{n}"),
                chosen: if n < correct { format!("a{n}") } else { "miss".into() },
                correct: format!("a{n}"),
            })
            .collect()
    }

    /// Marking-phase room in round 2 with both acks and both totals, unless
    /// the mutator says otherwise.
    async fn fixture(
        host_total: Option<i64>,
        guest_total: Option<i64>,
        mutate: impl FnOnce(&mut RoomBundle),
    ) -> Fixture {
        let host_uid = Uuid::new_v4();
        let guest_uid = Uuid::new_v4();
        let code = RoomCode::parse("QD12").unwrap();

        let mut record = RoundEntity::seeded(2, Vec::new(), Vec::new());
        if let Some(total) = host_total {
            record.timings.insert(
                host_uid,
                TimingEntity {
                    role: Role::Host,
                    q_done_ms: Some(1_000),
                    mark_done_ms: Some(1_000 + total),
                    total_ms: Some(total),
                },
            );
        }
        if let Some(total) = guest_total {
            record.timings.insert(
                guest_uid,
                TimingEntity {
                    role: Role::Guest,
                    q_done_ms: Some(1_100),
                    mark_done_ms: Some(1_000 + total),
                    total_ms: Some(total),
                },
            );
        }
        let mut rounds = BTreeMap::new();
        rounds.insert(2, record);

        let mut bundle = RoomBundle {
            room: RoomEntity {
                code: code.clone(),
                state: Phase::Marking,
                round: 2,
                meta: RoomMeta {
                    host_uid,
                    guest_uid: Some(guest_uid),
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
        bundle.room.answers.host.insert(2, answers(2));
        bundle.room.answers.guest.insert(2, answers(3));
        bundle.room.marking_ack.host.insert(2, true);
        bundle.room.marking_ack.guest.insert(2, true);
        mutate(&mut bundle);

        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
        store.create_room(bundle).await.unwrap();
        let host_writer = HostWriter::new(
            store.clone(),
            Claim {
                code: code.clone(),
                role: Role::Host,
                uid: host_uid,
            },
        )
        .unwrap();

        Fixture {
            store,
            code,
            host_writer,
            host_uid,
            guest_uid,
        }
    }

    async fn bundle(fixture: &Fixture) -> RoomBundle {
        fixture
            .store
            .find_room(fixture.code.clone())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn equal_totals_resolve_as_a_tie_retaining_both() {
        // Scenario: host 12_340 ms, guest 12_340 ms, threshold 250 ms.
        let fixture = fixture(Some(12_340), Some(12_340), |_| {}).await;

        let outcome = finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed);

        let bundle = bundle(&fixture).await;
        let record = &bundle.rounds[&2];
        assert!(record.snippet_tie);
        assert_eq!(record.snippet_winner_uid, None);
        assert_eq!(
            bundle.players[&fixture.host_uid].retained_snippets[&2],
            true
        );
        assert_eq!(
            bundle.players[&fixture.guest_uid].retained_snippets[&2],
            true
        );
        assert_eq!(bundle.room.state, Phase::Award);
        assert!(bundle.room.countdown.is_none());
    }

    #[tokio::test]
    async fn faster_total_wins_and_scores_count_own_answers() {
        // Scenario: host 9_000 ms, guest 9_400 ms, threshold 250 ms.
        let fixture = fixture(Some(9_000), Some(9_400), |_| {}).await;

        finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap();

        let bundle = bundle(&fixture).await;
        let record = &bundle.rounds[&2];
        assert!(!record.snippet_tie);
        assert_eq!(record.snippet_winner_uid, Some(fixture.host_uid));
        // Fixture answers: host got 2 of 3 right, guest 3 of 3.
        assert_eq!(bundle.room.scores.questions.host, 2);
        assert_eq!(bundle.room.scores.questions.guest, 3);
        assert_eq!(
            bundle.players[&fixture.host_uid].retained_snippets[&2],
            true
        );
        assert_eq!(
            bundle.players[&fixture.guest_uid].retained_snippets[&2],
            false
        );
    }

    #[tokio::test]
    async fn difference_just_inside_threshold_still_ties() {
        let fixture = fixture(Some(9_000), Some(9_250), |_| {}).await;
        finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap();

        let bundle = bundle(&fixture).await;
        assert!(bundle.rounds[&2].snippet_tie);
    }

    #[tokio::test]
    async fn missing_peer_ack_is_a_silent_no_op() {
        // Scenario: only the host acknowledged marking.
        let fixture = fixture(Some(9_000), Some(9_400), |bundle| {
            bundle.room.marking_ack.guest.remove(&2);
        })
        .await;

        let outcome = finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap();
        assert_eq!(outcome, TxOutcome::Aborted);

        let bundle = bundle(&fixture).await;
        assert_eq!(bundle.room.state, Phase::Marking);
        assert!(!bundle.rounds[&2].race_resolved());
        assert_eq!(bundle.room.scores.questions.host, 0);
    }

    #[tokio::test]
    async fn missing_total_is_a_silent_no_op() {
        let fixture = fixture(Some(9_000), None, |_| {}).await;
        let outcome = finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap();
        assert_eq!(outcome, TxOutcome::Aborted);
        assert_eq!(bundle(&fixture).await.room.state, Phase::Marking);
    }

    #[tokio::test]
    async fn second_finalize_cannot_double_score() {
        let fixture = fixture(Some(9_000), Some(9_400), |_| {}).await;

        assert_eq!(
            finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap(),
            TxOutcome::Committed
        );
        let first = bundle(&fixture).await;

        assert_eq!(
            finalize_race(&fixture.host_writer, THRESHOLD).await.unwrap(),
            TxOutcome::Aborted
        );
        let second = bundle(&fixture).await;

        assert_eq!(first, second);
        assert_eq!(second.room.scores.questions.host, 2);
    }

    #[tokio::test]
    async fn retry_wrapper_passes_the_outcome_through() {
        let fixture = fixture(Some(9_000), Some(9_400), |_| {}).await;
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(10),
        };

        let outcome =
            finalize_race_with_retry(&fixture.host_writer, THRESHOLD, policy)
                .await
                .unwrap();
        assert_eq!(outcome, TxOutcome::Committed);
    }

    #[test]
    fn race_decision_table() {
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();

        let tie = decide_race(host, 5_000, guest, 5_200, 250);
        assert!(tie.tie);
        assert_eq!(tie.winner_uid, None);

        let host_wins = decide_race(host, 5_000, guest, 5_300, 250);
        assert!(!host_wins.tie);
        assert_eq!(host_wins.winner_uid, Some(host));

        let guest_wins = decide_race(host, 6_000, guest, 5_000, 250);
        assert_eq!(guest_wins.winner_uid, Some(guest));
    }
}
