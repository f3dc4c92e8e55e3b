use std::time::Duration;

use crate::{
    dao::models::{AnswerEntity, ITEMS_PER_ROUND, Phase, RoomBundle},
    dao::room_store::{TxDecision, TxOutcome},
    dto::room::{SubmitAnswersRequest, SubmitVerdictsRequest},
    error::ServiceError,
    services::{
        retry::{RetryPolicy, with_backoff},
        timing_service,
        writers::ParticipantWriter,
    },
    state::now_ms,
};

/// Submissions are role-keyed patches and must stay safe to retry; collisions
/// with the peer's concurrent writes are absorbed here.
const PATCH_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_millis(50),
};

/// Persist a participant's three answers for the current round, recording
/// the answer-completion instant. A duplicate submission is a no-op.
pub async fn submit_answers(
    writer: &ParticipantWriter,
    request: SubmitAnswersRequest,
) -> Result<(), ServiceError> {
    let SubmitAnswersRequest {
        round,
        answers,
        at_ms,
    } = request;

    if answers.len() != ITEMS_PER_ROUND {
        return Err(ServiceError::InvalidInput(format!(
            "exactly {ITEMS_PER_ROUND} answers are required, got {}",
            answers.len()
        )));
    }

    let answers: Vec<AnswerEntity> = answers.into_iter().map(Into::into).collect();
    let at_ms = at_ms.unwrap_or_else(now_ms);
    let role = writer.role();
    let uid = writer.uid();

    let store = writer.store().clone();
    let code = writer.code().clone();
    let outcome = with_backoff("submit_answers", PATCH_RETRY, move || {
        let store = store.clone();
        let code = code.clone();
        let answers = answers.clone();
        async move {
            store
                .transact(
                    code,
                    Box::new(move |current: &RoomBundle| {
                        if current.room.answers.get(role).contains_key(&round) {
                            // Duplicate write; answers are write-once per round.
                            return TxDecision::Abort;
                        }
                        if current.room.state != Phase::Questions || current.room.round != round {
                            return TxDecision::Abort;
                        }

                        let mut next = current.clone();
                        next.room.answers.get_mut(role).insert(round, answers.clone());
                        timing_service::record_answer_done(&mut next, uid, role, round, at_ms);
                        TxDecision::Commit(Box::new(next))
                    }),
                )
                .await
                .map_err(Into::into)
        }
    })
    .await?;

    if outcome == TxOutcome::Aborted {
        return explain_abort(writer, round, Phase::Questions, SubmissionKind::Answers).await;
    }
    Ok(())
}

/// Persist a participant's three verdicts on the opponent's answers,
/// recording the judging-completion instant and the derived race total.
pub async fn submit_verdicts(
    writer: &ParticipantWriter,
    request: SubmitVerdictsRequest,
) -> Result<(), ServiceError> {
    let SubmitVerdictsRequest {
        round,
        verdicts,
        at_ms,
    } = request;

    if verdicts.len() != ITEMS_PER_ROUND {
        return Err(ServiceError::InvalidInput(format!(
            "exactly {ITEMS_PER_ROUND} verdicts are required, got {}",
            verdicts.len()
        )));
    }

    let at_ms = at_ms.unwrap_or_else(now_ms);
    let role = writer.role();
    let uid = writer.uid();

    let store = writer.store().clone();
    let code = writer.code().clone();
    let outcome = with_backoff("submit_verdicts", PATCH_RETRY, move || {
        let store = store.clone();
        let code = code.clone();
        let verdicts = verdicts.clone();
        async move {
            store
                .transact(
                    code,
                    Box::new(move |current: &RoomBundle| {
                        if current.room.marking.get(role).contains_key(&round) {
                            return TxDecision::Abort;
                        }
                        if current.room.state != Phase::Marking || current.room.round != round {
                            return TxDecision::Abort;
                        }

                        let start_at =
                            current.room.countdown.map(|countdown| countdown.start_at);
                        let mut next = current.clone();
                        next.room.marking.get_mut(role).insert(round, verdicts.clone());
                        timing_service::record_marking_done(
                            &mut next, uid, role, round, at_ms, start_at,
                        );
                        TxDecision::Commit(Box::new(next))
                    }),
                )
                .await
                .map_err(Into::into)
        }
    })
    .await?;

    if outcome == TxOutcome::Aborted {
        return explain_abort(writer, round, Phase::Marking, SubmissionKind::Verdicts).await;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum SubmissionKind {
    Answers,
    Verdicts,
}

/// Distinguish a harmless duplicate write from a submission in the wrong
/// phase, which the client should hear about.
async fn explain_abort(
    writer: &ParticipantWriter,
    round: u8,
    expected_phase: Phase,
    kind: SubmissionKind,
) -> Result<(), ServiceError> {
    let bundle = writer.store().find_room(writer.code().clone()).await?;
    let already_present = bundle.is_some_and(|bundle| match kind {
        SubmissionKind::Answers => bundle.room.answers.get(writer.role()).contains_key(&round),
        SubmissionKind::Verdicts => bundle.room.marking.get(writer.role()).contains_key(&round),
    });

    if already_present {
        return Ok(());
    }

    let what = match kind {
        SubmissionKind::Answers => "answers",
        SubmissionKind::Verdicts => "verdicts",
    };
    Err(ServiceError::InvalidState(format!(
        "{what} for round {round} can only be submitted during the {expected_phase:?} phase"
    )))
}
