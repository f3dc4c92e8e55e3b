use thiserror::Error;

use crate::dao::models::{Phase, ROUNDS_PER_MATCH};

/// Triggers that can advance a room through its phase graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// The second participant joined the lobby.
    GuestJoined,
    /// The host confirmed the content pack is unsealed.
    PackUnsealed,
    /// The host started the match, arming round 1.
    MatchStarted,
    /// The round countdown deadline passed and content is ready.
    CountdownElapsed,
    /// Both sides' answer lists for the current round are complete.
    AnswersComplete,
    /// The snippet race was resolved for the current round.
    RaceFinalized,
    /// Both award acknowledgments present, rounds remain.
    RoundAdvanced,
    /// Both award acknowledgments present after the last round.
    MathsStarted,
    /// The maths mini-game concluded.
    MathsCompleted,
}

/// Phase and round a transition lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStep {
    /// Resulting phase.
    pub phase: Phase,
    /// Resulting round number.
    pub round: u8,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?} (round {round})")]
pub struct InvalidTransition {
    /// The phase the room was in when the invalid event was received.
    pub from: Phase,
    /// The round the room was in.
    pub round: u8,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

/// Compute the step an event produces from the given phase and round.
///
/// This is the single authority on the legal phase graph; every transition
/// transaction derives its target from here and guards it with a
/// `state == from` precondition in the store, which is what makes duplicate
/// or racing trigger invocations no-ops.
pub fn compute_transition(
    from: Phase,
    round: u8,
    event: RoomEvent,
) -> Result<PhaseStep, InvalidTransition> {
    let step = match (from, event) {
        (Phase::Lobby, RoomEvent::GuestJoined) => PhaseStep {
            phase: Phase::Keyroom,
            round,
        },
        (Phase::Keyroom, RoomEvent::PackUnsealed) => PhaseStep {
            phase: Phase::Coderoom,
            round,
        },
        (Phase::Coderoom, RoomEvent::MatchStarted) => PhaseStep {
            phase: Phase::Countdown,
            round: 1,
        },
        (Phase::Countdown, RoomEvent::CountdownElapsed) => PhaseStep {
            phase: Phase::Questions,
            round,
        },
        (Phase::Questions, RoomEvent::AnswersComplete) => PhaseStep {
            phase: Phase::Marking,
            round,
        },
        (Phase::Marking, RoomEvent::RaceFinalized) => PhaseStep {
            phase: Phase::Award,
            round,
        },
        (Phase::Award, RoomEvent::RoundAdvanced) if round < ROUNDS_PER_MATCH => PhaseStep {
            phase: Phase::Countdown,
            round: round + 1,
        },
        (Phase::Award, RoomEvent::MathsStarted) if round == ROUNDS_PER_MATCH => PhaseStep {
            phase: Phase::Maths,
            round,
        },
        (Phase::Maths, RoomEvent::MathsCompleted) => PhaseStep {
            phase: Phase::Final,
            round,
        },
        (from, event) => return Err(InvalidTransition { from, round, event }),
    };

    Ok(step)
}
