use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Number of scored question rounds in a match.
pub const ROUNDS_PER_MATCH: u8 = 5;

/// Number of question items (and answers, and verdicts) per side per round.
pub const ITEMS_PER_ROUND: usize = 3;

/// Lifecycle phase of a room. This enumeration is the primary external
/// contract: clients navigate purely by observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Host created the room, waiting for the guest to join.
    Lobby,
    /// Both participants present; host is unlocking the content pack.
    Keyroom,
    /// Pack confirmed ready; waiting for the host to start the match.
    Coderoom,
    /// Pre-round countdown is armed.
    Countdown,
    /// Participants answer their three question items.
    Questions,
    /// Participants judge the opponent's answers.
    Marking,
    /// Round outcome (scores and snippet race) is on display.
    Award,
    /// Post-round maths mini-game, driven by the content layer.
    Maths,
    /// Final scoreboard; the room is never advanced past this point.
    Final,
}

impl Phase {
    /// True for the phases in which `round` is meaningful.
    pub fn is_round_phase(self) -> bool {
        matches!(
            self,
            Phase::Countdown | Phase::Questions | Phase::Marking | Phase::Award
        )
    }
}

/// One of the two fixed participant roles in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The participant that created the room and commits phase transitions.
    Host,
    /// The second participant; only ever writes its own role-keyed fields.
    Guest,
}

impl Role {
    /// The opposite role.
    pub fn peer(self) -> Role {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Guest => write!(f, "guest"),
        }
    }
}

/// A pair of values keyed by participant role.
///
/// Every role-keyed sub-map of the room document (`answers`, `marking`, the
/// acknowledgment maps, `scores.questions`) is one of these; the typed
/// accessor is what lets writer types mutate only their own side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap<T> {
    /// Value belonging to the host.
    pub host: T,
    /// Value belonging to the guest.
    pub guest: T,
}

impl<T> RoleMap<T> {
    /// Borrow the value for `role`.
    pub fn get(&self, role: Role) -> &T {
        match role {
            Role::Host => &self.host,
            Role::Guest => &self.guest,
        }
    }

    /// Mutably borrow the value for `role`.
    pub fn get_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Host => &mut self.host,
            Role::Guest => &mut self.guest,
        }
    }
}

/// Error returned when parsing an ill-formed room code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid room code `{input}`: expected 3-5 uppercase alphanumeric characters")]
pub struct RoomCodeError {
    /// The rejected input.
    pub input: String,
}

/// Human-chosen room identifier: 3-5 uppercase alphanumeric characters.
/// Collision risk is accepted, not managed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse and validate a room code, uppercasing is NOT applied: the code
    /// must already be canonical.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let ok = (3..=5).contains(&input.len())
            && input
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if ok {
            Ok(RoomCode(input.to_owned()))
        } else {
            Err(RoomCodeError {
                input: input.to_owned(),
            })
        }
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant identities attached to a room. Immutable once both are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMeta {
    /// Identity of the room creator.
    pub host_uid: Uuid,
    /// Identity of the second participant, absent until the lobby is left.
    pub guest_uid: Option<Uuid>,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
}

/// Armed countdown deadline for the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownEntity {
    /// Epoch-millisecond deadline at which the countdown elapses. Doubles as
    /// the timing baseline for the round's snippet race.
    pub start_at: i64,
}

/// One answered question: the prompt, what the participant chose, and the
/// expected answer carried along for self-scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntity {
    /// Prompt text of the question item.
    pub question: String,
    /// The participant's submitted answer.
    pub chosen: String,
    /// The expected answer.
    pub correct: String,
}

/// A participant's judgment of one opponent answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Judged correct.
    Right,
    /// Judged incorrect.
    Wrong,
    /// The judge could not decide.
    Unknown,
}

/// One question item consumed by the (out-of-scope) content layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItemEntity {
    /// Prompt text shown to the participant.
    pub prompt: String,
    /// Candidate answers, when the item is multiple-choice.
    #[serde(default)]
    pub choices: Vec<String>,
    /// The expected answer.
    pub answer: String,
}

/// Per-participant wall-clock offsets for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimingEntity {
    /// Role the participant holds in the room.
    pub role: Role,
    /// Epoch ms at which the participant finished answering.
    pub q_done_ms: Option<i64>,
    /// Epoch ms at which the participant finished judging.
    pub mark_done_ms: Option<i64>,
    /// Duration from the shared countdown deadline to `mark_done_ms`,
    /// clamped non-negative.
    pub total_ms: Option<i64>,
}

impl TimingEntity {
    /// Fresh, empty timing slot for `role`.
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            q_done_ms: None,
            mark_done_ms: None,
            total_ms: None,
        }
    }
}

/// Cumulative per-role tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoresEntity {
    /// Correct-answer counts accumulated across completed rounds.
    pub questions: RoleMap<u32>,
}

/// The canonical room document both participants coordinate through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntity {
    /// Room code, also the storage key.
    pub code: RoomCode,
    /// Current lifecycle phase.
    pub state: Phase,
    /// Current round, 1-5. Meaningful while `state` is a round phase.
    pub round: u8,
    /// Participant identities.
    pub meta: RoomMeta,
    /// Armed countdown, absent outside an active round cycle.
    pub countdown: Option<CountdownEntity>,
    /// Submitted answers per role per round.
    pub answers: RoleMap<BTreeMap<u8, Vec<AnswerEntity>>>,
    /// Submitted verdicts per role per round.
    pub marking: RoleMap<BTreeMap<u8, Vec<Verdict>>>,
    /// Marking-phase acknowledgments per role per round. Monotonic.
    pub marking_ack: RoleMap<BTreeMap<u8, bool>>,
    /// Award-phase acknowledgments per role per round. Monotonic.
    pub award_ack: RoleMap<BTreeMap<u8, bool>>,
    /// Cumulative scores.
    pub scores: ScoresEntity,
}

/// One scored round's record: pre-seeded items, reported timings, and the
/// write-once snippet race outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundEntity {
    /// Round number, 1-5.
    pub round: u8,
    /// The host's three question items.
    pub host_items: Vec<QuestionItemEntity>,
    /// The guest's three question items.
    pub guest_items: Vec<QuestionItemEntity>,
    /// Reported timings keyed by participant uid.
    pub timings: BTreeMap<Uuid, TimingEntity>,
    /// Winner of the snippet race. Written exactly once by the finalizer.
    pub snippet_winner_uid: Option<Uuid>,
    /// True when the race was within the tie threshold. Written exactly once.
    pub snippet_tie: bool,
}

impl RoundEntity {
    /// A pre-populated round with no timings and an unresolved race.
    pub fn seeded(
        round: u8,
        host_items: Vec<QuestionItemEntity>,
        guest_items: Vec<QuestionItemEntity>,
    ) -> Self {
        Self {
            round,
            host_items,
            guest_items,
            timings: BTreeMap::new(),
            snippet_winner_uid: None,
            snippet_tie: false,
        }
    }

    /// True once the race outcome has been persisted for this round.
    pub fn race_resolved(&self) -> bool {
        self.snippet_tie || self.snippet_winner_uid.is_some()
    }
}

/// Per-participant record, created lazily on first timing write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Participant identity.
    pub uid: Uuid,
    /// Role the participant holds in the room.
    pub role: Role,
    /// Per-round snippet retention: true when the participant won or tied.
    pub retained_snippets: BTreeMap<u8, bool>,
    /// Denormalized mirror of the participant's round timings, written
    /// defensively in case the round-record write is delayed.
    pub rounds: BTreeMap<u8, TimingEntity>,
}

impl PlayerEntity {
    /// Fresh player record with no timings.
    pub fn new(uid: Uuid, role: Role) -> Self {
        Self {
            uid,
            role,
            retained_snippets: BTreeMap::new(),
            rounds: BTreeMap::new(),
        }
    }
}

/// The versioned unit the store transacts over: a room together with its
/// round and player records. Bundling them is what gives the finalizer a
/// single atomic read-verify-write across all three record kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomBundle {
    /// The room document.
    pub room: RoomEntity,
    /// Round records keyed by round number.
    pub rounds: BTreeMap<u8, RoundEntity>,
    /// Player records keyed by participant uid.
    pub players: BTreeMap<Uuid, PlayerEntity>,
}

impl RoomBundle {
    /// Look up (or lazily create) the player record for `uid`.
    pub fn player_mut(&mut self, uid: Uuid, role: Role) -> &mut PlayerEntity {
        self.players
            .entry(uid)
            .or_insert_with(|| PlayerEntity::new(uid, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_accepts_canonical_codes() {
        assert!(RoomCode::parse("ABC").is_ok());
        assert!(RoomCode::parse("AB12").is_ok());
        assert!(RoomCode::parse("Z9Z9Z").is_ok());
    }

    #[test]
    fn room_code_rejects_bad_input() {
        assert!(RoomCode::parse("AB").is_err()); // too short
        assert!(RoomCode::parse("ABCDEF").is_err()); // too long
        assert!(RoomCode::parse("abc1").is_err()); // lowercase
        assert!(RoomCode::parse("AB C").is_err()); // whitespace
        assert!(RoomCode::parse("").is_err());
    }

    #[test]
    fn phase_round_phases() {
        assert!(Phase::Countdown.is_round_phase());
        assert!(Phase::Award.is_round_phase());
        assert!(!Phase::Lobby.is_round_phase());
        assert!(!Phase::Maths.is_round_phase());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Phase::Keyroom).unwrap(), "\"keyroom\"");
        assert_eq!(serde_json::to_string(&Phase::Final).unwrap(), "\"final\"");
    }
}
