use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{
        AnswerEntity, Phase, QuestionItemEntity, Role, RoomBundle, Verdict,
    },
    dto::{format_system_time, phase::LocalViewDto, validation::validate_room_code},
    state::room as room_state,
};

/// Payload used to bootstrap a new room with its five pre-populated rounds.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Optional human-chosen room code; generated when absent.
    #[serde(default)]
    pub code: Option<String>,
    /// Exactly five rounds of seeded content.
    pub rounds: Vec<RoundSeedInput>,
}

impl Validate for CreateRoomRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        // Validate the chosen room code if present
        if let Some(ref code) = self.code {
            if let Err(e) = validate_room_code(code) {
                errors.add("code", e);
            }
        }

        if self.rounds.len() != 5 {
            let mut err = ValidationError::new("rounds_length");
            err.message = Some("exactly 5 seeded rounds are required".into());
            errors.add("rounds", err);
        }

        for seed in &self.rounds {
            if let Err(seed_errors) = seed.validate() {
                errors.merge_self("rounds", Err(seed_errors));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One round's seeded content: three question items per side.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RoundSeedInput {
    /// The host's three question items.
    #[validate(length(equal = 3), nested)]
    pub host_items: Vec<QuestionItemInput>,
    /// The guest's three question items.
    #[validate(length(equal = 3), nested)]
    pub guest_items: Vec<QuestionItemInput>,
}

/// Question item supplied by the content layer at room creation.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItemInput {
    /// Prompt text.
    #[validate(length(min = 1))]
    pub prompt: String,
    /// Candidate answers for multiple-choice items.
    #[serde(default)]
    pub choices: Vec<String>,
    /// Expected answer.
    #[validate(length(min = 1))]
    pub answer: String,
}

impl From<QuestionItemInput> for QuestionItemEntity {
    fn from(input: QuestionItemInput) -> Self {
        Self {
            prompt: input.prompt,
            choices: input.choices,
            answer: input.answer,
        }
    }
}

/// Response returned once a room has been created.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    /// The room code to share with the guest.
    pub code: String,
    /// Identity assigned to the host.
    pub host_uid: Uuid,
    /// Token authenticating the host's subsequent writes.
    pub token: String,
}

/// Response returned once a guest joined a room.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    /// The joined room's code.
    pub code: String,
    /// Identity assigned to the guest.
    pub guest_uid: Uuid,
    /// Token authenticating the guest's subsequent writes.
    pub token: String,
}

/// A participant's three answers for the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswersRequest {
    /// Round the answers belong to.
    #[validate(range(min = 1, max = 5))]
    pub round: u8,
    /// Exactly three answer records.
    #[validate(length(equal = 3), nested)]
    pub answers: Vec<AnswerInput>,
    /// Client-reported completion instant (epoch ms); server clock when absent.
    #[serde(default)]
    pub at_ms: Option<i64>,
}

/// One answer record.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    /// Prompt the answer responds to.
    #[validate(length(min = 1))]
    pub question: String,
    /// What the participant chose; may be empty for an unanswered item.
    pub chosen: String,
    /// The expected answer, carried along for self-scoring.
    #[validate(length(min = 1))]
    pub correct: String,
}

impl From<AnswerInput> for AnswerEntity {
    fn from(input: AnswerInput) -> Self {
        Self {
            question: input.question,
            chosen: input.chosen,
            correct: input.correct,
        }
    }
}

/// A participant's three verdicts on the opponent's answers.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVerdictsRequest {
    /// Round the verdicts belong to.
    #[validate(range(min = 1, max = 5))]
    pub round: u8,
    /// Exactly three verdicts, in item order.
    #[validate(length(equal = 3))]
    pub verdicts: Vec<Verdict>,
    /// Client-reported completion instant (epoch ms); server clock when absent.
    #[serde(default)]
    pub at_ms: Option<i64>,
}

/// Acknowledgment patch for the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    /// Round being acknowledged.
    #[validate(range(min = 1, max = 5))]
    pub round: u8,
}

/// Role-keyed acknowledgment maps.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AcksView {
    /// Host acknowledgments per round.
    pub host: BTreeMap<u8, bool>,
    /// Guest acknowledgments per round.
    pub guest: BTreeMap<u8, bool>,
}

/// Cumulative correct-answer tallies.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct ScoresView {
    /// Host tally.
    pub host: u32,
    /// Guest tally.
    pub guest: u32,
}

/// Role-keyed answer lists per round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswersView {
    /// Host answers per round.
    pub host: BTreeMap<u8, Vec<AnswerEntity>>,
    /// Guest answers per round.
    pub guest: BTreeMap<u8, Vec<AnswerEntity>>,
}

/// Role-keyed verdict lists per round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarkingView {
    /// Host verdicts per round.
    pub host: BTreeMap<u8, Vec<Verdict>>,
    /// Guest verdicts per round.
    pub guest: BTreeMap<u8, Vec<Verdict>>,
}

/// One reported timing row.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimingView {
    /// Participant the timing belongs to.
    pub uid: Uuid,
    /// Role the participant holds.
    pub role: Role,
    /// Epoch ms at which answering finished.
    pub q_done_ms: Option<i64>,
    /// Epoch ms at which judging finished.
    pub mark_done_ms: Option<i64>,
    /// Duration from the countdown deadline to `mark_done_ms`.
    pub total_ms: Option<i64>,
}

/// Projection of one round record.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    /// Round number.
    pub round: u8,
    /// The host's question items.
    pub host_items: Vec<QuestionItemEntity>,
    /// The guest's question items.
    pub guest_items: Vec<QuestionItemEntity>,
    /// Reported timings.
    pub timings: Vec<TimingView>,
    /// Snippet race winner, absent until resolved or on a tie.
    pub snippet_winner_uid: Option<Uuid>,
    /// True when the race resolved as a tie.
    pub snippet_tie: bool,
}

/// Projection of one player record.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    /// Participant identity.
    pub uid: Uuid,
    /// Role held in the room.
    pub role: Role,
    /// Snippet retention per round.
    pub retained_snippets: BTreeMap<u8, bool>,
}

/// Full room projection pushed on every change notification and returned by
/// the point-read endpoint.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    /// Room code.
    pub code: String,
    /// Current phase.
    pub state: Phase,
    /// Current round.
    pub round: u8,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Host identity.
    pub host_uid: Uuid,
    /// Guest identity, absent while in the lobby.
    pub guest_uid: Option<Uuid>,
    /// Armed countdown deadline (epoch ms), if any.
    pub countdown_start_at: Option<i64>,
    /// Submitted answers.
    pub answers: AnswersView,
    /// Submitted verdicts.
    pub marking: MarkingView,
    /// Marking-phase acknowledgments.
    pub marking_ack: AcksView,
    /// Award-phase acknowledgments.
    pub award_ack: AcksView,
    /// Cumulative scores.
    pub scores: ScoresView,
    /// Round records in round order.
    pub rounds: IndexMap<u8, RoundView>,
    /// Player records.
    pub players: Vec<PlayerSummary>,
    /// Navigation hint for the authenticated participant.
    pub local_view: Option<LocalViewDto>,
}

impl RoomView {
    /// Project a bundle into the wire view; `role` adds the authenticated
    /// participant's navigation hint.
    pub fn from_bundle(bundle: &RoomBundle, role: Option<Role>) -> Self {
        let room = &bundle.room;
        Self {
            code: room.code.to_string(),
            state: room.state,
            round: room.round,
            created_at: format_system_time(room.meta.created_at),
            host_uid: room.meta.host_uid,
            guest_uid: room.meta.guest_uid,
            countdown_start_at: room.countdown.map(|countdown| countdown.start_at),
            answers: AnswersView {
                host: room.answers.host.clone(),
                guest: room.answers.guest.clone(),
            },
            marking: MarkingView {
                host: room.marking.host.clone(),
                guest: room.marking.guest.clone(),
            },
            marking_ack: AcksView {
                host: room.marking_ack.host.clone(),
                guest: room.marking_ack.guest.clone(),
            },
            award_ack: AcksView {
                host: room.award_ack.host.clone(),
                guest: room.award_ack.guest.clone(),
            },
            scores: ScoresView {
                host: room.scores.questions.host,
                guest: room.scores.questions.guest,
            },
            rounds: bundle
                .rounds
                .iter()
                .map(|(number, record)| {
                    (
                        *number,
                        RoundView {
                            round: record.round,
                            host_items: record.host_items.clone(),
                            guest_items: record.guest_items.clone(),
                            timings: record
                                .timings
                                .iter()
                                .map(|(uid, timing)| TimingView {
                                    uid: *uid,
                                    role: timing.role,
                                    q_done_ms: timing.q_done_ms,
                                    mark_done_ms: timing.mark_done_ms,
                                    total_ms: timing.total_ms,
                                })
                                .collect(),
                            snippet_winner_uid: record.snippet_winner_uid,
                            snippet_tie: record.snippet_tie,
                        },
                    )
                })
                .collect(),
            players: bundle
                .players
                .values()
                .map(|player| PlayerSummary {
                    uid: player.uid,
                    role: player.role,
                    retained_snippets: player.retained_snippets.clone(),
                })
                .collect(),
            local_view: role.map(|role| room_state::local_view(room, role).into()),
        }
    }
}
