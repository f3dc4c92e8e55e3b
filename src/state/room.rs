use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, ITEMS_PER_ROUND, Phase, Role, RoomEntity, RoundEntity,
};

/// Which per-round acknowledgment map an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Confirmation that the participant finished the marking phase.
    Marking,
    /// Confirmation that the participant left the award screen.
    Award,
}

/// Read one acknowledgment flag; an absent entry counts as false.
pub fn ack(room: &RoomEntity, kind: AckKind, role: Role, round: u8) -> bool {
    let map = match kind {
        AckKind::Marking => room.marking_ack.get(role),
        AckKind::Award => room.award_ack.get(role),
    };
    map.get(&round).copied().unwrap_or(false)
}

/// True once both participants acknowledged the given phase for `round`.
pub fn both_acked(room: &RoomEntity, kind: AckKind, round: u8) -> bool {
    ack(room, kind, Role::Host, round) && ack(room, kind, Role::Guest, round)
}

/// Resolve which role a participant uid holds in the room, if any.
pub fn role_of(room: &RoomEntity, uid: Uuid) -> Option<Role> {
    if room.meta.host_uid == uid {
        Some(Role::Host)
    } else if room.meta.guest_uid == Some(uid) {
        Some(Role::Guest)
    } else {
        None
    }
}

/// A round's content is ready once both sides carry their three items.
pub fn content_ready(record: &RoundEntity) -> bool {
    record.host_items.len() == ITEMS_PER_ROUND && record.guest_items.len() == ITEMS_PER_ROUND
}

/// True once both sides submitted their three answers for `round`.
pub fn answers_complete(room: &RoomEntity, round: u8) -> bool {
    [Role::Host, Role::Guest].into_iter().all(|role| {
        room.answers
            .get(role)
            .get(&round)
            .is_some_and(|list| list.len() == ITEMS_PER_ROUND)
    })
}

/// Where a participant's local UI belongs for the room's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalView {
    /// The participant still owes input for this phase.
    Input(Phase),
    /// The participant is done and waits for the peer (or the host driver).
    Waiting(Phase),
}

/// Resolve the self-heal rule of the acknowledgment protocol: a participant
/// whose own acknowledgment is still false belongs on that phase's input
/// screen no matter what its stale local UI believes; one whose ack is true
/// while the peer lags enters a pure wait state.
pub fn local_view(room: &RoomEntity, role: Role) -> LocalView {
    match room.state {
        Phase::Marking if !ack(room, AckKind::Marking, role, room.round) => {
            LocalView::Input(Phase::Marking)
        }
        Phase::Marking => LocalView::Waiting(Phase::Marking),
        Phase::Award if !ack(room, AckKind::Award, role, room.round) => {
            LocalView::Input(Phase::Award)
        }
        Phase::Award => LocalView::Waiting(Phase::Award),
        other => LocalView::Input(other),
    }
}

/// Canonicalize an answer for comparison: case-insensitive, whitespace runs
/// collapsed, surrounding whitespace ignored.
pub fn normalized(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Count a participant's own correct answers: `chosen` matching `correct`
/// under [`normalized`] comparison.
pub fn correct_count(answers: &[AnswerEntity]) -> u32 {
    answers
        .iter()
        .filter(|answer| normalized(&answer.chosen) == normalized(&answer.correct))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{RoomCode, RoomMeta, ScoresEntity};

    fn room() -> RoomEntity {
        RoomEntity {
            code: RoomCode::parse("AB12").unwrap(),
            state: Phase::Marking,
            round: 2,
            meta: RoomMeta {
                host_uid: Uuid::new_v4(),
                guest_uid: Some(Uuid::new_v4()),
                created_at: SystemTime::now(),
            },
            countdown: None,
            answers: Default::default(),
            marking: Default::default(),
            marking_ack: Default::default(),
            award_ack: Default::default(),
            scores: ScoresEntity::default(),
        }
    }

    fn answer(chosen: &str, correct: &str) -> AnswerEntity {
        AnswerEntity {
            question: "q".into(),
            chosen: chosen.into(),
            correct: correct.into(),
        }
    }

    #[test]
    fn absent_ack_reads_false() {
        let room = room();
        assert!(!ack(&room, AckKind::Marking, Role::Host, 2));
        assert!(!both_acked(&room, AckKind::Marking, 2));
    }

    #[test]
    fn both_acked_requires_both_roles() {
        let mut room = room();
        room.marking_ack.get_mut(Role::Host).insert(2, true);
        assert!(!both_acked(&room, AckKind::Marking, 2));
        room.marking_ack.get_mut(Role::Guest).insert(2, true);
        assert!(both_acked(&room, AckKind::Marking, 2));
    }

    #[test]
    fn acks_are_per_round() {
        let mut room = room();
        room.marking_ack.get_mut(Role::Host).insert(1, true);
        assert!(!ack(&room, AckKind::Marking, Role::Host, 2));
    }

    #[test]
    fn local_view_self_heals_to_marking_input() {
        let mut room = room();
        assert_eq!(
            local_view(&room, Role::Guest),
            LocalView::Input(Phase::Marking)
        );

        room.marking_ack.get_mut(Role::Guest).insert(2, true);
        assert_eq!(
            local_view(&room, Role::Guest),
            LocalView::Waiting(Phase::Marking)
        );
        // The peer's progress never changes the participant's own view.
        assert_eq!(
            local_view(&room, Role::Host),
            LocalView::Input(Phase::Marking)
        );
    }

    #[test]
    fn local_view_outside_ack_phases_follows_state() {
        let mut room = room();
        room.state = Phase::Questions;
        assert_eq!(
            local_view(&room, Role::Host),
            LocalView::Input(Phase::Questions)
        );
    }

    #[test]
    fn answers_complete_requires_three_per_side() {
        let mut room = room();
        let three = vec![answer("a", "a"), answer("b", "b"), answer("c", "c")];
        room.answers.get_mut(Role::Host).insert(2, three.clone());
        assert!(!answers_complete(&room, 2));
        room.answers.get_mut(Role::Guest).insert(2, three[..2].to_vec());
        assert!(!answers_complete(&room, 2));
        room.answers.get_mut(Role::Guest).insert(2, three);
        assert!(answers_complete(&room, 2));
    }

    #[test]
    fn normalization_ignores_case_and_whitespace() {
        assert_eq!(normalized("  Foo   Bar "), "foo bar");
        assert_eq!(normalized("FOO\tbar"), "foo bar");
    }

    #[test]
    fn correct_count_matches_normalized_answers() {
        let answers = vec![
            answer("Paris ", "paris"),
            answer("london", "Madrid"),
            answer("  new  york", "New York"),
        ];
        assert_eq!(correct_count(&answers), 2);
    }

    #[test]
    fn role_resolution() {
        let room = room();
        assert_eq!(role_of(&room, room.meta.host_uid), Some(Role::Host));
        assert_eq!(role_of(&room, room.meta.guest_uid.unwrap()), Some(Role::Guest));
        assert_eq!(role_of(&room, Uuid::new_v4()), None);
    }

    #[test]
    fn content_ready_needs_three_items_each() {
        use crate::dao::models::QuestionItemEntity;
        let item = QuestionItemEntity {
            prompt: "p".into(),
            choices: vec![],
            answer: "a".into(),
        };
        let mut record = RoundEntity::seeded(1, vec![item.clone(); 3], vec![item.clone(); 2]);
        assert!(!content_ready(&record));
        record.guest_items.push(item);
        assert!(content_ready(&record));
    }
}
