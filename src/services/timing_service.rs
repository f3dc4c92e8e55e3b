//! Timing capture for the snippet race.
//!
//! Two instants are recorded per participant per round: when answering
//! finished (`qDoneMs`) and when judging finished (`markDoneMs`). Writes
//! are merge-only (a present value is never overwritten) so duplicate or
//! out-of-order submissions are harmless, and every write is mirrored into
//! the participant's player record so a delayed round-record write can be
//! repaired later.

use uuid::Uuid;

use crate::dao::models::{Role, RoomBundle, RoundEntity, TimingEntity};

/// Record the answer-submission instant for a participant, creating the
/// timing slots on first touch.
pub fn record_answer_done(bundle: &mut RoomBundle, uid: Uuid, role: Role, round: u8, at_ms: i64) {
    let record = bundle
        .rounds
        .entry(round)
        .or_insert_with(|| RoundEntity::seeded(round, Vec::new(), Vec::new()));
    let timing = record
        .timings
        .entry(uid)
        .or_insert_with(|| TimingEntity::empty(role));
    if timing.q_done_ms.is_none() {
        timing.q_done_ms = Some(at_ms);
    }
    let snapshot = *timing;

    mirror_to_player(bundle, uid, role, round, snapshot);
}

/// Record the judging-submission instant and derive `totalMs` against the
/// round's countdown baseline, clamped non-negative.
///
/// If the round record is missing the participant's `qDoneMs` at this
/// point, the denormalized player-record copy is used to repair it.
pub fn record_marking_done(
    bundle: &mut RoomBundle,
    uid: Uuid,
    role: Role,
    round: u8,
    at_ms: i64,
    countdown_start_at: Option<i64>,
) {
    let mirrored_q_done = bundle
        .players
        .get(&uid)
        .and_then(|player| player.rounds.get(&round))
        .and_then(|timing| timing.q_done_ms);

    let record = bundle
        .rounds
        .entry(round)
        .or_insert_with(|| RoundEntity::seeded(round, Vec::new(), Vec::new()));
    let timing = record
        .timings
        .entry(uid)
        .or_insert_with(|| TimingEntity::empty(role));

    if timing.q_done_ms.is_none() {
        timing.q_done_ms = mirrored_q_done;
    }
    if timing.mark_done_ms.is_none() {
        timing.mark_done_ms = Some(at_ms);
    }
    if timing.total_ms.is_none() {
        if let (Some(done), Some(start)) = (timing.mark_done_ms, countdown_start_at) {
            timing.total_ms = Some((done - start).max(0));
        }
    }
    let snapshot = *timing;

    mirror_to_player(bundle, uid, role, round, snapshot);
}

/// Merge a timing snapshot into the participant's player record, never
/// clearing an already-present field.
fn mirror_to_player(
    bundle: &mut RoomBundle,
    uid: Uuid,
    role: Role,
    round: u8,
    snapshot: TimingEntity,
) {
    let player = bundle.player_mut(uid, role);
    let mirror = player
        .rounds
        .entry(round)
        .or_insert_with(|| TimingEntity::empty(role));
    if mirror.q_done_ms.is_none() {
        mirror.q_done_ms = snapshot.q_done_ms;
    }
    if mirror.mark_done_ms.is_none() {
        mirror.mark_done_ms = snapshot.mark_done_ms;
    }
    if mirror.total_ms.is_none() {
        mirror.total_ms = snapshot.total_ms;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{
        Phase, RoomCode, RoomEntity, RoomMeta, ScoresEntity,
    };

    fn bundle_with_round() -> (RoomBundle, Uuid) {
        let uid = Uuid::new_v4();
        let room = RoomEntity {
            code: RoomCode::parse("AB12").unwrap(),
            state: Phase::Questions,
            round: 1,
            meta: RoomMeta {
                host_uid: uid,
                guest_uid: None,
                created_at: SystemTime::now(),
            },
            countdown: None,
            answers: Default::default(),
            marking: Default::default(),
            marking_ack: Default::default(),
            award_ack: Default::default(),
            scores: ScoresEntity::default(),
        };
        let mut rounds = BTreeMap::new();
        rounds.insert(1, RoundEntity::seeded(1, Vec::new(), Vec::new()));
        (
            RoomBundle {
                room,
                rounds,
                players: BTreeMap::new(),
            },
            uid,
        )
    }

    #[test]
    fn first_answer_instant_wins() {
        let (mut bundle, uid) = bundle_with_round();
        record_answer_done(&mut bundle, uid, Role::Host, 1, 1_000);
        record_answer_done(&mut bundle, uid, Role::Host, 1, 9_999);

        let timing = bundle.rounds[&1].timings[&uid];
        assert_eq!(timing.q_done_ms, Some(1_000));
        // Mirror is created lazily and carries the same value.
        assert_eq!(bundle.players[&uid].rounds[&1].q_done_ms, Some(1_000));
    }

    #[test]
    fn total_is_mark_done_minus_countdown_start() {
        let (mut bundle, uid) = bundle_with_round();
        record_marking_done(&mut bundle, uid, Role::Host, 1, 12_500, Some(2_000));

        let timing = bundle.rounds[&1].timings[&uid];
        assert_eq!(timing.mark_done_ms, Some(12_500));
        assert_eq!(timing.total_ms, Some(10_500));
    }

    #[test]
    fn total_clamps_to_zero_when_clocks_disagree() {
        let (mut bundle, uid) = bundle_with_round();
        record_marking_done(&mut bundle, uid, Role::Host, 1, 1_000, Some(5_000));
        assert_eq!(bundle.rounds[&1].timings[&uid].total_ms, Some(0));
    }

    #[test]
    fn missing_countdown_leaves_total_unset() {
        let (mut bundle, uid) = bundle_with_round();
        record_marking_done(&mut bundle, uid, Role::Host, 1, 1_000, None);
        assert_eq!(bundle.rounds[&1].timings[&uid].total_ms, None);
    }

    #[test]
    fn q_done_repaired_from_player_mirror() {
        let (mut bundle, uid) = bundle_with_round();
        record_answer_done(&mut bundle, uid, Role::Host, 1, 3_000);
        // Simulate the round-record write being lost: wipe the round copy
        // but keep the player mirror.
        bundle.rounds.get_mut(&1).unwrap().timings.clear();

        record_marking_done(&mut bundle, uid, Role::Host, 1, 8_000, Some(2_000));

        let timing = bundle.rounds[&1].timings[&uid];
        assert_eq!(timing.q_done_ms, Some(3_000));
        assert_eq!(timing.total_ms, Some(6_000));
    }

    #[test]
    fn duplicate_marking_write_is_a_no_op() {
        let (mut bundle, uid) = bundle_with_round();
        record_marking_done(&mut bundle, uid, Role::Host, 1, 8_000, Some(2_000));
        record_marking_done(&mut bundle, uid, Role::Host, 1, 9_000, Some(2_000));

        let timing = bundle.rounds[&1].timings[&uid];
        assert_eq!(timing.mark_done_ms, Some(8_000));
        assert_eq!(timing.total_ms, Some(6_000));
    }
}
