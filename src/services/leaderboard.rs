//! Leaderboard ranking.

use crate::types::Participant;
use std::cmp::Ordering;

/// Order participants by total return (profit % + multiplier bonus),
/// highest first, and number them 1..N.
///
/// Ties go to the earlier entrant, then to the lower user id, so the
/// result depends only on the input snapshots.
pub fn rank(mut participants: Vec<Participant>) -> Vec<Participant> {
    participants.sort_by(compare);
    for (i, participant) in participants.iter_mut().enumerate() {
        participant.rank = i as u32 + 1;
    }
    participants
}

fn compare(a: &Participant, b: &Participant) -> Ordering {
    b.total_return()
        .total_cmp(&a.total_return())
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.user_id.cmp(&b.user_id))
}
