//! Merges machine scores and the human vote into one ranking.
//!
//! `combined = machine * 0.4 + human * 0.6`. A human rank `r` out of `k`
//! candidates normalizes to `10 * (k - r + 1) / k`; a skipped or missing
//! rank counts as 0. Ties go to the candidate that was ranked rather than
//! skipped, then to the one synthesized first.

use std::cmp::Ordering;

use council_core::{
    Candidate, CandidateStanding, MachineScore, VoteOutcome, VoteSubmission, WinningReason,
};

const MACHINE_WEIGHT: f64 = 4.0;
const HUMAN_WEIGHT: f64 = 6.0;
const WEIGHT_TOTAL: f64 = 10.0;

pub fn human_score(rank: Option<u32>, candidate_count: usize) -> f64 {
    match rank {
        Some(r) if r >= 1 && (r as usize) <= candidate_count => {
            let k = candidate_count as f64;
            10.0 * (k - r as f64 + 1.0) / k
        }
        _ => 0.0,
    }
}

pub fn combined_score(machine: f64, human: f64) -> f64 {
    (machine * MACHINE_WEIGHT + human * HUMAN_WEIGHT) / WEIGHT_TOTAL
}

pub fn aggregate(
    candidates: &[Candidate],
    scores: &[MachineScore],
    vote: &VoteSubmission,
) -> VoteOutcome {
    if candidates.is_empty() {
        return VoteOutcome {
            standings: Vec::new(),
            winner: None,
            reason: WinningReason::FeedbackOnly,
        };
    }

    let k = candidates.len();
    let mut standings: Vec<(usize, CandidateStanding)> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let machine = scores
                .iter()
                .find(|s| s.candidate_id == candidate.id)
                .map(|s| s.score)
                .unwrap_or(0.0);
            let rank = vote
                .ranks
                .get(&candidate.id)
                .copied()
                .filter(|r| *r > 0);
            let human = human_score(rank, k);
            (
                index,
                CandidateStanding {
                    candidate_id: candidate.id.clone(),
                    machine_score: machine,
                    human_score: human,
                    combined_score: combined_score(machine, human),
                    rank,
                },
            )
        })
        .collect();

    let any_ranked = standings.iter().any(|(_, s)| !s.skipped());
    if any_ranked {
        standings.sort_by(|(ia, a), (ib, b)| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.skipped().cmp(&b.skipped()))
                .then_with(|| ia.cmp(ib))
        });
    } else {
        standings.sort_by(|(ia, a), (ib, b)| by_machine(a, b).then_with(|| ia.cmp(ib)));
    }
    let standings: Vec<CandidateStanding> = standings.into_iter().map(|(_, s)| s).collect();

    let machine_top = candidates
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            let sa = standing_for(&standings, &a.id).map(|s| s.machine_score);
            let sb = standing_for(&standings, &b.id).map(|s| s.machine_score);
            sa.unwrap_or(0.0)
                .total_cmp(&sb.unwrap_or(0.0))
                .then_with(|| ib.cmp(ia))
        })
        .map(|(_, c)| c.id.clone());
    let human_top = standings
        .iter()
        .find(|s| s.rank == Some(1))
        .map(|s| s.candidate_id.clone());

    if let Some(choice) = vote
        .user_override
        .as_ref()
        .filter(|choice| candidates.iter().any(|c| &c.id == *choice))
    {
        return VoteOutcome {
            winner: Some(choice.clone()),
            reason: WinningReason::UserOverride,
            standings,
        };
    }

    let winner = standings.first().map(|s| s.candidate_id.clone());
    let reason = if !any_ranked {
        WinningReason::MachinePreference
    } else if human_top.is_some() && human_top == machine_top && winner == human_top {
        WinningReason::Agreement
    } else if winner == human_top {
        WinningReason::HumanPreference
    } else if winner == machine_top {
        WinningReason::MachinePreference
    } else {
        WinningReason::CombinedScore
    };

    VoteOutcome {
        standings,
        winner,
        reason,
    }
}

fn by_machine(a: &CandidateStanding, b: &CandidateStanding) -> Ordering {
    b.machine_score.total_cmp(&a.machine_score)
}

fn standing_for<'a>(standings: &'a [CandidateStanding], id: &str) -> Option<&'a CandidateStanding> {
    standings.iter().find(|s| s.candidate_id == id)
}
