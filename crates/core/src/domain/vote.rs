use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Candidate;
use crate::error::{CoreError, CoreResult};

pub const MAX_PROMPT_RATING: u8 = 5;

/// Human vote for a session. Every field is optional; rank 0 means skip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct VoteSubmission {
    #[serde(default)]
    pub ranks: BTreeMap<String, u32>,
    #[serde(default)]
    pub candidate_feedback: BTreeMap<String, String>,
    #[serde(default)]
    pub worker_feedback: BTreeMap<String, String>,
    #[serde(default)]
    pub synthesizer_feedback: String,
    #[serde(default)]
    pub overall_feedback: String,
    /// 1–5, 0 when not given
    #[serde(default)]
    pub prompt_rating: u8,
    #[serde(default)]
    pub prompt_feedback: String,
    /// Candidate the user picks regardless of scores
    #[serde(default)]
    pub user_override: Option<String>,
}

impl VoteSubmission {
    pub fn validate(&self, candidates: &[Candidate]) -> CoreResult<()> {
        if self.prompt_rating > MAX_PROMPT_RATING {
            return Err(CoreError::Validation(format!(
                "prompt_rating must be within [0, {}]",
                MAX_PROMPT_RATING
            )));
        }

        let known: BTreeSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let k = candidates.len() as u32;
        let mut seen = BTreeSet::new();

        for (candidate_id, rank) in &self.ranks {
            if !known.contains(candidate_id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "unknown candidate in ranks: {}",
                    candidate_id
                )));
            }
            if *rank > k {
                return Err(CoreError::Validation(format!(
                    "rank {} for {} exceeds candidate count {}",
                    rank, candidate_id, k
                )));
            }
            if *rank > 0 && !seen.insert(*rank) {
                return Err(CoreError::Validation(format!("rank {} assigned twice", rank)));
            }
        }

        if let Some(ref choice) = self.user_override {
            if !known.contains(choice.as_str()) {
                return Err(CoreError::Validation(format!(
                    "override names unknown candidate: {}",
                    choice
                )));
            }
        }

        Ok(())
    }

    /// All free-text feedback in the vote, labelled by where it was given.
    pub fn feedback_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (id, text) in &self.candidate_feedback {
            push_labelled(&mut lines, &format!("candidate {}", id), text);
        }
        for (id, text) in &self.worker_feedback {
            push_labelled(&mut lines, id, text);
        }
        push_labelled(&mut lines, "synthesizer", &self.synthesizer_feedback);
        push_labelled(&mut lines, "overall", &self.overall_feedback);
        push_labelled(&mut lines, "prompt", &self.prompt_feedback);
        lines
    }
}

fn push_labelled(lines: &mut Vec<String>, label: &str, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        lines.push(format!("[{}] {}", label, text));
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum WinningReason {
    UserOverride,
    /// Machine and human rankings put the same candidate first
    Agreement,
    HumanPreference,
    MachinePreference,
    CombinedScore,
    /// No candidates; the final output is derived from feedback alone
    FeedbackOnly,
}

impl WinningReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::UserOverride => "User override",
            Self::Agreement => "AI and user agree",
            Self::HumanPreference => "User preference",
            Self::MachinePreference => "AI preference",
            Self::CombinedScore => "Combined score optimization",
            Self::FeedbackOnly => "Feedback only",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct CandidateStanding {
    pub candidate_id: String,
    pub machine_score: f64,
    pub human_score: f64,
    pub combined_score: f64,
    /// Human rank, `None` when skipped or unranked
    pub rank: Option<u32>,
}

impl CandidateStanding {
    pub fn skipped(&self) -> bool {
        self.rank.is_none()
    }
}

/// Aggregated result: standings best-first, plus the winner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct VoteOutcome {
    pub standings: Vec<CandidateStanding>,
    pub winner: Option<String>,
    pub reason: WinningReason,
}
