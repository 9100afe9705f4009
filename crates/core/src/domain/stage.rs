use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One phase of the council pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Draft,
    Questions,
    Refinement,
    /// Out-of-band divergence pass inserted between refinement rounds
    Diversify,
    CompatibilityCheck,
    Collaboration,
    CandidateSynthesis,
    Argumentation,
    AiVoting,
    AwaitingUserVote,
    AxiomAnalysis,
    FinalOutput,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Questions => "questions",
            Self::Refinement => "refinement",
            Self::Diversify => "diversify",
            Self::CompatibilityCheck => "compatibility_check",
            Self::Collaboration => "collaboration",
            Self::CandidateSynthesis => "candidate_synthesis",
            Self::Argumentation => "argumentation",
            Self::AiVoting => "ai_voting",
            Self::AwaitingUserVote => "awaiting_user_vote",
            Self::AxiomAnalysis => "axiom_analysis",
            Self::FinalOutput => "final_output",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "questions" => Some(Self::Questions),
            "refinement" => Some(Self::Refinement),
            "diversify" => Some(Self::Diversify),
            "compatibility_check" => Some(Self::CompatibilityCheck),
            "collaboration" => Some(Self::Collaboration),
            "candidate_synthesis" => Some(Self::CandidateSynthesis),
            "argumentation" => Some(Self::Argumentation),
            "ai_voting" => Some(Self::AiVoting),
            "awaiting_user_vote" => Some(Self::AwaitingUserVote),
            "axiom_analysis" => Some(Self::AxiomAnalysis),
            "final_output" => Some(Self::FinalOutput),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    /// Stages in which every worker slot produces one output.
    pub fn is_worker_stage(&self) -> bool {
        matches!(
            self,
            Self::Draft
                | Self::Refinement
                | Self::Diversify
                | Self::Collaboration
                | Self::Argumentation
        )
    }

    /// Stages that run for a configurable number of rounds.
    pub fn is_multi_round(&self) -> bool {
        matches!(
            self,
            Self::Refinement | Self::Collaboration | Self::Argumentation
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    AwaitingInput,
    Completed,
    Aborted,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingInput => "awaiting_input",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "awaiting_input" => Some(Self::AwaitingInput),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// `error` is not terminal: the session can be resumed from its last checkpoint.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// A suspension point where the engine waits for external input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    RoundFeedback { round: u32 },
    CollabFeedback { round: u32 },
    ArgumentFeedback { round: u32 },
    UserVote,
    FinalFeedback,
}

impl Checkpoint {
    /// Checkpoint that follows a completed round of `stage`, if any.
    pub fn after_round(stage: Stage, round: u32) -> Option<Self> {
        match stage {
            Stage::Refinement => Some(Self::RoundFeedback { round }),
            Stage::Collaboration => Some(Self::CollabFeedback { round }),
            Stage::Argumentation => Some(Self::ArgumentFeedback { round }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundFeedback { .. } => "round_feedback",
            Self::CollabFeedback { .. } => "collab_feedback",
            Self::ArgumentFeedback { .. } => "argument_feedback",
            Self::UserVote => "user_vote",
            Self::FinalFeedback => "final_feedback",
        }
    }

    pub fn round(&self) -> Option<u32> {
        match self {
            Self::RoundFeedback { round }
            | Self::CollabFeedback { round }
            | Self::ArgumentFeedback { round } => Some(*round),
            Self::UserVote | Self::FinalFeedback => None,
        }
    }

    /// Whether this checkpoint accepts per-worker round feedback.
    pub fn takes_round_feedback(&self) -> bool {
        self.round().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trip_names() {
        assert_eq!(Stage::CompatibilityCheck.as_str(), "compatibility_check");
        assert_eq!(Stage::parse("ai_voting"), Some(Stage::AiVoting));
        assert_eq!(Stage::parse("nope"), None);
    }

    #[test]
    fn test_worker_stages() {
        assert!(Stage::Draft.is_worker_stage());
        assert!(Stage::Diversify.is_worker_stage());
        assert!(!Stage::Questions.is_worker_stage());
        assert!(!Stage::AiVoting.is_worker_stage());
    }

    #[test]
    fn test_error_status_is_resumable() {
        assert!(!SessionStatus::Error.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
    }

    #[test]
    fn test_checkpoint_after_round() {
        assert_eq!(
            Checkpoint::after_round(Stage::Argumentation, 2),
            Some(Checkpoint::ArgumentFeedback { round: 2 })
        );
        assert_eq!(Checkpoint::after_round(Stage::Draft, 1), None);
        assert!(!Checkpoint::UserVote.takes_round_feedback());
    }

    #[test]
    fn test_checkpoint_serialization() {
        let json = serde_json::to_string(&Checkpoint::CollabFeedback { round: 1 }).unwrap();
        assert_eq!(json, r#"{"kind":"collab_feedback","round":1}"#);
    }
}
