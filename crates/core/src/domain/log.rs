use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    AxiomNetwork, AxiomSet, Candidate, Checkpoint, CompatibilityReport, MachineScore, Persona,
    PersonaRef, QuestionSet, SessionConfig, Stage, StageOutput, SwapMode, TokenUsage,
    VoteOutcome, VoteSubmission,
};

/// The state change a log entry records. Replaying these in order through
/// [`super::Session::apply`] rebuilds a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    SessionStarted {
        prompt: String,
        config: SessionConfig,
        /// Persona bound to each slot, in slot order
        bindings: Vec<Persona>,
    },
    StageStarted {
        stage: Stage,
        round: u32,
    },
    WorkerOutput {
        slot_id: String,
        output: StageOutput,
    },
    QuestionsAsked {
        questions: QuestionSet,
    },
    Commentary {
        text: String,
    },
    CompatibilityJudged {
        report: CompatibilityReport,
    },
    CandidatesSynthesized {
        candidates: Vec<Candidate>,
    },
    ScoresAssigned {
        scores: Vec<MachineScore>,
    },
    RefinementConverged {
        similarity: f64,
    },
    StageCompleted {
        stage: Stage,
        round: u32,
    },
    CheckpointReached {
        checkpoint: Checkpoint,
    },
    FeedbackReceived {
        checkpoint: Checkpoint,
        #[serde(default)]
        worker_feedback: BTreeMap<String, String>,
        #[serde(default)]
        skip: bool,
    },
    PersonaSwapped {
        slot_id: String,
        from: PersonaRef,
        to: PersonaRef,
        mode: SwapMode,
    },
    VoteSubmitted {
        vote: VoteSubmission,
        outcome: VoteOutcome,
    },
    AxiomsExtracted {
        set: AxiomSet,
    },
    AxiomNetworkBuilt {
        network: AxiomNetwork,
    },
    FinalOutputProduced {
        text: String,
    },
    FinalFeedbackReceived {
        text: String,
    },
    /// A failed run; the session stays resumable from its last checkpoint
    RunFailed {
        code: String,
        message: String,
    },
    RunResumed,
    SessionAborted {
        reason: String,
    },
    SessionCompleted,
}

impl LogRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::StageStarted { .. } => "stage_started",
            Self::WorkerOutput { .. } => "worker_output",
            Self::QuestionsAsked { .. } => "questions_asked",
            Self::Commentary { .. } => "commentary",
            Self::CompatibilityJudged { .. } => "compatibility_judged",
            Self::CandidatesSynthesized { .. } => "candidates_synthesized",
            Self::ScoresAssigned { .. } => "scores_assigned",
            Self::RefinementConverged { .. } => "refinement_converged",
            Self::StageCompleted { .. } => "stage_completed",
            Self::CheckpointReached { .. } => "checkpoint_reached",
            Self::FeedbackReceived { .. } => "feedback_received",
            Self::PersonaSwapped { .. } => "persona_swapped",
            Self::VoteSubmitted { .. } => "vote_submitted",
            Self::AxiomsExtracted { .. } => "axioms_extracted",
            Self::AxiomNetworkBuilt { .. } => "axiom_network_built",
            Self::FinalOutputProduced { .. } => "final_output_produced",
            Self::FinalFeedbackReceived { .. } => "final_feedback_received",
            Self::RunFailed { .. } => "run_failed",
            Self::RunResumed => "run_resumed",
            Self::SessionAborted { .. } => "session_aborted",
            Self::SessionCompleted => "session_completed",
        }
    }
}

/// One immutable line of a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct LogEntry {
    /// 1-based, contiguous per session
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    /// Session stage once this entry has been applied
    pub stage: Stage,
    pub round: u32,
    /// `worker_N`, `synthesizer`, `user` or `engine`
    pub agent_id: String,
    pub persona_id: Option<String>,
    pub persona_name: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Human-readable text of the step (agent output, feedback, reason)
    pub content: String,
    /// Score or vote attached to this step, if any
    #[cfg_attr(feature = "typescript", ts(type = "unknown"))]
    #[schema(value_type = Option<Object>)]
    pub vote: Option<serde_json::Value>,
    pub record: LogRecord,
}

pub const ENGINE_AGENT: &str = "engine";
pub const SYNTHESIZER_AGENT: &str = "synthesizer";
pub const USER_AGENT: &str = "user";

/// Builder for the attribution fields of an entry before it is sequenced.
#[derive(Debug, Clone)]
pub struct LogDraft {
    pub agent_id: String,
    pub persona: Option<PersonaRef>,
    pub tokens: TokenUsage,
    pub content: String,
    pub vote: Option<serde_json::Value>,
    pub record: LogRecord,
}

impl LogDraft {
    pub fn engine(record: LogRecord) -> Self {
        Self::by(ENGINE_AGENT, record)
    }

    pub fn by(agent_id: impl Into<String>, record: LogRecord) -> Self {
        Self {
            agent_id: agent_id.into(),
            persona: None,
            tokens: TokenUsage::default(),
            content: String::new(),
            vote: None,
            record,
        }
    }

    pub fn with_persona(mut self, persona: PersonaRef) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_vote(mut self, vote: serde_json::Value) -> Self {
        self.vote = Some(vote);
        self
    }

    /// Fix the entry's position. `stage` and `round` are filled in by the
    /// session after the record is applied.
    pub fn into_entry(self, session_id: Uuid, seq: u64) -> LogEntry {
        let (persona_id, persona_name) = match self.persona {
            Some(p) => (Some(p.id), Some(p.name)),
            None => (None, None),
        };
        LogEntry {
            seq,
            timestamp: Utc::now(),
            session_id,
            stage: Stage::default(),
            round: 0,
            agent_id: self.agent_id,
            persona_id,
            persona_name,
            input_tokens: self.tokens.input_tokens,
            output_tokens: self.tokens.output_tokens,
            content: self.content,
            vote: self.vote,
            record: self.record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_as_single_line() {
        let entry = LogDraft::by(
            "worker_1",
            LogRecord::Commentary {
                text: "multi\nline".to_string(),
            },
        )
        .with_persona(PersonaRef {
            id: "skeptic".to_string(),
            name: "The Skeptic".to_string(),
        })
        .with_content("multi\nline")
        .into_entry(Uuid::new_v4(), 1);

        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""type":"commentary""#));
        assert!(line.contains(r#""persona_name":"The Skeptic""#));

        let parsed: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_record_kind() {
        assert_eq!(LogRecord::RunResumed.kind(), "run_resumed");
        assert_eq!(
            LogRecord::StageStarted {
                stage: Stage::Draft,
                round: 1
            }
            .kind(),
            "stage_started"
        );
    }
}
