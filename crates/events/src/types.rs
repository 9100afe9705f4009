//! Event types streamed to council clients

use chrono::{DateTime, Utc};
use council_core::{
    AxiomNetwork, AxiomSet, Candidate, Checkpoint, CompatibilityReport, MachineScore,
    QuestionSet, Stage, StageOutput, VoteOutcome,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope wrapping all events with ordering and attribution metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Per-session sequence number, starting at 1
    pub seq: u64,
    pub session_id: Uuid,
    /// Stage the event belongs to
    pub stage: Stage,
    pub round: u32,
    /// Worker slot the event belongs to, if any
    pub worker_id: Option<String>,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create an envelope; the sequence number is assigned by the publisher.
    pub fn new(session_id: Uuid, stage: Stage, round: u32, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            session_id,
            stage,
            round,
            worker_id: None,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn for_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

/// Closed set of progress events
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StageStart,

    WorkerStart {
        persona_id: String,
        persona_name: String,
    },

    /// Carries a draft, refinement, argument, diversified, or collaboration output
    WorkerComplete { output: StageOutput },

    SynthCommentary { text: String },

    StageComplete { payload: StagePayload },

    TokensUpdate {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
    },

    MemoryWarning { message: String },

    AwaitingRoundFeedback { round: u32 },

    AwaitingCollabFeedback { round: u32 },

    AwaitingArgumentFeedback { round: u32 },

    /// Waiting for the vote or for final feedback
    AwaitingUserInput { checkpoint: Checkpoint },

    AxiomExtracted { set: AxiomSet },

    FinalOutput {
        text: String,
        winner: Option<String>,
    },

    Error { code: String, message: String },

    Complete,
}

/// Cross-worker artifacts published when a synthesizer stage completes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    Questions { questions: QuestionSet },
    Compatibility { report: CompatibilityReport },
    Candidates { candidates: Vec<Candidate> },
    Scores { scores: Vec<MachineScore> },
    Vote { outcome: VoteOutcome },
    AxiomNetwork { network: AxiomNetwork },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StageStart => "stage_start",
            Event::WorkerStart { .. } => "worker_start",
            Event::WorkerComplete { .. } => "worker_complete",
            Event::SynthCommentary { .. } => "synth_commentary",
            Event::StageComplete { .. } => "stage_complete",
            Event::TokensUpdate { .. } => "tokens_update",
            Event::MemoryWarning { .. } => "memory_warning",
            Event::AwaitingRoundFeedback { .. } => "awaiting_round_feedback",
            Event::AwaitingCollabFeedback { .. } => "awaiting_collab_feedback",
            Event::AwaitingArgumentFeedback { .. } => "awaiting_argument_feedback",
            Event::AwaitingUserInput { .. } => "awaiting_user_input",
            Event::AxiomExtracted { .. } => "axiom_extracted",
            Event::FinalOutput { .. } => "final_output",
            Event::Error { .. } => "error",
            Event::Complete => "complete",
        }
    }

    /// The suspension event announcing `checkpoint`.
    pub fn awaiting(checkpoint: Checkpoint) -> Self {
        match checkpoint {
            Checkpoint::RoundFeedback { round } => Event::AwaitingRoundFeedback { round },
            Checkpoint::CollabFeedback { round } => Event::AwaitingCollabFeedback { round },
            Checkpoint::ArgumentFeedback { round } => Event::AwaitingArgumentFeedback { round },
            Checkpoint::UserVote | Checkpoint::FinalFeedback => {
                Event::AwaitingUserInput { checkpoint }
            }
        }
    }

    /// Events after which a run stream closes.
    pub fn ends_stream(&self) -> bool {
        matches!(
            self,
            Event::Complete
                | Event::Error { .. }
                | Event::AwaitingRoundFeedback { .. }
                | Event::AwaitingCollabFeedback { .. }
                | Event::AwaitingArgumentFeedback { .. }
                | Event::AwaitingUserInput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let session_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(session_id, Stage::Draft, 1, Event::StageStart)
            .for_worker("worker_2");

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.session_id, session_id);
        assert_eq!(envelope.worker_id.as_deref(), Some("worker_2"));
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::AwaitingArgumentFeedback { round: 2 };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"awaiting_argument_feedback","round":2}"#);
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"error","code":"upstream_generation_error","message":"timeout"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::Error { code, message } => {
                assert_eq!(code, "upstream_generation_error");
                assert_eq!(message, "timeout");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let events = [
            Event::StageStart,
            Event::Complete,
            Event::SynthCommentary {
                text: "x".to_string(),
            },
            Event::awaiting(Checkpoint::UserVote),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn test_awaiting_mapping() {
        assert!(matches!(
            Event::awaiting(Checkpoint::CollabFeedback { round: 1 }),
            Event::AwaitingCollabFeedback { round: 1 }
        ));
        assert!(matches!(
            Event::awaiting(Checkpoint::FinalFeedback),
            Event::AwaitingUserInput {
                checkpoint: Checkpoint::FinalFeedback
            }
        ));
    }

    #[test]
    fn test_ends_stream() {
        assert!(Event::Complete.ends_stream());
        assert!(Event::awaiting(Checkpoint::RoundFeedback { round: 1 }).ends_stream());
        assert!(!Event::StageStart.ends_stream());
        assert!(!Event::FinalOutput {
            text: String::new(),
            winner: None
        }
        .ends_stream());
    }
}
