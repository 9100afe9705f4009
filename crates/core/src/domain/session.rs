use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    AxiomNetwork, AxiomSet, Candidate, Checkpoint, CompatibilityReport, LogEntry, LogRecord,
    MachineScore, PersonaRef, QuestionSet, SessionConfig, SessionStatus, Stage, StageMark,
    SwapMode, TokenUsage, VoteOutcome, VoteSubmission, WorkerSlot,
};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StageRecord {
    pub stage: Stage,
    pub round: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RoundFeedback {
    pub checkpoint: Checkpoint,
    pub worker_feedback: BTreeMap<String, String>,
    pub skip: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Commentary {
    pub stage: Stage,
    pub round: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SessionError {
    pub code: String,
    pub message: String,
}

/// Full state of one council session.
///
/// Only [`Session::apply`] mutates a session, one log entry at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Session {
    pub id: Uuid,
    pub prompt: String,
    pub config: SessionConfig,
    pub current_stage: Stage,
    pub round: u32,
    /// True between a stage's start and its completion
    pub stage_in_progress: bool,
    pub status: SessionStatus,
    pub checkpoint: Option<Checkpoint>,
    pub history: Vec<StageRecord>,
    pub slots: Vec<WorkerSlot>,
    pub questions: QuestionSet,
    pub commentary: Vec<Commentary>,
    pub compatibility: Option<CompatibilityReport>,
    /// `None` until candidate synthesis ran; may be empty afterwards
    pub candidates: Option<Vec<Candidate>>,
    pub scores: Vec<MachineScore>,
    pub feedback: Vec<RoundFeedback>,
    /// Set by a "skip remaining rounds" resume, cleared when the next stage starts
    pub skip_requested: bool,
    pub converged: bool,
    pub vote: Option<VoteSubmission>,
    pub outcome: Option<VoteOutcome>,
    pub axioms: Vec<AxiomSet>,
    pub axiom_network: Option<AxiomNetwork>,
    pub final_output: Option<String>,
    pub final_feedback: Option<String>,
    pub last_error: Option<SessionError>,
    pub tokens: TokenUsage,
    /// Where a diversify pass returns to when it completes
    #[serde(default)]
    pub resume_point: Option<StageMark>,
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build a session from its first log entry.
    pub fn start(entry: &LogEntry) -> CoreResult<Self> {
        let LogRecord::SessionStarted {
            prompt,
            config,
            bindings,
        } = &entry.record
        else {
            return Err(CoreError::InvalidLog(format!(
                "first entry must be session_started, got {}",
                entry.record.kind()
            )));
        };

        if entry.seq != 1 {
            return Err(CoreError::InvalidLog(format!(
                "session_started must have seq 1, got {}",
                entry.seq
            )));
        }
        if bindings.len() != config.worker_count {
            return Err(CoreError::InvalidLog(format!(
                "{} persona bindings for {} workers",
                bindings.len(),
                config.worker_count
            )));
        }

        let slots = config
            .slot_ids()
            .into_iter()
            .zip(bindings.iter())
            .map(|(id, persona)| WorkerSlot::new(id, PersonaRef::from(persona)))
            .collect();

        Ok(Self {
            id: entry.session_id,
            prompt: prompt.clone(),
            config: config.clone(),
            current_stage: Stage::Draft,
            round: 0,
            stage_in_progress: false,
            status: SessionStatus::Active,
            checkpoint: None,
            history: Vec::new(),
            slots,
            questions: QuestionSet::default(),
            commentary: Vec::new(),
            compatibility: None,
            candidates: None,
            scores: Vec::new(),
            feedback: Vec::new(),
            skip_requested: false,
            converged: false,
            vote: None,
            outcome: None,
            axioms: Vec::new(),
            axiom_network: None,
            final_output: None,
            final_feedback: None,
            last_error: None,
            tokens: TokenUsage::default(),
            resume_point: None,
            last_seq: entry.seq,
            created_at: entry.timestamp,
            updated_at: entry.timestamp,
        })
    }

    /// Rebuild a session from a complete, ordered log.
    pub fn replay(entries: &[LogEntry]) -> CoreResult<Self> {
        let (first, rest) = entries
            .split_first()
            .ok_or_else(|| CoreError::InvalidLog("empty log".to_string()))?;
        let mut session = Self::start(first)?;
        for entry in rest {
            session.apply(entry)?;
        }
        Ok(session)
    }

    /// Apply the next log entry.
    pub fn apply(&mut self, entry: &LogEntry) -> CoreResult<()> {
        if entry.session_id != self.id {
            return Err(CoreError::InvalidLog(format!(
                "entry for session {} applied to {}",
                entry.session_id, self.id
            )));
        }
        if entry.seq != self.last_seq + 1 {
            return Err(CoreError::InvalidLog(format!(
                "expected seq {}, got {}",
                self.last_seq + 1,
                entry.seq
            )));
        }
        if self.status.is_terminal() {
            return Err(CoreError::InvalidLog(format!(
                "session already {}; cannot apply {}",
                self.status.as_str(),
                entry.record.kind()
            )));
        }

        match &entry.record {
            LogRecord::SessionStarted { .. } => {
                return Err(CoreError::InvalidLog(
                    "session_started may only appear first".to_string(),
                ));
            }
            LogRecord::StageStarted { stage, round } => {
                if *stage == Stage::Diversify {
                    self.resume_point = Some(StageMark {
                        stage: self.current_stage,
                        round: self.round,
                    });
                } else if *stage != self.current_stage {
                    self.skip_requested = false;
                }
                self.current_stage = *stage;
                self.round = *round;
                self.stage_in_progress = true;
                self.checkpoint = None;
                self.status = SessionStatus::Active;
                self.history.push(StageRecord {
                    stage: *stage,
                    round: *round,
                    started_at: entry.timestamp,
                    completed_at: None,
                });
            }
            LogRecord::WorkerOutput { slot_id, output } => {
                let slot = self.slot_mut(slot_id)?;
                slot.record(output.clone());
            }
            LogRecord::QuestionsAsked { questions } => {
                self.questions = questions.clone();
            }
            LogRecord::Commentary { text } => {
                self.commentary.push(Commentary {
                    stage: self.current_stage,
                    round: self.round,
                    text: text.clone(),
                });
            }
            LogRecord::CompatibilityJudged { report } => {
                self.compatibility = Some(report.clone());
            }
            LogRecord::CandidatesSynthesized { candidates } => {
                self.candidates = Some(candidates.clone());
            }
            LogRecord::ScoresAssigned { scores } => {
                self.scores = scores.clone();
            }
            LogRecord::RefinementConverged { .. } => {
                self.converged = true;
            }
            LogRecord::StageCompleted { stage, round } => {
                self.stage_in_progress = false;
                if let Some(record) = self
                    .history
                    .iter_mut()
                    .rev()
                    .find(|r| r.stage == *stage && r.round == *round && r.completed_at.is_none())
                {
                    record.completed_at = Some(entry.timestamp);
                }
                if *stage == Stage::Diversify {
                    if let Some(point) = self.resume_point.take() {
                        self.current_stage = point.stage;
                        self.round = point.round;
                    }
                }
            }
            LogRecord::CheckpointReached { checkpoint } => {
                self.checkpoint = Some(*checkpoint);
                self.status = SessionStatus::AwaitingInput;
            }
            LogRecord::FeedbackReceived {
                checkpoint,
                worker_feedback,
                skip,
            } => {
                self.checkpoint = None;
                self.status = SessionStatus::Active;
                if *skip {
                    self.skip_requested = true;
                }
                self.feedback.push(RoundFeedback {
                    checkpoint: *checkpoint,
                    worker_feedback: worker_feedback.clone(),
                    skip: *skip,
                    received_at: entry.timestamp,
                });
            }
            LogRecord::PersonaSwapped {
                slot_id, to, mode, ..
            } => {
                let stage = self.current_stage;
                let round = self.round;
                let slot = self.slot_mut(slot_id)?;
                slot.rebind(to.clone(), *mode);
                // A restarted slot owes the current worker stage another run.
                if *mode == SwapMode::Restart && stage.is_worker_stage() && round > 0 {
                    self.stage_in_progress = true;
                }
            }
            LogRecord::VoteSubmitted { vote, outcome } => {
                self.vote = Some(vote.clone());
                self.outcome = Some(outcome.clone());
                self.checkpoint = None;
                self.status = SessionStatus::Active;
            }
            LogRecord::AxiomsExtracted { set } => {
                let key = set.source.key().to_string();
                self.axioms.retain(|s| s.source.key() != key);
                self.axioms.push(set.clone());
            }
            LogRecord::AxiomNetworkBuilt { network } => {
                self.axiom_network = Some(network.clone());
            }
            LogRecord::FinalOutputProduced { text } => {
                self.final_output = Some(text.clone());
            }
            LogRecord::FinalFeedbackReceived { text } => {
                self.final_feedback = Some(text.clone());
                self.checkpoint = None;
                self.status = SessionStatus::Active;
            }
            LogRecord::RunFailed { code, message } => {
                self.status = SessionStatus::Error;
                self.last_error = Some(SessionError {
                    code: code.clone(),
                    message: message.clone(),
                });
            }
            LogRecord::RunResumed => {
                self.last_error = None;
                self.status = if self.checkpoint.is_some() {
                    SessionStatus::AwaitingInput
                } else {
                    SessionStatus::Active
                };
            }
            LogRecord::SessionAborted { .. } => {
                self.status = SessionStatus::Aborted;
                self.checkpoint = None;
            }
            LogRecord::SessionCompleted => {
                self.status = SessionStatus::Completed;
                self.stage_in_progress = false;
                self.checkpoint = None;
                if let Some(record) = self.history.last_mut() {
                    if record.completed_at.is_none() {
                        record.completed_at = Some(entry.timestamp);
                    }
                }
            }
        }

        self.tokens
            .add(TokenUsage::new(entry.input_tokens, entry.output_tokens));
        self.last_seq = entry.seq;
        self.updated_at = entry.timestamp;
        Ok(())
    }

    pub fn slot(&self, slot_id: &str) -> Option<&WorkerSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    fn slot_mut(&mut self, slot_id: &str) -> CoreResult<&mut WorkerSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.id == slot_id)
            .ok_or_else(|| CoreError::UnknownSlot(slot_id.to_string()))
    }

    /// Slots, in id order, that have not finished `stage` round `round`.
    pub fn pending_slots(&self, stage: Stage, round: u32) -> Vec<&WorkerSlot> {
        self.slots
            .iter()
            .filter(|s| !s.has_completed(stage, round))
            .collect()
    }

    pub fn candidates(&self) -> &[Candidate] {
        self.candidates.as_deref().unwrap_or(&[])
    }

    pub fn feedback_at(&self, checkpoint: Checkpoint) -> Option<&RoundFeedback> {
        self.feedback.iter().rev().find(|f| f.checkpoint == checkpoint)
    }

    /// User guidance for a slot's round: whatever was said at the checkpoint
    /// that closed the previous round of the same stage.
    pub fn guidance_for(&self, slot_id: &str, stage: Stage, round: u32) -> Option<&str> {
        let previous = round.checked_sub(1).filter(|r| *r > 0)?;
        let checkpoint = Checkpoint::after_round(stage, previous)?;
        self.feedback_at(checkpoint)?
            .worker_feedback
            .get(slot_id)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Every piece of free text the user has contributed so far.
    pub fn user_feedback_history(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for fb in &self.feedback {
            for (slot, text) in &fb.worker_feedback {
                let text = text.trim();
                if !text.is_empty() {
                    lines.push(format!("[{} {}] {}", fb.checkpoint.as_str(), slot, text));
                }
            }
        }
        if let Some(ref vote) = self.vote {
            lines.extend(vote.feedback_lines());
        }
        lines
    }
}
