//! The council engine.
//!
//! [`CouncilEngine`] owns every loaded session. Runs execute on background
//! tasks and report through per-session event streams; everything else
//! (feedback, votes, swaps) commits synchronously and returns. All state
//! changes go through [`CouncilEngine::commit`], which appends to the log and
//! applies the entry to the in-memory session under one lock.

mod handle;
mod runner;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use council_core::{
    Checkpoint, LogDraft, LogEntry, LogRecord, Persona, PersonaRef, Session, SessionConfig,
    SessionError, SessionStatus, Stage, SwapMode, TokenUsage, VoteOutcome, VoteSubmission,
    USER_AGENT,
};
use db::{SessionStore, SnapshotSummary};
use events::{Event, EventBus, EventEnvelope, StagePayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::aggregate;
use crate::error::{OrchestratorError, Result};
use crate::gateway::InferenceGateway;
use crate::persona::{builtin_personas, swap_record, PersonaStore};
use crate::publisher::{EventStream, PublisherRegistry};
use crate::run_guard::RunGuard;
use crate::state_machine::{NextStep, StageMachine};

use handle::SessionHandle;

/// How long a delete waits for a cancelled run to stop.
const DELETE_WAIT: Duration = Duration::from_secs(10);

/// Parameters for a new session. Unset knobs take the engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StartRequest {
    pub prompt: String,
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default)]
    pub refinement_rounds: Option<u32>,
    #[serde(default)]
    pub collaboration_rounds: Option<u32>,
    #[serde(default)]
    pub argument_rounds: Option<u32>,
    #[serde(default)]
    pub worker_max_tokens: Option<u32>,
    #[serde(default)]
    pub synthesizer_max_tokens: Option<u32>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    /// Persona ids bound to slots in order; empty picks from the catalogue
    #[serde(default)]
    pub personas: Vec<String>,
}

impl StartRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn config(&self, defaults: &SessionConfig) -> SessionConfig {
        SessionConfig {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            refinement_rounds: self.refinement_rounds.unwrap_or(defaults.refinement_rounds),
            collaboration_rounds: self
                .collaboration_rounds
                .unwrap_or(defaults.collaboration_rounds),
            argument_rounds: self.argument_rounds.unwrap_or(defaults.argument_rounds),
            worker_max_tokens: self.worker_max_tokens.unwrap_or(defaults.worker_max_tokens),
            synthesizer_max_tokens: self
                .synthesizer_max_tokens
                .unwrap_or(defaults.synthesizer_max_tokens),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
        }
    }
}

/// Per-slot guidance given at a round checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct FeedbackInput {
    /// Round the feedback is for; must match the pending checkpoint
    pub round: u32,
    #[serde(default)]
    pub worker_feedback: BTreeMap<String, String>,
    /// Skip the remaining rounds of the current stage
    #[serde(default)]
    pub skip: bool,
}

/// The three per-round checkpoints that take worker feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Round,
    Collaboration,
    Argument,
}

impl FeedbackKind {
    fn checkpoint(self, round: u32) -> Checkpoint {
        match self {
            Self::Round => Checkpoint::RoundFeedback { round },
            Self::Collaboration => Checkpoint::CollabFeedback { round },
            Self::Argument => Checkpoint::ArgumentFeedback { round },
        }
    }
}

/// Compact progress view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SessionStatusView {
    pub session_id: Uuid,
    pub prompt: String,
    pub stage: Stage,
    pub round: u32,
    pub status: SessionStatus,
    pub checkpoint: Option<Checkpoint>,
    pub stage_in_progress: bool,
    /// A run task is executing right now
    pub running: bool,
    pub config: SessionConfig,
    pub slots: Vec<SlotStatus>,
    pub candidate_count: usize,
    pub tokens: TokenUsage,
    pub last_seq: u64,
    pub last_error: Option<SessionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SlotStatus {
    pub slot_id: String,
    pub persona: PersonaRef,
    pub outputs: usize,
}

impl SessionStatusView {
    fn new(session: &Session, running: bool) -> Self {
        Self {
            session_id: session.id,
            prompt: session.prompt.clone(),
            stage: session.current_stage,
            round: session.round,
            status: session.status,
            checkpoint: session.checkpoint,
            stage_in_progress: session.stage_in_progress,
            running,
            config: session.config.clone(),
            slots: session
                .slots
                .iter()
                .map(|s| SlotStatus {
                    slot_id: s.id.clone(),
                    persona: s.persona.clone(),
                    outputs: s.visible_outputs().count(),
                })
                .collect(),
            candidate_count: session.candidates().len(),
            tokens: session.tokens,
            last_seq: session.last_seq,
            last_error: session.last_error.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Result of rebuilding a session from its log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ReplayReport {
    pub session_id: Uuid,
    pub entries: u64,
    pub live_stage: Stage,
    pub replayed_stage: Stage,
    pub live_status: SessionStatus,
    pub replayed_status: SessionStatus,
    pub matches: bool,
}

#[derive(Clone)]
pub struct CouncilEngine {
    store: SessionStore,
    gateway: Arc<dyn InferenceGateway>,
    personas: Arc<dyn PersonaStore>,
    publishers: PublisherRegistry,
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionHandle>>>>,
    defaults: SessionConfig,
}

impl CouncilEngine {
    pub fn new(
        store: SessionStore,
        gateway: Arc<dyn InferenceGateway>,
        personas: Arc<dyn PersonaStore>,
    ) -> Self {
        let publishers = PublisherRegistry::new().with_repository(store.events().clone());
        Self {
            store,
            gateway,
            personas,
            publishers,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            defaults: SessionConfig::default(),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.publishers = self.publishers.with_bus(bus);
        self
    }

    pub fn with_defaults(mut self, defaults: SessionConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    pub fn personas(&self) -> &Arc<dyn PersonaStore> {
        &self.personas
    }

    /// Create a session and bind a persona to each worker slot.
    pub async fn start(&self, request: StartRequest) -> Result<Session> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(OrchestratorError::Configuration(
                "prompt must not be empty".to_string(),
            ));
        }
        let config = request.config(&self.defaults);
        config.validate()?;
        let bindings = self.bind_personas(&request.personas, config.worker_count).await?;

        let id = Uuid::new_v4();
        let entry = LogDraft::engine(LogRecord::SessionStarted {
            prompt: prompt.to_string(),
            config,
            bindings,
        })
        .into_entry(id, 1);
        let session = Session::start(&entry)?;
        self.store.append(&entry).await?;
        self.store.snapshot(&session).await?;

        let publisher = self.publishers.get_or_load(id).await?;
        let handle = Arc::new(SessionHandle::new(session.clone(), publisher));
        self.sessions_mut().insert(id, handle);

        info!(
            session_id = %id,
            workers = session.config.worker_count,
            "Session started"
        );
        Ok(session)
    }

    /// Run from wherever the session stands to its next halt point.
    ///
    /// The returned stream carries the run's events and ends with the
    /// awaiting, error or complete event that halts it.
    pub async fn run(&self, session_id: Uuid) -> Result<EventStream> {
        let handle = self.handle(session_id).await?;
        let guard = RunGuard::acquire(session_id, &handle.running)?;
        let session = handle.current().await;

        match StageMachine::next_step(&session) {
            NextStep::Finished => {
                return Err(OrchestratorError::invalid_state(format!(
                    "session is {}",
                    session.status.as_str()
                )))
            }
            NextStep::Suspend(checkpoint) if session.checkpoint == Some(checkpoint) => {
                return Err(OrchestratorError::invalid_state(format!(
                    "session is awaiting {}",
                    checkpoint.as_str()
                )))
            }
            _ => {}
        }

        self.launch(handle, guard, None).await
    }

    /// Alias of [`run`](Self::run) used after input was submitted.
    pub async fn continue_run(&self, session_id: Uuid) -> Result<EventStream> {
        self.run(session_id).await
    }

    /// Submit round feedback and continue in one call.
    pub async fn resume(
        &self,
        session_id: Uuid,
        kind: FeedbackKind,
        input: FeedbackInput,
    ) -> Result<EventStream> {
        self.submit_feedback(session_id, kind, input).await?;
        self.run(session_id).await
    }

    /// Re-draft every drafted slot from a deliberately different angle,
    /// then return to the checkpoint the session was parked at.
    pub async fn trigger_diversify(&self, session_id: Uuid) -> Result<EventStream> {
        let handle = self.handle(session_id).await?;
        let guard = RunGuard::acquire(session_id, &handle.running)?;
        let session = handle.current().await;

        StageMachine::check_diversify(&session)?;
        let round = StageMachine::next_diversify_round(&session);
        self.launch(handle, guard, Some(round)).await
    }

    /// Produce the final answer once the vote is in.
    pub async fn finalize(&self, session_id: Uuid) -> Result<EventStream> {
        let handle = self.handle(session_id).await?;
        let session = handle.current().await;
        if session.outcome.is_none() {
            return Err(OrchestratorError::invalid_state(
                "vote must be submitted before finalizing",
            ));
        }
        self.run(session_id).await
    }

    pub async fn submit_feedback(
        &self,
        session_id: Uuid,
        kind: FeedbackKind,
        input: FeedbackInput,
    ) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        let session = handle.current().await;
        let checkpoint = kind.checkpoint(input.round);
        expect_checkpoint(&session, checkpoint)?;

        let mut worker_feedback = BTreeMap::new();
        for (slot_id, text) in input.worker_feedback {
            if session.slot(&slot_id).is_none() {
                return Err(OrchestratorError::invalid_state(format!(
                    "unknown slot {}",
                    slot_id
                )));
            }
            let text = text.trim();
            if !text.is_empty() {
                worker_feedback.insert(slot_id, text.to_string());
            }
        }

        let content = worker_feedback
            .iter()
            .map(|(slot, text)| format!("{}: {}", slot, text))
            .collect::<Vec<_>>()
            .join("\n");
        let session = self
            .commit(
                &handle,
                LogDraft::by(
                    USER_AGENT,
                    LogRecord::FeedbackReceived {
                        checkpoint,
                        worker_feedback,
                        skip: input.skip,
                    },
                )
                .with_content(content),
            )
            .await?;
        self.store.snapshot(&session).await?;

        info!(
            session_id = %session_id,
            checkpoint = checkpoint.as_str(),
            skip = input.skip,
            "Feedback received"
        );
        Ok(session)
    }

    pub async fn submit_round_feedback(
        &self,
        session_id: Uuid,
        input: FeedbackInput,
    ) -> Result<Session> {
        self.submit_feedback(session_id, FeedbackKind::Round, input).await
    }

    pub async fn submit_collab_feedback(
        &self,
        session_id: Uuid,
        input: FeedbackInput,
    ) -> Result<Session> {
        self.submit_feedback(session_id, FeedbackKind::Collaboration, input)
            .await
    }

    pub async fn submit_argument_feedback(
        &self,
        session_id: Uuid,
        input: FeedbackInput,
    ) -> Result<Session> {
        self.submit_feedback(session_id, FeedbackKind::Argument, input)
            .await
    }

    /// Rebind a slot to another persona.
    pub async fn swap_persona(
        &self,
        session_id: Uuid,
        slot_id: &str,
        persona_id: &str,
        mode: SwapMode,
    ) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        // Held for the whole swap so no run can start mid-way.
        let mut guard = RunGuard::acquire(session_id, &handle.running)?;
        let persona = self
            .personas
            .get(persona_id)
            .await?
            .ok_or_else(|| OrchestratorError::PersonaNotFound(persona_id.to_string()))?;

        let session = handle.current().await;
        let record = swap_record(&session, slot_id, &persona, mode)?;
        let session = self
            .commit(
                &handle,
                LogDraft::by(USER_AGENT, record)
                    .with_persona(PersonaRef::from(&persona))
                    .with_content(format!("{} -> {} ({})", slot_id, persona.id, mode.as_str())),
            )
            .await?;
        self.store.snapshot(&session).await?;

        info!(
            session_id = %session_id,
            slot = slot_id,
            persona = %persona.id,
            mode = mode.as_str(),
            "Persona swapped"
        );
        guard.mark_finished();
        Ok(session)
    }

    /// Record the human vote and merge it with the machine scores.
    pub async fn vote(&self, session_id: Uuid, vote: VoteSubmission) -> Result<VoteOutcome> {
        let handle = self.handle(session_id).await?;
        let session = handle.current().await;
        expect_checkpoint(&session, Checkpoint::UserVote)?;
        vote.validate(session.candidates())?;

        let outcome = aggregate(session.candidates(), &session.scores, &vote);
        let vote_json = serde_json::to_value(&vote).unwrap_or(serde_json::Value::Null);
        let content = vote.overall_feedback.clone();
        let session = self
            .commit(
                &handle,
                LogDraft::by(
                    USER_AGENT,
                    LogRecord::VoteSubmitted {
                        vote,
                        outcome: outcome.clone(),
                    },
                )
                .with_vote(vote_json)
                .with_content(content),
            )
            .await?;
        self.store.snapshot(&session).await?;
        self.emit(
            &handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::Vote {
                    outcome: outcome.clone(),
                },
            },
            None,
        )
        .await;

        info!(
            session_id = %session_id,
            winner = ?outcome.winner,
            reason = outcome.reason.describe(),
            "Vote recorded"
        );
        Ok(outcome)
    }

    /// Close the session with the user's reaction to the final answer.
    pub async fn submit_final_feedback(&self, session_id: Uuid, text: &str) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        let session = handle.current().await;
        expect_checkpoint(&session, Checkpoint::FinalFeedback)?;

        self.commit(
            &handle,
            LogDraft::by(
                USER_AGENT,
                LogRecord::FinalFeedbackReceived {
                    text: text.trim().to_string(),
                },
            )
            .with_content(text.trim()),
        )
        .await?;
        let session = self.seal(&handle).await?;
        self.emit(&handle, &session, Event::Complete, None).await;
        Ok(session)
    }

    /// Stop the session for good. An in-flight run is cancelled.
    pub async fn end_session(&self, session_id: Uuid, reason: &str) -> Result<Session> {
        let handle = self.handle(session_id).await?;
        if handle.current().await.status.is_terminal() {
            return Err(OrchestratorError::invalid_state("session already ended"));
        }

        handle.cancel();
        let reason = if reason.trim().is_empty() {
            "ended by user".to_string()
        } else {
            reason.trim().to_string()
        };
        let session = self
            .commit(
                &handle,
                LogDraft::by(
                    USER_AGENT,
                    LogRecord::SessionAborted {
                        reason: reason.clone(),
                    },
                ),
            )
            .await?;
        self.store.snapshot(&session).await?;
        handle
            .publisher
            .publish(EventEnvelope::new(
                session_id,
                session.current_stage,
                session.round,
                Event::Error {
                    code: OrchestratorError::Aborted(session_id).code().to_string(),
                    message: reason,
                },
            ))
            .await;

        info!(session_id = %session_id, "Session ended");
        Ok(session)
    }

    /// Forget a session. Its log is archived, its snapshot and events dropped.
    ///
    /// An in-flight run is cancelled and awaited first so it cannot append
    /// to the archived log.
    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let handle = self.handle(session_id).await?;
        handle.cancel();
        let mut guard =
            RunGuard::acquire_within(session_id, &handle.running, DELETE_WAIT).await?;

        // Close any open stream before the publisher goes away.
        let session = handle.current().await;
        handle
            .publisher
            .publish(EventEnvelope::new(
                session_id,
                session.current_stage,
                session.round,
                Event::Error {
                    code: OrchestratorError::Aborted(session_id).code().to_string(),
                    message: "session deleted".to_string(),
                },
            ))
            .await;

        {
            let _session = handle.session.write().await;
            handle.mark_deleted();
            self.sessions_mut().remove(&session_id);
            self.publishers.remove(session_id);
            self.store.remove(session_id).await?;
        }

        guard.mark_finished();
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    pub async fn get_status(&self, session_id: Uuid) -> Result<SessionStatusView> {
        let handle = self.handle(session_id).await?;
        let session = handle.current().await;
        Ok(SessionStatusView::new(&session, handle.is_running()))
    }

    pub async fn get_full_state(&self, session_id: Uuid) -> Result<Session> {
        Ok(self.handle(session_id).await?.current().await)
    }

    /// Every event after `after_seq`, then live events until the client leaves.
    pub async fn events_after(&self, session_id: Uuid, after_seq: u64) -> Result<EventStream> {
        let handle = self.handle(session_id).await?;
        handle.publisher.stream_after(after_seq, false).await
    }

    pub async fn export_log(&self, session_id: Uuid) -> Result<Vec<LogEntry>> {
        self.handle(session_id).await?;
        Ok(self.store.read_all(session_id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SnapshotSummary>> {
        Ok(self.store.list().await?)
    }

    /// Rebuild the session from its log and compare with the live state.
    pub async fn verify_replay(&self, session_id: Uuid) -> Result<ReplayReport> {
        let live = self.handle(session_id).await?.current().await;
        let replayed = self.store.replay(session_id).await?;
        Ok(ReplayReport {
            session_id,
            entries: replayed.last_seq,
            live_stage: live.current_stage,
            replayed_stage: replayed.current_stage,
            live_status: live.status,
            replayed_status: replayed.status,
            matches: live == replayed,
        })
    }

    async fn launch(
        &self,
        handle: Arc<SessionHandle>,
        guard: RunGuard,
        diversify_round: Option<u32>,
    ) -> Result<EventStream> {
        if handle.current().await.status == SessionStatus::Error {
            self.commit(&handle, LogDraft::engine(LogRecord::RunResumed))
                .await?;
            info!(session_id = %handle.id, "Resuming after failed run");
        }

        // Subscribe before the task starts so no event is missed.
        let stream = handle
            .publisher
            .stream_after(handle.publisher.last_seq(), true)
            .await?;

        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(handle, guard, diversify_round).await;
        });
        Ok(stream)
    }

    /// Append one log entry and apply it to the live session.
    async fn commit(&self, handle: &SessionHandle, draft: LogDraft) -> Result<Session> {
        let mut current = handle.session.write().await;
        if handle.is_deleted() {
            return Err(OrchestratorError::SessionNotFound(handle.id));
        }
        match current.status {
            SessionStatus::Aborted => return Err(OrchestratorError::Aborted(handle.id)),
            SessionStatus::Completed => {
                return Err(OrchestratorError::invalid_state("session already completed"))
            }
            _ => {}
        }

        let mut next = current.clone();
        let mut entry = draft.into_entry(handle.id, current.last_seq + 1);
        next.apply(&entry)?;
        entry.stage = next.current_stage;
        entry.round = next.round;
        self.store.append(&entry).await?;

        debug!(
            session_id = %handle.id,
            seq = entry.seq,
            kind = entry.record.kind(),
            "Log entry committed"
        );
        *current = next;
        Ok(current.clone())
    }

    /// Final two entries of every completed session.
    async fn seal(&self, handle: &SessionHandle) -> Result<Session> {
        let session = handle.current().await;
        if session.current_stage != Stage::Complete {
            self.commit(
                handle,
                LogDraft::engine(LogRecord::StageStarted {
                    stage: Stage::Complete,
                    round: 1,
                }),
            )
            .await?;
        }
        let session = self
            .commit(handle, LogDraft::engine(LogRecord::SessionCompleted))
            .await?;
        self.store.snapshot(&session).await?;
        info!(session_id = %handle.id, tokens = session.tokens.total(), "Session completed");
        Ok(session)
    }

    async fn emit(
        &self,
        handle: &SessionHandle,
        session: &Session,
        event: Event,
        worker_id: Option<&str>,
    ) {
        if handle.is_cancelled() {
            return;
        }
        let mut envelope =
            EventEnvelope::new(handle.id, session.current_stage, session.round, event);
        if let Some(worker_id) = worker_id {
            envelope = envelope.for_worker(worker_id);
        }
        handle.publisher.publish(envelope).await;
    }

    async fn handle(&self, session_id: Uuid) -> Result<Arc<SessionHandle>> {
        let cached = self.sessions_ref().get(&session_id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        let session = self.store.load(session_id).await?;
        let publisher = self.publishers.get_or_load(session_id).await?;
        debug!(session_id = %session_id, seq = session.last_seq, "Session loaded from storage");

        let mut sessions = self.sessions_mut();
        let handle = sessions
            .entry(session_id)
            .or_insert_with(|| Arc::new(SessionHandle::new(session, publisher)));
        Ok(Arc::clone(handle))
    }

    async fn bind_personas(&self, requested: &[String], count: usize) -> Result<Vec<Persona>> {
        if !requested.is_empty() {
            if requested.len() != count {
                return Err(OrchestratorError::Configuration(format!(
                    "{} personas given for {} workers",
                    requested.len(),
                    count
                )));
            }
            let mut bound = Vec::with_capacity(count);
            for id in requested {
                let persona = self
                    .personas
                    .get(id)
                    .await?
                    .ok_or_else(|| OrchestratorError::PersonaNotFound(id.clone()))?;
                bound.push(persona);
            }
            return Ok(bound);
        }

        let mut catalogue = self.personas.list().await?;
        if catalogue.is_empty() {
            catalogue = builtin_personas();
        }
        Ok(catalogue.iter().cycle().take(count).cloned().collect())
    }

    fn sessions_ref(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<SessionHandle>>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sessions_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<SessionHandle>>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn expect_checkpoint(session: &Session, expected: Checkpoint) -> Result<()> {
    match session.checkpoint {
        Some(current) if current == expected => Ok(()),
        Some(current) => Err(OrchestratorError::invalid_state(format!(
            "session is awaiting {}, not {}",
            current.as_str(),
            expected.as_str()
        ))),
        None => Err(OrchestratorError::invalid_state(format!(
            "session is not awaiting {}",
            expected.as_str()
        ))),
    }
}
