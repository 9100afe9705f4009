use std::future::Future;
use std::sync::Arc;

use council_core::similarity::text_similarity;
use council_core::{
    AxiomSource, Checkpoint, LogDraft, LogRecord, OutputKind, Persona, PersonaRef, Session,
    Stage, TokenUsage, ENGINE_AGENT, SYNTHESIZER_AGENT,
};
use events::{Event, StagePayload};
use tracing::{debug, error, info, warn};

use super::handle::SessionHandle;
use super::CouncilEngine;
use crate::agents::{Synthesizer, WorkerAgent};
use crate::error::{OrchestratorError, Result};
use crate::gateway::GatewayError;
use crate::persona::fallback_persona;
use crate::run_guard::RunGuard;
use crate::state_machine::{NextStep, StageMachine};

/// Where a run stopped.
enum Halt {
    Suspended(Checkpoint),
    Completed,
    Idle,
}

impl CouncilEngine {
    /// Body of a run task: advance to the next halt point and report it.
    pub(super) async fn drive(
        self,
        handle: Arc<SessionHandle>,
        mut guard: RunGuard,
        diversify_round: Option<u32>,
    ) {
        let result = match diversify_round {
            Some(round) => match self.begin_diversify(&handle, round).await {
                Ok(()) => self.advance(&handle).await,
                Err(err) => Err(err),
            },
            None => self.advance(&handle).await,
        };

        // Failures are recorded while the run still holds the session.
        let last_event = match result {
            Ok(Halt::Suspended(checkpoint)) => Some(Event::awaiting(checkpoint)),
            Ok(Halt::Completed) => Some(Event::Complete),
            Ok(Halt::Idle) => None,
            Err(OrchestratorError::Aborted(_)) => {
                debug!(session_id = %handle.id, "Run stopped by session end");
                None
            }
            Err(_) if handle.is_cancelled() => None,
            Err(err) => Some(self.record_failure(&handle, err).await),
        };
        guard.mark_finished();
        drop(guard);

        if let Some(event) = last_event {
            let session = handle.current().await;
            self.emit(&handle, &session, event, None).await;
        }
    }

    async fn begin_diversify(&self, handle: &SessionHandle, round: u32) -> Result<()> {
        let session = self
            .commit(
                handle,
                LogDraft::engine(LogRecord::StageStarted {
                    stage: Stage::Diversify,
                    round,
                }),
            )
            .await?;
        info!(session_id = %handle.id, round, "Diversify pass started");
        self.emit(handle, &session, Event::StageStart, None).await;
        Ok(())
    }

    async fn advance(&self, handle: &SessionHandle) -> Result<Halt> {
        loop {
            if handle.is_cancelled() {
                return Err(OrchestratorError::Aborted(handle.id));
            }
            let session = handle.current().await;

            match StageMachine::next_step(&session) {
                NextStep::Execute { stage, round } => self.execute(handle, stage, round).await?,
                NextStep::Suspend(checkpoint) => {
                    if session.checkpoint != Some(checkpoint) {
                        let session = self
                            .commit(
                                handle,
                                LogDraft::engine(LogRecord::CheckpointReached { checkpoint }),
                            )
                            .await?;
                        self.store.snapshot(&session).await?;
                    }
                    info!(
                        session_id = %handle.id,
                        checkpoint = checkpoint.as_str(),
                        "Awaiting user input"
                    );
                    return Ok(Halt::Suspended(checkpoint));
                }
                NextStep::Complete => {
                    self.seal(handle).await?;
                    return Ok(Halt::Completed);
                }
                NextStep::Finished => return Ok(Halt::Idle),
            }
        }
    }

    async fn execute(&self, handle: &SessionHandle, stage: Stage, round: u32) -> Result<()> {
        let session = handle.current().await;
        let resuming = session.stage_in_progress
            && session.current_stage == stage
            && session.round == round;

        if resuming {
            info!(session_id = %handle.id, stage = %stage, round, "Resuming stage");
        } else {
            let session = self
                .commit(
                    handle,
                    LogDraft::engine(LogRecord::StageStarted { stage, round }),
                )
                .await?;
            info!(session_id = %handle.id, stage = %stage, round, "Stage started");
            self.emit(handle, &session, Event::StageStart, None).await;
        }

        match stage {
            Stage::Draft
            | Stage::Refinement
            | Stage::Diversify
            | Stage::Collaboration
            | Stage::Argumentation => self.run_worker_round(handle, stage, round).await?,
            Stage::Questions => self.ask_questions(handle, 1).await?,
            Stage::CompatibilityCheck => self.judge_compatibility(handle).await?,
            Stage::CandidateSynthesis => self.synthesize_candidates(handle).await?,
            Stage::AiVoting => self.score_candidates(handle).await?,
            Stage::AxiomAnalysis => self.analyze_axioms(handle).await?,
            Stage::FinalOutput => self.produce_final_output(handle).await?,
            Stage::AwaitingUserVote | Stage::Complete => {}
        }

        let session = self
            .commit(
                handle,
                LogDraft::engine(LogRecord::StageCompleted { stage, round }),
            )
            .await?;
        self.store.snapshot(&session).await?;
        debug!(session_id = %handle.id, stage = %stage, round, "Stage completed");
        Ok(())
    }

    async fn run_worker_round(&self, handle: &SessionHandle, stage: Stage, round: u32) -> Result<()> {
        if stage == Stage::Refinement && round > 1 && handle.current().await.questions.round != round
        {
            self.ask_questions(handle, round).await?;
        }

        let participants = StageMachine::participants(&handle.current().await, stage, round);
        for slot_id in participants {
            if handle.is_cancelled() {
                return Err(OrchestratorError::Aborted(handle.id));
            }
            let session = handle.current().await;
            let Some(slot) = session.slot(&slot_id) else {
                continue;
            };
            let persona = self.persona_for(&slot.persona).await?;
            self.emit(
                handle,
                &session,
                Event::WorkerStart {
                    persona_id: persona.id.clone(),
                    persona_name: persona.name.clone(),
                },
                Some(&slot_id),
            )
            .await;

            let agent = WorkerAgent::new(&self.gateway, &session, &slot_id, &persona);
            let reply = self.cancellable(handle, agent.contribute(stage, round)).await?;
            let output = reply.value;

            let session = self
                .commit(
                    handle,
                    LogDraft::by(
                        slot_id.clone(),
                        LogRecord::WorkerOutput {
                            slot_id: slot_id.clone(),
                            output: output.clone(),
                        },
                    )
                    .with_persona(PersonaRef::from(&persona))
                    .with_tokens(reply.tokens)
                    .with_content(output.summary.clone()),
                )
                .await?;
            debug!(
                session_id = %handle.id,
                slot = %slot_id,
                stage = %stage,
                round,
                "Worker output recorded"
            );
            self.emit(handle, &session, Event::WorkerComplete { output }, Some(&slot_id))
                .await;
            self.report_usage(handle, &session, reply.memory_warning).await;
        }

        if stage == Stage::Refinement && round > 1 {
            self.check_convergence(handle).await?;
        }
        if matches!(stage, Stage::Refinement | Stage::Argumentation) {
            self.comment(handle, stage, round).await?;
        }
        Ok(())
    }

    async fn check_convergence(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let Some(similarity) = convergence(&session) else {
            return Ok(());
        };
        if similarity < session.config.similarity_threshold {
            return Ok(());
        }

        self.commit(
            handle,
            LogDraft::engine(LogRecord::RefinementConverged { similarity }),
        )
        .await?;
        info!(
            session_id = %handle.id,
            similarity,
            "Refinements converged, skipping remaining rounds"
        );
        Ok(())
    }

    async fn comment(&self, handle: &SessionHandle, stage: Stage, round: u32) -> Result<()> {
        let session = handle.current().await;
        let reply = self
            .cancellable(
                handle,
                Synthesizer::new(&self.gateway, &session).commentary(stage, round),
            )
            .await?;
        let text = reply.value;

        let session = self
            .commit(
                handle,
                LogDraft::by(SYNTHESIZER_AGENT, LogRecord::Commentary { text: text.clone() })
                    .with_tokens(reply.tokens)
                    .with_content(text.clone()),
            )
            .await?;
        self.emit(handle, &session, Event::SynthCommentary { text }, None)
            .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn ask_questions(&self, handle: &SessionHandle, round: u32) -> Result<()> {
        let session = handle.current().await;
        let reply = self
            .cancellable(handle, Synthesizer::new(&self.gateway, &session).questions(round))
            .await?;
        let questions = reply.value;

        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::QuestionsAsked {
                        questions: questions.clone(),
                    },
                )
                .with_tokens(reply.tokens)
                .with_content(reply.raw),
            )
            .await?;
        self.emit(
            handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::Questions { questions },
            },
            None,
        )
        .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn judge_compatibility(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let reply = self
            .cancellable(handle, Synthesizer::new(&self.gateway, &session).compatibility())
            .await?;
        let report = reply.value;
        info!(
            session_id = %handle.id,
            verdict = report.verdict.as_str(),
            "Compatibility judged"
        );

        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::CompatibilityJudged {
                        report: report.clone(),
                    },
                )
                .with_tokens(reply.tokens)
                .with_content(reply.raw),
            )
            .await?;
        self.emit(
            handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::Compatibility { report },
            },
            None,
        )
        .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn synthesize_candidates(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let reply = self
            .cancellable(handle, Synthesizer::new(&self.gateway, &session).candidates())
            .await?;
        let candidates = reply.value;
        if candidates.is_empty() {
            warn!(
                session_id = %handle.id,
                "No candidates synthesized; the vote will take feedback only"
            );
        }

        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::CandidatesSynthesized {
                        candidates: candidates.clone(),
                    },
                )
                .with_tokens(reply.tokens)
                .with_content(reply.raw),
            )
            .await?;
        self.emit(
            handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::Candidates { candidates },
            },
            None,
        )
        .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn score_candidates(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let synthesizer = Synthesizer::new(&self.gateway, &session);

        let mut scores = Vec::with_capacity(session.candidates().len());
        let mut tokens = TokenUsage::default();
        let mut warning = None;
        for candidate in session.candidates() {
            let reply = self.cancellable(handle, synthesizer.score(candidate)).await?;
            tokens.add(reply.tokens);
            warning = reply.memory_warning.or(warning);
            scores.push(reply.value);
        }

        let vote = serde_json::to_value(&scores).unwrap_or(serde_json::Value::Null);
        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::ScoresAssigned {
                        scores: scores.clone(),
                    },
                )
                .with_tokens(tokens)
                .with_vote(vote),
            )
            .await?;
        self.emit(
            handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::Scores { scores },
            },
            None,
        )
        .await;
        self.report_usage(handle, &session, warning).await;
        Ok(())
    }

    async fn analyze_axioms(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let has_set = |session: &Session, key: &str| session.axioms.iter().any(|s| s.source.key() == key);

        if !has_set(&session, AxiomSource::User.key()) && !session.user_feedback_history().is_empty()
        {
            let reply = self
                .cancellable(handle, Synthesizer::new(&self.gateway, &session).user_axioms())
                .await?;
            let set = reply.value;
            let session = self
                .commit(
                    handle,
                    LogDraft::by(SYNTHESIZER_AGENT, LogRecord::AxiomsExtracted { set: set.clone() })
                        .with_tokens(reply.tokens),
                )
                .await?;
            self.emit(handle, &session, Event::AxiomExtracted { set }, None)
                .await;
        }

        let drafted: Vec<String> = session
            .slots
            .iter()
            .filter(|s| s.has_draft() && !has_set(&session, &s.id))
            .map(|s| s.id.clone())
            .collect();
        for slot_id in drafted {
            if handle.is_cancelled() {
                return Err(OrchestratorError::Aborted(handle.id));
            }
            let session = handle.current().await;
            let Some(slot) = session.slot(&slot_id) else {
                continue;
            };
            let persona = self.persona_for(&slot.persona).await?;
            let agent = WorkerAgent::new(&self.gateway, &session, &slot_id, &persona);
            let reply = self.cancellable(handle, agent.axioms()).await?;
            let set = reply.value;

            let session = self
                .commit(
                    handle,
                    LogDraft::by(slot_id.clone(), LogRecord::AxiomsExtracted { set: set.clone() })
                        .with_persona(PersonaRef::from(&persona))
                        .with_tokens(reply.tokens),
                )
                .await?;
            self.emit(handle, &session, Event::AxiomExtracted { set }, Some(&slot_id))
                .await;
        }

        let session = handle.current().await;
        let reply = self
            .cancellable(
                handle,
                Synthesizer::new(&self.gateway, &session).network(&session.axioms),
            )
            .await?;
        let network = reply.value;
        info!(
            session_id = %handle.id,
            shared = network.shared_axioms.len(),
            conflicts = network.conflicts.len(),
            "Axiom network built"
        );

        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::AxiomNetworkBuilt {
                        network: network.clone(),
                    },
                )
                .with_tokens(reply.tokens),
            )
            .await?;
        self.emit(
            handle,
            &session,
            Event::StageComplete {
                payload: StagePayload::AxiomNetwork { network },
            },
            None,
        )
        .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn produce_final_output(&self, handle: &SessionHandle) -> Result<()> {
        let session = handle.current().await;
        let reply = self
            .cancellable(handle, Synthesizer::new(&self.gateway, &session).final_answer())
            .await?;
        let text = reply.value;
        let winner = session.outcome.as_ref().and_then(|o| o.winner.clone());

        let session = self
            .commit(
                handle,
                LogDraft::by(
                    SYNTHESIZER_AGENT,
                    LogRecord::FinalOutputProduced { text: text.clone() },
                )
                .with_tokens(reply.tokens)
                .with_content(text.clone()),
            )
            .await?;
        self.emit(handle, &session, Event::FinalOutput { text, winner }, None)
            .await;
        self.report_usage(handle, &session, reply.memory_warning).await;
        Ok(())
    }

    async fn report_usage(&self, handle: &SessionHandle, session: &Session, warning: Option<String>) {
        self.emit(
            handle,
            session,
            Event::TokensUpdate {
                input_tokens: session.tokens.input_tokens,
                output_tokens: session.tokens.output_tokens,
                total_tokens: session.tokens.total(),
            },
            None,
        )
        .await;
        if let Some(message) = warning {
            warn!(session_id = %handle.id, "{}", message);
            self.emit(handle, session, Event::MemoryWarning { message }, None)
                .await;
        }
    }

    async fn persona_for(&self, reference: &PersonaRef) -> Result<Persona> {
        Ok(self
            .personas
            .get(&reference.id)
            .await?
            .unwrap_or_else(|| fallback_persona(reference)))
    }

    /// Await a generation unless the session is ended first.
    async fn cancellable<T>(
        &self,
        handle: &SessionHandle,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> Result<T> {
        tokio::select! {
            result = call => result.map_err(OrchestratorError::from),
            _ = handle.cancelled() => Err(OrchestratorError::Aborted(handle.id)),
        }
    }

    /// Persist a failed run and build the event that reports it.
    async fn record_failure(&self, handle: &SessionHandle, err: OrchestratorError) -> Event {
        error!(session_id = %handle.id, code = err.code(), "Run failed: {}", err);
        let code = err.code().to_string();
        let message = err.to_string();

        let recorded = self
            .commit(
                handle,
                LogDraft::by(
                    ENGINE_AGENT,
                    LogRecord::RunFailed {
                        code: code.clone(),
                        message: message.clone(),
                    },
                ),
            )
            .await;
        match recorded {
            Ok(session) => {
                if let Err(e) = self.store.snapshot(&session).await {
                    warn!(session_id = %handle.id, "Failed to snapshot failed run: {}", e);
                }
            }
            Err(e) => warn!(session_id = %handle.id, "Failed to record run failure: {}", e),
        }

        Event::Error { code, message }
    }
}

/// Lowest similarity between each slot's last two refinements, if every slot
/// has refined at least twice.
fn convergence(session: &Session) -> Option<f64> {
    let mut lowest: Option<f64> = None;
    for slot in &session.slots {
        let refinements: Vec<&str> = slot
            .visible_outputs()
            .filter(|o| o.kind == OutputKind::Refinement)
            .map(|o| o.summary.as_str())
            .collect();
        let [.., previous, latest] = refinements.as_slice() else {
            return None;
        };
        let similarity = text_similarity(previous, latest);
        lowest = Some(lowest.map_or(similarity, |l: f64| l.min(similarity)));
    }
    lowest
}
