use council_core::{Checkpoint, Session, SessionStatus, Stage};

use crate::error::{OrchestratorError, Result};

/// What the engine must do next to advance a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Start, or finish, a stage round
    Execute { stage: Stage, round: u32 },
    /// Halt at a checkpoint until the user answers it
    Suspend(Checkpoint),
    /// Everything is done; seal the session
    Complete,
    /// Terminal status; nothing left to run
    Finished,
}

pub struct StageMachine;

impl StageMachine {
    /// Derive the next step purely from session state, so a restored
    /// session picks up exactly where the log left it.
    pub fn next_step(session: &Session) -> NextStep {
        if session.status.is_terminal() {
            return NextStep::Finished;
        }
        if let Some(checkpoint) = session.checkpoint {
            return NextStep::Suspend(checkpoint);
        }
        if session.round == 0 {
            return NextStep::Execute {
                stage: Stage::Draft,
                round: 1,
            };
        }
        if session.stage_in_progress {
            return NextStep::Execute {
                stage: session.current_stage,
                round: session.round,
            };
        }

        let round = session.round;
        let config = &session.config;
        match session.current_stage {
            Stage::Draft => execute(Stage::Questions, 1),
            Stage::Questions => execute(Stage::Refinement, 1),
            Stage::Refinement => {
                let checkpoint = Checkpoint::RoundFeedback { round };
                if session.converged {
                    execute(Stage::CompatibilityCheck, 1)
                } else if session.feedback_at(checkpoint).is_none() {
                    NextStep::Suspend(checkpoint)
                } else if round < config.refinement_rounds && !session.skip_requested {
                    execute(Stage::Refinement, round + 1)
                } else {
                    execute(Stage::CompatibilityCheck, 1)
                }
            }
            Stage::CompatibilityCheck => {
                let collaborate = session
                    .compatibility
                    .as_ref()
                    .map(|r| r.verdict.allows_collaboration())
                    .unwrap_or(false);
                if collaborate {
                    execute(Stage::Collaboration, 1)
                } else {
                    execute(Stage::CandidateSynthesis, 1)
                }
            }
            Stage::Collaboration => Self::after_round(
                session,
                Checkpoint::CollabFeedback { round },
                config.collaboration_rounds,
                Stage::CandidateSynthesis,
            ),
            Stage::CandidateSynthesis => execute(Stage::Argumentation, 1),
            Stage::Argumentation => Self::after_round(
                session,
                Checkpoint::ArgumentFeedback { round },
                config.argument_rounds,
                Stage::AiVoting,
            ),
            Stage::AiVoting => execute(Stage::AwaitingUserVote, 1),
            Stage::AwaitingUserVote => {
                if session.outcome.is_some() {
                    execute(Stage::AxiomAnalysis, 1)
                } else {
                    NextStep::Suspend(Checkpoint::UserVote)
                }
            }
            Stage::AxiomAnalysis => execute(Stage::FinalOutput, 1),
            Stage::FinalOutput => {
                if session.final_feedback.is_some() {
                    NextStep::Complete
                } else {
                    NextStep::Suspend(Checkpoint::FinalFeedback)
                }
            }
            // A finished diversify pass hands control back to the stage it
            // interrupted, so this only shows up mid-pass.
            Stage::Diversify => execute(Stage::Diversify, round),
            Stage::Complete => NextStep::Complete,
        }
    }

    fn after_round(
        session: &Session,
        checkpoint: Checkpoint,
        rounds: u32,
        then: Stage,
    ) -> NextStep {
        let round = session.round;
        if session.feedback_at(checkpoint).is_none() {
            NextStep::Suspend(checkpoint)
        } else if round < rounds && !session.skip_requested {
            execute(session.current_stage, round + 1)
        } else {
            execute(then, 1)
        }
    }

    /// Diversify is offered at a refinement checkpoint, or once drafts exist
    /// and nothing else has run yet.
    pub fn check_diversify(session: &Session) -> Result<()> {
        let at_round_feedback = matches!(
            session.checkpoint,
            Some(Checkpoint::RoundFeedback { .. })
        );
        let after_drafts = session.current_stage == Stage::Draft
            && !session.stage_in_progress
            && session.round > 0
            && matches!(session.status, SessionStatus::Active | SessionStatus::Error);

        if !at_round_feedback && !after_drafts {
            return Err(OrchestratorError::invalid_state(format!(
                "diversify is not available during {} ({})",
                session.current_stage,
                session.status.as_str()
            )));
        }

        let drafted = session.slots.iter().filter(|s| s.has_draft()).count();
        if drafted < 2 {
            return Err(OrchestratorError::invalid_state(format!(
                "diversify needs at least 2 workers with drafts, found {}",
                drafted
            )));
        }
        Ok(())
    }

    /// Round number for the next diversify pass. Each pass gets its own so
    /// slot cursors never collide.
    pub fn next_diversify_round(session: &Session) -> u32 {
        let passes = session
            .history
            .iter()
            .filter(|r| r.stage == Stage::Diversify)
            .count() as u32;
        passes + 1
    }

    /// Slot ids, in order, that still owe output for a worker stage round.
    pub fn participants(session: &Session, stage: Stage, round: u32) -> Vec<String> {
        session
            .pending_slots(stage, round)
            .into_iter()
            .filter(|slot| stage != Stage::Diversify || slot.has_draft())
            .map(|slot| slot.id.clone())
            .collect()
    }
}

fn execute(stage: Stage, round: u32) -> NextStep {
    NextStep::Execute { stage, round }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use chrono::Utc;
    use council_core::{
        Compatibility, CompatibilityReport, LogDraft, LogRecord, OutputKind, Persona, PersonaRef,
        SessionConfig, StageOutput, TokenUsage, VoteOutcome, WinningReason,
    };
    use uuid::Uuid;

    struct Harness {
        session: Session,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let bindings = (1..=config.worker_count)
                .map(|i| Persona::new(format!("p{}", i), format!("P{}", i), "t"))
                .collect();
            let entry = LogDraft::engine(LogRecord::SessionStarted {
                prompt: "p".to_string(),
                config,
                bindings,
            })
            .into_entry(Uuid::new_v4(), 1);
            Self {
                session: Session::start(&entry).unwrap(),
            }
        }

        fn push(&mut self, record: LogRecord) -> &mut Self {
            let entry = LogDraft::engine(record)
                .into_entry(self.session.id, self.session.last_seq + 1);
            self.session.apply(&entry).unwrap();
            self
        }

        fn stage(&mut self, stage: Stage, round: u32) -> &mut Self {
            self.push(LogRecord::StageStarted { stage, round });
            if stage.is_worker_stage() {
                let slots: Vec<String> = self.session.slots.iter().map(|s| s.id.clone()).collect();
                for slot_id in slots {
                    self.push(LogRecord::WorkerOutput {
                        output: output(stage, round),
                        slot_id,
                    });
                }
            }
            self.push(LogRecord::StageCompleted { stage, round })
        }

        fn answer(&mut self, checkpoint: Checkpoint, skip: bool) -> &mut Self {
            self.push(LogRecord::CheckpointReached { checkpoint });
            self.push(LogRecord::FeedbackReceived {
                checkpoint,
                worker_feedback: BTreeMap::new(),
                skip,
            })
        }

        fn next(&self) -> NextStep {
            StageMachine::next_step(&self.session)
        }
    }

    fn output(stage: Stage, round: u32) -> StageOutput {
        StageOutput {
            kind: OutputKind::for_stage(stage).unwrap(),
            stage,
            round,
            persona: PersonaRef {
                id: "p1".to_string(),
                name: "P1".to_string(),
            },
            summary: "s".to_string(),
            rationale: String::new(),
            confidence: 0.5,
            details: serde_json::Value::Null,
            tokens: TokenUsage::default(),
            archived: false,
            created_at: Utc::now(),
        }
    }

    fn report(verdict: Compatibility) -> LogRecord {
        LogRecord::CompatibilityJudged {
            report: CompatibilityReport {
                verdict,
                overlap_areas: vec![],
                conflict_areas: vec![],
                merge_strategy: None,
            },
        }
    }

    #[test]
    fn test_fresh_session_drafts_first() {
        let h = Harness::new(SessionConfig::default());
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::Draft,
                round: 1
            }
        );
    }

    #[test]
    fn test_refinement_rounds_pause_and_skip() {
        let mut h = Harness::new(SessionConfig {
            refinement_rounds: 3,
            ..Default::default()
        });
        h.stage(Stage::Draft, 1).stage(Stage::Questions, 1).stage(Stage::Refinement, 1);
        assert_eq!(
            h.next(),
            NextStep::Suspend(Checkpoint::RoundFeedback { round: 1 })
        );

        h.answer(Checkpoint::RoundFeedback { round: 1 }, false);
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::Refinement,
                round: 2
            }
        );

        h.stage(Stage::Refinement, 2)
            .answer(Checkpoint::RoundFeedback { round: 2 }, true);
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::CompatibilityCheck,
                round: 1
            }
        );
    }

    #[test]
    fn test_convergence_skips_checkpoint() {
        let mut h = Harness::new(SessionConfig::default());
        h.stage(Stage::Draft, 1).stage(Stage::Questions, 1);
        h.push(LogRecord::StageStarted {
            stage: Stage::Refinement,
            round: 1,
        })
        .push(LogRecord::RefinementConverged { similarity: 0.95 })
        .push(LogRecord::StageCompleted {
            stage: Stage::Refinement,
            round: 1,
        });
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::CompatibilityCheck,
                round: 1
            }
        );
    }

    #[test]
    fn test_compatibility_branch() {
        for (verdict, expected) in [
            (Compatibility::Compatible, Stage::Collaboration),
            (Compatibility::PartiallyCompatible, Stage::Collaboration),
            (Compatibility::Incompatible, Stage::CandidateSynthesis),
        ] {
            let mut h = Harness::new(SessionConfig::default());
            h.push(LogRecord::StageStarted {
                stage: Stage::CompatibilityCheck,
                round: 1,
            })
            .push(report(verdict))
            .push(LogRecord::StageCompleted {
                stage: Stage::CompatibilityCheck,
                round: 1,
            });
            assert_eq!(
                h.next(),
                NextStep::Execute {
                    stage: expected,
                    round: 1
                }
            );
        }
    }

    #[test]
    fn test_single_argument_round_reaches_voting() {
        let mut h = Harness::new(SessionConfig {
            argument_rounds: 1,
            ..Default::default()
        });
        h.stage(Stage::CandidateSynthesis, 1).stage(Stage::Argumentation, 1);
        assert_eq!(
            h.next(),
            NextStep::Suspend(Checkpoint::ArgumentFeedback { round: 1 })
        );
        h.answer(Checkpoint::ArgumentFeedback { round: 1 }, false);
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::AiVoting,
                round: 1
            }
        );
    }

    #[test]
    fn test_vote_then_final_feedback() {
        let mut h = Harness::new(SessionConfig::default());
        h.stage(Stage::AwaitingUserVote, 1);
        assert_eq!(h.next(), NextStep::Suspend(Checkpoint::UserVote));

        h.push(LogRecord::VoteSubmitted {
            vote: Default::default(),
            outcome: VoteOutcome {
                standings: vec![],
                winner: None,
                reason: WinningReason::FeedbackOnly,
            },
        });
        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::AxiomAnalysis,
                round: 1
            }
        );

        h.stage(Stage::AxiomAnalysis, 1).stage(Stage::FinalOutput, 1);
        assert_eq!(h.next(), NextStep::Suspend(Checkpoint::FinalFeedback));

        h.push(LogRecord::FinalFeedbackReceived {
            text: String::new(),
        });
        assert_eq!(h.next(), NextStep::Complete);

        h.push(LogRecord::SessionCompleted);
        assert_eq!(h.next(), NextStep::Finished);
    }

    #[test]
    fn test_interrupted_stage_resumes() {
        let mut h = Harness::new(SessionConfig::default());
        h.push(LogRecord::StageStarted {
            stage: Stage::Draft,
            round: 1,
        })
        .push(LogRecord::WorkerOutput {
            slot_id: "worker_1".to_string(),
            output: output(Stage::Draft, 1),
        })
        .push(LogRecord::RunFailed {
            code: "upstream_generation_error".to_string(),
            message: "down".to_string(),
        });

        assert_eq!(
            h.next(),
            NextStep::Execute {
                stage: Stage::Draft,
                round: 1
            }
        );
        assert_eq!(
            StageMachine::participants(&h.session, Stage::Draft, 1),
            vec!["worker_2", "worker_3"]
        );
    }

    #[test]
    fn test_diversify_preconditions() {
        let mut h = Harness::new(SessionConfig::default());
        assert!(StageMachine::check_diversify(&h.session).is_err());

        h.stage(Stage::Draft, 1);
        assert!(StageMachine::check_diversify(&h.session).is_ok());

        h.stage(Stage::Questions, 1).stage(Stage::Refinement, 1);
        h.push(LogRecord::CheckpointReached {
            checkpoint: Checkpoint::RoundFeedback { round: 1 },
        });
        assert!(StageMachine::check_diversify(&h.session).is_ok());
        assert_eq!(StageMachine::next_diversify_round(&h.session), 1);
    }
}
