use std::sync::Arc;

use chrono::Utc;
use council_core::{
    axiom_id, Axiom, AxiomSet, AxiomSource, OutputKind, Persona, PersonaRef, Session, Stage,
    StageOutput,
};

use super::{generate, position, positions, AgentReply};
use crate::gateway::{AgentTask, GatewayError, GenerationRequest, InferenceGateway};
use crate::parser::{
    parse_reply, ArgumentReply, AxiomReply, CollaborationReply, ProposalReply, RefinementReply,
};
use crate::prompts::{Contribution, CouncilPrompts};

/// Confidence recorded when a reply gives none or cannot be read.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// One worker slot speaking under its bound persona.
pub struct WorkerAgent<'a> {
    gateway: &'a Arc<dyn InferenceGateway>,
    session: &'a Session,
    slot_id: &'a str,
    persona: &'a Persona,
}

impl<'a> WorkerAgent<'a> {
    pub fn new(
        gateway: &'a Arc<dyn InferenceGateway>,
        session: &'a Session,
        slot_id: &'a str,
        persona: &'a Persona,
    ) -> Self {
        Self {
            gateway,
            session,
            slot_id,
            persona,
        }
    }

    /// Produce this slot's output for a worker stage round.
    pub async fn contribute(
        &self,
        stage: Stage,
        round: u32,
    ) -> Result<AgentReply<StageOutput>, GatewayError> {
        let (task, prompt) = self.prompt_for(stage, round);
        let request = GenerationRequest::new(task, self.persona.system_prompt(), prompt)
            .for_slot(self.slot_id, round)
            .with_max_tokens(self.session.config.worker_max_tokens);
        let generation = generate(self.gateway, request).await?;

        let mut output = self.parse_output(stage, round, &generation.text);
        output.tokens = generation.tokens;
        tracing::debug!(
            session_id = %self.session.id,
            slot = self.slot_id,
            stage = %stage,
            round,
            "Worker output parsed"
        );
        Ok(AgentReply::new(output, generation))
    }

    /// Extract the axioms behind this slot's final position.
    pub async fn axioms(&self) -> Result<AgentReply<AxiomSet>, GatewayError> {
        let slot = self.session.slot(self.slot_id);
        let proposal = slot
            .and_then(position)
            .map(|o| o.summary.as_str())
            .unwrap_or_default();
        let discussion: Vec<String> = slot
            .map(|s| {
                s.visible_outputs()
                    .map(|o| format!("{} {}: {}", o.stage, o.round, o.summary))
                    .collect()
            })
            .unwrap_or_default();

        let prompt = CouncilPrompts::worker_axioms(proposal, &self.persona.name, &discussion);
        let request = GenerationRequest::new(
            AgentTask::WorkerAxioms,
            self.persona.system_prompt(),
            prompt,
        )
        .for_slot(self.slot_id, 0)
        .with_max_tokens(self.session.config.worker_max_tokens);
        let generation = generate(self.gateway, request).await?;

        let source = AxiomSource::Worker {
            slot_id: self.slot_id.to_string(),
            persona: PersonaRef::from(self.persona),
        };
        let (drafts, contribution) = match parse_reply::<AxiomReply>(&generation.text) {
            Some((reply, _)) => (reply.axioms, reply.theory_contribution),
            None => (Vec::new(), String::new()),
        };
        let set = axiom_set(self.session, source, drafts, contribution);
        Ok(AgentReply::new(set, generation))
    }

    fn prompt_for(&self, stage: Stage, round: u32) -> (AgentTask, String) {
        let session = self.session;
        let slot = session.slot(self.slot_id);
        let current = slot
            .and_then(position)
            .map(|o| o.summary.as_str())
            .unwrap_or_default();
        let others = positions(session, Some(self.slot_id));
        let guidance = session.guidance_for(self.slot_id, stage, round);

        match stage {
            Stage::Refinement => {
                let history: Vec<String> = slot
                    .map(|s| {
                        s.visible_outputs()
                            .filter(|o| o.kind == OutputKind::Refinement)
                            .map(|o| format!("Round {}: {}", o.round, o.summary))
                            .collect()
                    })
                    .unwrap_or_default();
                let questions = session.questions.for_slot(self.slot_id);
                (
                    AgentTask::Refine,
                    CouncilPrompts::refine(&session.prompt, current, &history, questions, guidance),
                )
            }
            Stage::Diversify => (AgentTask::Diversify, CouncilPrompts::diversify(current, &others)),
            Stage::Collaboration => (
                AgentTask::Collaborate,
                CouncilPrompts::collaborate(
                    current,
                    &others,
                    session.compatibility.as_ref(),
                    guidance,
                ),
            ),
            Stage::Argumentation => {
                let alternatives: Vec<Contribution<'_>> = if session.candidates().is_empty() {
                    others
                } else {
                    session
                        .candidates()
                        .iter()
                        .map(|c| Contribution {
                            slot_id: &c.id,
                            persona: "candidate",
                            text: &c.summary,
                        })
                        .collect()
                };
                let counter: Vec<Contribution<'_>> = session
                    .slots
                    .iter()
                    .filter(|s| s.id != self.slot_id)
                    .filter_map(|s| {
                        s.visible_outputs()
                            .filter(|o| o.kind == OutputKind::Argument && o.round + 1 == round)
                            .last()
                            .map(|o| Contribution {
                                slot_id: &s.id,
                                persona: &s.persona.name,
                                text: &o.summary,
                            })
                    })
                    .collect();
                (
                    AgentTask::Argue,
                    CouncilPrompts::argue(current, &alternatives, &counter, guidance),
                )
            }
            _ => (AgentTask::Draft, CouncilPrompts::draft(&session.prompt)),
        }
    }

    fn parse_output(&self, stage: Stage, round: u32, text: &str) -> StageOutput {
        let kind = OutputKind::for_stage(stage).unwrap_or(OutputKind::Draft);
        let (summary, rationale, confidence, details) = match kind {
            OutputKind::Draft | OutputKind::Diversified => {
                parse_reply::<ProposalReply>(text).map(|(r, raw)| {
                    let rationale = if r.differentiation.is_empty() {
                        r.strengths.join("; ")
                    } else {
                        r.differentiation.clone()
                    };
                    (r.summary, rationale, r.confidence, raw)
                })
            }
            OutputKind::Refinement => parse_reply::<RefinementReply>(text)
                .map(|(r, raw)| (r.summary, r.patch_notes.join("; "), r.confidence, raw)),
            OutputKind::Argument => parse_reply::<ArgumentReply>(text).map(|(r, raw)| {
                (
                    r.main_argument,
                    r.critique_of_alternatives,
                    FALLBACK_CONFIDENCE,
                    raw,
                )
            }),
            OutputKind::Collaboration => parse_reply::<CollaborationReply>(text).map(|(r, raw)| {
                (
                    r.collaborative_summary,
                    r.specific_improvements.join("; "),
                    r.confidence,
                    raw,
                )
            }),
        }
        .filter(|(summary, ..)| !summary.trim().is_empty())
        .unwrap_or_else(|| {
            (
                text.trim().to_string(),
                String::new(),
                FALLBACK_CONFIDENCE,
                serde_json::Value::Null,
            )
        });

        let confidence = if confidence > 0.0 && confidence <= 1.0 {
            confidence
        } else {
            FALLBACK_CONFIDENCE
        };

        StageOutput {
            kind,
            stage,
            round,
            persona: PersonaRef::from(self.persona),
            summary,
            rationale,
            confidence,
            details,
            tokens: Default::default(),
            archived: false,
            created_at: Utc::now(),
        }
    }
}

/// Turn parsed axiom drafts into an id'd set, dropping blank statements.
pub(crate) fn axiom_set(
    session: &Session,
    source: AxiomSource,
    drafts: Vec<crate::parser::AxiomDraft>,
    theory_contribution: String,
) -> AxiomSet {
    let axioms = drafts
        .into_iter()
        .filter(|d| !d.statement.trim().is_empty())
        .enumerate()
        .map(|(index, d)| Axiom {
            id: axiom_id(&session.id, &source, index),
            statement: d.statement.trim().to_string(),
            axiom_type: if d.axiom_type.is_empty() {
                "assumption".to_string()
            } else {
                d.axiom_type
            },
            confidence: d.confidence.clamp(0.0, 1.0),
            vulnerability: d.vulnerability.filter(|v| !v.trim().is_empty()),
            potential_biases: d.potential_biases,
        })
        .collect();

    AxiomSet {
        source,
        axioms,
        theory_contribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use council_core::{LogDraft, LogRecord, SessionConfig};
    use uuid::Uuid;

    fn session() -> (Session, Persona) {
        let persona = Persona::new("skeptic", "The Skeptic", "Doubt everything.");
        let bindings = vec![persona.clone(), Persona::new("p2", "Other", "t")];
        let entry = LogDraft::engine(LogRecord::SessionStarted {
            prompt: "How should we cache?".to_string(),
            config: SessionConfig {
                worker_count: 2,
                ..Default::default()
            },
            bindings,
        })
        .into_entry(Uuid::new_v4(), 1);
        (Session::start(&entry).unwrap(), persona)
    }

    #[tokio::test]
    async fn test_draft_parses_json_reply() {
        let (session, persona) = session();
        let scripted = Arc::new(ScriptedGateway::new());
        scripted.reply(
            AgentTask::Draft,
            r#"{"summary": "Use a write-through cache", "strengths": ["simple"], "confidence": 0.8}"#,
        );
        let gateway: Arc<dyn InferenceGateway> = scripted.clone();

        let reply = WorkerAgent::new(&gateway, &session, "worker_1", &persona)
            .contribute(Stage::Draft, 1)
            .await
            .unwrap();

        assert_eq!(reply.value.kind, OutputKind::Draft);
        assert_eq!(reply.value.summary, "Use a write-through cache");
        assert_eq!(reply.value.rationale, "simple");
        assert_eq!(reply.value.confidence, 0.8);
        assert_eq!(reply.value.persona.id, "skeptic");

        let calls = scripted.calls();
        assert_eq!(calls[0].slot_id.as_deref(), Some("worker_1"));
        assert!(calls[0].prompt.contains("How should we cache?"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_to_text() {
        let (session, persona) = session();
        let scripted = Arc::new(ScriptedGateway::new());
        scripted.reply(AgentTask::Draft, "Just cache everything in memory.");
        let gateway: Arc<dyn InferenceGateway> = scripted;

        let reply = WorkerAgent::new(&gateway, &session, "worker_1", &persona)
            .contribute(Stage::Draft, 1)
            .await
            .unwrap();

        assert_eq!(reply.value.summary, "Just cache everything in memory.");
        assert_eq!(reply.value.confidence, FALLBACK_CONFIDENCE);
        assert!(reply.value.details.is_null());
    }

    #[tokio::test]
    async fn test_axioms_get_stable_ids() {
        let (session, persona) = session();
        let scripted = Arc::new(ScriptedGateway::new());
        scripted.reply(
            AgentTask::WorkerAxioms,
            r#"{"axioms": [{"statement": "  "}, {"statement": "Latency matters most", "confidence": 3}]}"#,
        );
        let gateway: Arc<dyn InferenceGateway> = scripted;

        let reply = WorkerAgent::new(&gateway, &session, "worker_1", &persona)
            .axioms()
            .await
            .unwrap();

        let set = reply.value;
        assert_eq!(set.source.key(), "worker_1");
        assert_eq!(set.axioms.len(), 1);
        assert!(set.axioms[0].id.ends_with("_worker_1_1"));
        assert_eq!(set.axioms[0].confidence, 1.0);
        assert_eq!(set.axioms[0].axiom_type, "assumption");
    }
}
