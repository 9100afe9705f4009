use std::collections::BTreeSet;
use std::sync::Arc;

use council_core::{
    build_network, AxiomNetwork, AxiomSet, AxiomSource, Candidate, Compatibility,
    CompatibilityReport, MachineScore, OutputKind, QuestionSet, Session, Stage,
};

use super::worker::axiom_set;
use super::{generate, positions, AgentReply};
use crate::gateway::{AgentTask, GatewayError, Generation, GenerationRequest, InferenceGateway};
use crate::parser::{
    parse_reply, AxiomReply, CandidatesReply, CompatibilityReply, NetworkReply, QuestionsReply,
    ScoreReply,
};
use crate::prompts::{Contribution, CouncilPrompts, SYNTHESIZER_SYSTEM};

/// The council's single synthesizer role.
pub struct Synthesizer<'a> {
    gateway: &'a Arc<dyn InferenceGateway>,
    session: &'a Session,
}

impl<'a> Synthesizer<'a> {
    pub fn new(gateway: &'a Arc<dyn InferenceGateway>, session: &'a Session) -> Self {
        Self { gateway, session }
    }

    async fn ask(&self, task: AgentTask, prompt: String) -> Result<Generation, GatewayError> {
        let request = GenerationRequest::new(task, SYNTHESIZER_SYSTEM, prompt)
            .with_max_tokens(self.session.config.synthesizer_max_tokens);
        generate(self.gateway, request).await
    }

    /// Questions for each worker: from drafts in round 1, from the latest
    /// refinements and user feedback afterwards.
    pub async fn questions(&self, round: u32) -> Result<AgentReply<QuestionSet>, GatewayError> {
        let follow_up = round > 1;
        let generation = if follow_up {
            let refinements = self.latest_of(OutputKind::Refinement);
            let feedback = self.session.user_feedback_history();
            let prompt = CouncilPrompts::follow_up(&self.session.prompt, &refinements, &feedback);
            self.ask(AgentTask::FollowUp, prompt).await?
        } else {
            let proposals = positions(self.session, None);
            let prompt = CouncilPrompts::questions(&self.session.prompt, &proposals);
            self.ask(AgentTask::Questions, prompt).await?
        };

        let known: BTreeSet<&str> = self.session.slots.iter().map(|s| s.id.as_str()).collect();
        let mut questions = QuestionSet {
            follow_up,
            round,
            ..Default::default()
        };
        match parse_reply::<QuestionsReply>(&generation.text) {
            Some((reply, _)) => {
                for (worker, asked) in reply.questions_by_worker {
                    let slot_id = normalize_slot_id(&worker);
                    let asked: Vec<String> = asked
                        .into_iter()
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect();
                    if known.contains(slot_id.as_str()) && !asked.is_empty() {
                        questions.by_slot.entry(slot_id).or_default().extend(asked);
                    }
                }
                questions.observations = reply.overall_observations;
            }
            None => questions.observations = generation.text.trim().to_string(),
        }
        Ok(AgentReply::new(questions, generation))
    }

    /// Judge whether the refined proposals can be merged. Anything that
    /// cannot be read counts as incompatible.
    pub async fn compatibility(&self) -> Result<AgentReply<CompatibilityReport>, GatewayError> {
        let proposals = positions(self.session, None);
        let prompt = CouncilPrompts::compatibility(&self.session.prompt, &proposals);
        let generation = self.ask(AgentTask::Compatibility, prompt).await?;

        let report = match parse_reply::<CompatibilityReply>(&generation.text) {
            Some((reply, _)) => CompatibilityReport {
                verdict: Compatibility::from_verdict(&reply.compatibility),
                overlap_areas: reply.overlap_areas,
                conflict_areas: reply.conflict_areas,
                merge_strategy: reply.merge_strategy.filter(|s| !s.trim().is_empty()),
            },
            None => CompatibilityReport {
                verdict: Compatibility::Incompatible,
                overlap_areas: Vec::new(),
                conflict_areas: Vec::new(),
                merge_strategy: None,
            },
        };
        Ok(AgentReply::new(report, generation))
    }

    /// Synthesize candidates. An unreadable reply yields none.
    pub async fn candidates(&self) -> Result<AgentReply<Vec<Candidate>>, GatewayError> {
        let proposals = positions(self.session, None);
        let prompt = CouncilPrompts::candidates(
            &self.session.prompt,
            &proposals,
            self.session.compatibility.as_ref(),
        );
        let generation = self.ask(AgentTask::Candidates, prompt).await?;

        let known: BTreeSet<&str> = self.session.slots.iter().map(|s| s.id.as_str()).collect();
        let mut seen = BTreeSet::new();
        let candidates = parse_reply::<CandidatesReply>(&generation.text)
            .map(|(reply, _)| reply.candidates)
            .unwrap_or_default()
            .into_iter()
            .filter(|draft| !draft.summary.trim().is_empty())
            .enumerate()
            .map(|(index, draft)| {
                let mut id = draft.id.trim().to_string();
                if id.is_empty() || seen.contains(&id) {
                    id = format!("candidate_{}", index + 1);
                }
                seen.insert(id.clone());
                Candidate {
                    id,
                    summary: draft.summary.trim().to_string(),
                    best_use: draft.best_use_case,
                    tradeoffs: draft.trade_offs,
                    failure_modes: draft.failure_modes,
                    source_slots: draft
                        .source_workers
                        .iter()
                        .map(|w| normalize_slot_id(w))
                        .filter(|w| known.contains(w.as_str()))
                        .collect(),
                }
            })
            .collect();
        Ok(AgentReply::new(candidates, generation))
    }

    /// Short plain-text remarks on a finished worker round.
    pub async fn commentary(
        &self,
        stage: Stage,
        round: u32,
    ) -> Result<AgentReply<String>, GatewayError> {
        let outputs: Vec<Contribution<'_>> = self
            .session
            .slots
            .iter()
            .filter_map(|s| {
                s.visible_outputs()
                    .filter(|o| o.stage == stage && o.round == round)
                    .last()
                    .map(|o| Contribution {
                        slot_id: &s.id,
                        persona: &s.persona.name,
                        text: &o.summary,
                    })
            })
            .collect();
        let prompt = CouncilPrompts::commentary(stage, round, &outputs);
        let generation = self.ask(AgentTask::Commentary, prompt).await?;
        Ok(AgentReply::new(generation.text.trim().to_string(), generation))
    }

    /// Machine score for one candidate, clamped to [0, 10].
    pub async fn score(&self, candidate: &Candidate) -> Result<AgentReply<MachineScore>, GatewayError> {
        let arguments = self.latest_of(OutputKind::Argument);
        let prompt = CouncilPrompts::score(&self.session.prompt, candidate, &arguments);
        let generation = self.ask(AgentTask::Score, prompt).await?;

        let score = match parse_reply::<ScoreReply>(&generation.text) {
            Some((reply, _)) => MachineScore::new(&candidate.id, reply.score, reply.reasoning),
            None => {
                tracing::warn!(
                    session_id = %self.session.id,
                    candidate = %candidate.id,
                    "Unreadable score reply, scoring 0"
                );
                MachineScore::new(&candidate.id, 0.0, generation.text.trim())
            }
        };
        Ok(AgentReply::new(score, generation))
    }

    /// The user's own axioms, inferred from everything they said.
    pub async fn user_axioms(&self) -> Result<AgentReply<AxiomSet>, GatewayError> {
        let feedback = self.session.user_feedback_history();
        let prompt = CouncilPrompts::user_axioms(&self.session.prompt, &feedback);
        let generation = self.ask(AgentTask::UserAxioms, prompt).await?;

        let drafts = parse_reply::<AxiomReply>(&generation.text)
            .map(|(reply, _)| reply.axioms)
            .unwrap_or_default();
        let set = axiom_set(self.session, AxiomSource::User, drafts, String::new());
        Ok(AgentReply::new(set, generation))
    }

    /// Meta-axioms and flagged conflicts, folded into the keyword network.
    pub async fn network(&self, sets: &[AxiomSet]) -> Result<AgentReply<AxiomNetwork>, GatewayError> {
        let prompt = CouncilPrompts::axiom_network(&self.session.prompt, sets);
        let generation = self.ask(AgentTask::AxiomNetwork, prompt).await?;

        let reply = parse_reply::<NetworkReply>(&generation.text)
            .map(|(reply, _)| reply)
            .unwrap_or_default();
        let network = build_network(sets, reply.meta_axioms, &reply.conflicts);
        Ok(AgentReply::new(network, generation))
    }

    /// The council's answer to the user.
    pub async fn final_answer(&self) -> Result<AgentReply<String>, GatewayError> {
        let outcome = self.session.outcome.as_ref();
        let winner = outcome
            .and_then(|o| o.winner.as_deref())
            .and_then(|id| self.session.candidates().iter().find(|c| c.id == id));
        let feedback = self.session.user_feedback_history();
        let meta = self
            .session
            .axiom_network
            .as_ref()
            .map(|n| n.meta_axioms.clone())
            .unwrap_or_default();

        let prompt =
            CouncilPrompts::final_answer(&self.session.prompt, winner, outcome, &feedback, &meta);
        let generation = self.ask(AgentTask::FinalAnswer, prompt).await?;
        Ok(AgentReply::new(generation.text.trim().to_string(), generation))
    }

    fn latest_of(&self, kind: OutputKind) -> Vec<Contribution<'a>> {
        self.session
            .slots
            .iter()
            .filter_map(|s| {
                s.latest(kind).map(|o| Contribution {
                    slot_id: &s.id,
                    persona: &s.persona.name,
                    text: &o.summary,
                })
            })
            .collect()
    }
}

/// `Worker 2`, `worker-2` and `worker_2` all name slot `worker_2`.
fn normalize_slot_id(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}
