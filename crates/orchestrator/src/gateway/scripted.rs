//! Deterministic in-process gateway for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use council_core::TokenUsage;

use super::{
    AgentRole, AgentTask, GatewayError, Generation, GenerationRequest, InferenceGateway,
};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task: AgentTask,
    pub role: AgentRole,
    pub slot_id: Option<String>,
    pub round: u32,
    pub prompt: String,
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(GatewayError),
}

#[derive(Default)]
struct ScriptState {
    queued: HashMap<AgentTask, VecDeque<Scripted>>,
    sticky: HashMap<AgentTask, String>,
    calls: Vec<RecordedCall>,
}

/// Answers every task with plausible JSON unless a reply was scripted.
///
/// Queued replies are consumed first, then sticky replies, then defaults.
/// Default worker texts vary per call so refinements never converge by
/// accident.
#[derive(Default)]
pub struct ScriptedGateway {
    state: Mutex<ScriptState>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(&self, task: AgentTask, text: impl Into<String>) {
        self.lock()
            .queued
            .entry(task)
            .or_default()
            .push_back(Scripted::Reply(text.into()));
    }

    pub fn reply_always(&self, task: AgentTask, text: impl Into<String>) {
        self.lock().sticky.insert(task, text.into());
    }

    pub fn fail_next(&self, task: AgentTask, error: GatewayError) {
        self.lock()
            .queued
            .entry(task)
            .or_default()
            .push_back(Scripted::Fail(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, task: AgentTask) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.task == task)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GatewayError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                task: request.task,
                role: request.role(),
                slot_id: request.slot_id.clone(),
                round: request.round,
                prompt: request.prompt.clone(),
            });
            let call_index = state.calls.len();

            match state.queued.get_mut(&request.task).and_then(VecDeque::pop_front) {
                Some(scripted) => scripted,
                None => match state.sticky.get(&request.task) {
                    Some(text) => Scripted::Reply(text.clone()),
                    None => Scripted::Reply(default_reply(&request, call_index)),
                },
            }
        };

        match scripted {
            Scripted::Reply(text) => Ok(Generation {
                tokens: TokenUsage::new(
                    request.estimated_prompt_tokens() as u64,
                    super::estimate_tokens(&text) as u64,
                ),
                text,
                memory_warning: None,
            }),
            Scripted::Fail(error) => Err(error),
        }
    }
}

fn default_reply(request: &GenerationRequest, call_index: usize) -> String {
    let slot = request.slot_id.as_deref().unwrap_or("synthesizer");
    let marker = format!("v{}x", call_index);

    let value = match request.task {
        AgentTask::Draft | AgentTask::Diversify => serde_json::json!({
            "summary": format!("{} proposal {}", slot, marker),
            "key_assumptions": ["demand keeps growing"],
            "strengths": ["simple"],
            "risks": ["cost"],
            "confidence": 0.7,
            "differentiation": format!("angle {}", marker),
        }),
        AgentTask::Refine => serde_json::json!({
            "summary": format!("{} revision {}", slot, marker),
            "answers_to_questions": {},
            "patch_notes": [format!("tightened {}", marker)],
            "new_risks": [],
            "new_tradeoffs": [],
            "confidence": 0.75,
        }),
        AgentTask::Argue => serde_json::json!({
            "main_argument": format!("{} argues {}", slot, marker),
            "key_strengths": ["clarity"],
            "critique_of_alternatives": "others are vague",
            "rubric_alignment": "high",
        }),
        AgentTask::Collaborate => serde_json::json!({
            "collaborative_summary": format!("{} merged plan {}", slot, marker),
            "specific_improvements": ["shared cache"],
            "integrated_mechanisms": {},
            "resolved_tensions": [],
            "new_insights": [],
            "confidence": 0.8,
        }),
        AgentTask::WorkerAxioms => serde_json::json!({
            "axioms": [{
                "statement": format!("Teams should own {} services end to end", slot),
                "axiom_type": "core",
                "confidence": 0.8,
            }],
            "theory_contribution": "ownership",
        }),
        AgentTask::UserAxioms => serde_json::json!({
            "axioms": [{
                "statement": "The user values predictable operating cost",
                "axiom_type": "assumption",
                "confidence": 0.6,
            }],
        }),
        AgentTask::Questions | AgentTask::FollowUp => {
            let by_slot: serde_json::Map<String, serde_json::Value> = (1..=4)
                .map(|i| {
                    (
                        council_core::slot_id(i),
                        serde_json::json!([format!("What about failure case {}?", i)]),
                    )
                })
                .collect();
            serde_json::json!({
                "questions_by_worker": by_slot,
                "overall_observations": "Proposals overlap on caching",
            })
        }
        AgentTask::Compatibility => serde_json::json!({
            "compatibility": "compatible",
            "overlap_areas": ["caching"],
            "conflict_areas": [],
            "merge_strategy": "layer the proposals",
        }),
        AgentTask::Candidates => serde_json::json!({
            "candidates": [
                {
                    "id": "candidate_1",
                    "source_workers": ["worker_1"],
                    "summary": "Incremental rollout",
                    "best_use_case": "small teams",
                    "trade_offs": ["slower"],
                    "failure_modes": ["stalls"],
                },
                {
                    "id": "candidate_2",
                    "source_workers": ["worker_2"],
                    "summary": "Big-bang migration",
                    "best_use_case": "tight deadlines",
                    "trade_offs": ["risky"],
                    "failure_modes": ["outage"],
                },
            ],
        }),
        AgentTask::Score => serde_json::json!({
            "score": 7.0,
            "reasoning": "solid trade-offs",
        }),
        AgentTask::AxiomNetwork => serde_json::json!({
            "meta_axioms": ["Ownership drives quality"],
            "conflicts": [],
        }),
        AgentTask::Commentary => {
            return format!("Round {} commentary {}", request.round, marker);
        }
        AgentTask::FinalAnswer => {
            return format!("Final recommendation {}", marker);
        }
    };

    value.to_string()
}
