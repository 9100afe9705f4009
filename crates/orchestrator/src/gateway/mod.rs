//! Inference gateway: the seam between the engine and the generative backend.
//!
//! The engine only talks to [`InferenceGateway`]. [`OllamaGateway`] binds it
//! to a local model runtime over HTTP.

mod ollama;
#[cfg(any(test, feature = "testing"))]
mod scripted;

use async_trait::async_trait;
use council_core::TokenUsage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use ollama::OllamaGateway;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{RecordedCall, ScriptedGateway};

/// Rough characters-per-token ratio used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Worker,
    Synthesizer,
}

/// What a single generation call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTask {
    Draft,
    Refine,
    Argue,
    Collaborate,
    Diversify,
    WorkerAxioms,
    Questions,
    FollowUp,
    Compatibility,
    Candidates,
    Commentary,
    Score,
    UserAxioms,
    AxiomNetwork,
    FinalAnswer,
}

impl AgentTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Refine => "refine",
            Self::Argue => "argue",
            Self::Collaborate => "collaborate",
            Self::Diversify => "diversify",
            Self::WorkerAxioms => "worker_axioms",
            Self::Questions => "questions",
            Self::FollowUp => "follow_up",
            Self::Compatibility => "compatibility",
            Self::Candidates => "candidates",
            Self::Commentary => "commentary",
            Self::Score => "score",
            Self::UserAxioms => "user_axioms",
            Self::AxiomNetwork => "axiom_network",
            Self::FinalAnswer => "final_answer",
        }
    }

    pub fn role(&self) -> AgentRole {
        match self {
            Self::Draft
            | Self::Refine
            | Self::Argue
            | Self::Collaborate
            | Self::Diversify
            | Self::WorkerAxioms => AgentRole::Worker,
            _ => AgentRole::Synthesizer,
        }
    }

    /// Whether the backend is asked for a JSON object.
    pub fn wants_json(&self) -> bool {
        !matches!(self, Self::Commentary | Self::FinalAnswer)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task: AgentTask,
    /// Worker slot issuing the call, if any
    pub slot_id: Option<String>,
    pub round: u32,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(task: AgentTask, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task,
            slot_id: None,
            round: 0,
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 512,
        }
    }

    pub fn for_slot(mut self, slot_id: impl Into<String>, round: u32) -> Self {
        self.slot_id = Some(slot_id.into());
        self.round = round;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn role(&self) -> AgentRole {
        self.task.role()
    }

    pub fn estimated_prompt_tokens(&self) -> usize {
        estimate_tokens(&self.system) + estimate_tokens(&self.prompt)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub tokens: TokenUsage,
    /// Resource pressure reported alongside the result
    pub memory_warning: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unreadable backend response: {0}")]
    Decode(String),

    #[error("prompt needs ~{needed} tokens but the context window is {limit}")]
    ContextOverflow { needed: usize, limit: usize },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GatewayError>;
}

/// Connection settings for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub worker_model: String,
    pub synthesizer_model: String,
    pub timeout_secs: u64,
    /// Context window requested from the runtime, in tokens
    pub context_window: usize,
    pub temperature: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            worker_model: "llama3.2:3b".to_string(),
            synthesizer_model: "qwen2.5:7b".to_string(),
            timeout_secs: 120,
            context_window: 8192,
            temperature: 0.7,
        }
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_roles() {
        assert_eq!(AgentTask::Draft.role(), AgentRole::Worker);
        assert_eq!(AgentTask::WorkerAxioms.role(), AgentRole::Worker);
        assert_eq!(AgentTask::Score.role(), AgentRole::Synthesizer);
        assert!(!AgentTask::FinalAnswer.wants_json());
        assert!(AgentTask::Compatibility.wants_json());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new(AgentTask::Refine, "sys", "prompt")
            .for_slot("worker_2", 3)
            .with_max_tokens(64);
        assert_eq!(request.slot_id.as_deref(), Some("worker_2"));
        assert_eq!(request.round, 3);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.role(), AgentRole::Worker);
    }
}
