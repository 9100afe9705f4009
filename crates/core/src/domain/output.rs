use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{PersonaRef, Stage, SwapMode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Draft,
    Refinement,
    Argument,
    Collaboration,
    Diversified,
}

impl OutputKind {
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Draft => Some(Self::Draft),
            Stage::Refinement => Some(Self::Refinement),
            Stage::Argumentation => Some(Self::Argument),
            Stage::Collaboration => Some(Self::Collaboration),
            Stage::Diversify => Some(Self::Diversified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Refinement => "refinement",
            Self::Argument => "argument",
            Self::Collaboration => "collaboration",
            Self::Diversified => "diversified",
        }
    }

    /// Kinds that restate the slot's whole proposal rather than a delta.
    pub fn is_proposal(&self) -> bool {
        matches!(self, Self::Draft | Self::Diversified | Self::Collaboration)
    }
}

/// One worker output for one stage round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StageOutput {
    pub kind: OutputKind,
    pub stage: Stage,
    pub round: u32,
    /// Persona the slot was bound to when this output was produced
    pub persona: PersonaRef,
    pub summary: String,
    pub rationale: String,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
    /// Full structured output as returned by the worker
    #[cfg_attr(feature = "typescript", ts(type = "Record<string, unknown>"))]
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub tokens: TokenUsage,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// A (stage, round) step a slot has finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StageMark {
    pub stage: Stage,
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct WorkerSlot {
    pub id: String,
    pub persona: PersonaRef,
    pub outputs: Vec<StageOutput>,
    /// Stage cursor: steps this slot has completed
    pub completed: Vec<StageMark>,
}

impl WorkerSlot {
    pub fn new(id: impl Into<String>, persona: PersonaRef) -> Self {
        Self {
            id: id.into(),
            persona,
            outputs: Vec::new(),
            completed: Vec::new(),
        }
    }

    pub fn has_completed(&self, stage: Stage, round: u32) -> bool {
        self.completed
            .iter()
            .any(|m| m.stage == stage && m.round == round)
    }

    pub fn record(&mut self, output: StageOutput) {
        let mark = StageMark {
            stage: output.stage,
            round: output.round,
        };
        if !self.completed.contains(&mark) {
            self.completed.push(mark);
        }
        self.outputs.push(output);
    }

    /// Outputs not hidden by an archive swap.
    pub fn visible_outputs(&self) -> impl Iterator<Item = &StageOutput> {
        self.outputs.iter().filter(|o| !o.archived)
    }

    pub fn latest(&self, kind: OutputKind) -> Option<&StageOutput> {
        self.visible_outputs().filter(|o| o.kind == kind).last()
    }

    /// The slot's current full proposal: its latest draft, diversified
    /// draft, or collaboration contribution.
    pub fn current_proposal(&self) -> Option<&StageOutput> {
        self.visible_outputs().filter(|o| o.kind.is_proposal()).last()
    }

    pub fn has_draft(&self) -> bool {
        self.current_proposal().is_some()
    }

    /// Rebind the slot; the caller has already validated the persona.
    pub fn rebind(&mut self, persona: PersonaRef, mode: SwapMode) {
        match mode {
            SwapMode::KeepAll => {}
            SwapMode::Archive => {
                for output in &mut self.outputs {
                    output.archived = true;
                }
            }
            SwapMode::Restart => {
                self.outputs.clear();
                self.completed.clear();
            }
        }
        self.persona = persona;
    }
}
