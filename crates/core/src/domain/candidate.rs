use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A synthesized proposal subject to voting. Immutable once synthesized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Candidate {
    pub id: String,
    pub summary: String,
    pub best_use: String,
    #[serde(default)]
    pub tradeoffs: Vec<String>,
    #[serde(default)]
    pub failure_modes: Vec<String>,
    /// Worker slots whose outputs this candidate was derived from
    #[serde(default)]
    pub source_slots: Vec<String>,
}

/// Machine score for one candidate, clamped to [0, 10].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct MachineScore {
    pub candidate_id: String,
    pub score: f64,
    pub rationale: String,
}

impl MachineScore {
    pub const MAX: f64 = 10.0;

    pub fn new(candidate_id: impl Into<String>, score: f64, rationale: impl Into<String>) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, Self::MAX)
        } else {
            0.0
        };
        Self {
            candidate_id: candidate_id.into(),
            score,
            rationale: rationale.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    Compatible,
    PartiallyCompatible,
    Incompatible,
}

impl Compatibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compatible => "compatible",
            Self::PartiallyCompatible => "partially_compatible",
            Self::Incompatible => "incompatible",
        }
    }

    /// Lenient parse of a synthesizer verdict; anything unrecognized is
    /// treated as incompatible so the pipeline skips collaboration.
    pub fn from_verdict(s: &str) -> Self {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "compatible" => Self::Compatible,
            "partially_compatible" | "partial" | "partially" => Self::PartiallyCompatible,
            _ => Self::Incompatible,
        }
    }

    pub fn allows_collaboration(&self) -> bool {
        matches!(self, Self::Compatible | Self::PartiallyCompatible)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct CompatibilityReport {
    pub verdict: Compatibility,
    #[serde(default)]
    pub overlap_areas: Vec<String>,
    #[serde(default)]
    pub conflict_areas: Vec<String>,
    #[serde(default)]
    pub merge_strategy: Option<String>,
}

/// Synthesizer questions addressed to each worker slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct QuestionSet {
    pub by_slot: BTreeMap<String, Vec<String>>,
    pub observations: String,
    /// Whether these were generated from refinements rather than drafts
    #[serde(default)]
    pub follow_up: bool,
    /// Refinement round the questions are for
    #[serde(default)]
    pub round: u32,
}

impl QuestionSet {
    pub fn for_slot(&self, slot_id: &str) -> &[String] {
        self.by_slot.get(slot_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_score_clamps() {
        assert_eq!(MachineScore::new("c1", 14.0, "").score, 10.0);
        assert_eq!(MachineScore::new("c1", -2.0, "").score, 0.0);
        assert_eq!(MachineScore::new("c1", f64::NAN, "").score, 0.0);
        assert_eq!(MachineScore::new("c1", 7.5, "").score, 7.5);
    }

    #[test]
    fn test_compatibility_verdicts() {
        assert_eq!(Compatibility::from_verdict("COMPATIBLE"), Compatibility::Compatible);
        assert_eq!(
            Compatibility::from_verdict("partially-compatible"),
            Compatibility::PartiallyCompatible
        );
        assert_eq!(Compatibility::from_verdict("who knows"), Compatibility::Incompatible);
        assert!(Compatibility::PartiallyCompatible.allows_collaboration());
        assert!(!Compatibility::Incompatible.allows_collaboration());
    }

    #[test]
    fn test_question_set_for_unknown_slot() {
        let questions = QuestionSet::default();
        assert!(questions.for_slot("worker_3").is_empty());
    }
}
