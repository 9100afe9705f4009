//! Lenient parsing of structured agent replies.
//!
//! Small models wrap JSON in prose or code fences and drift on field
//! types; every reply type here defaults missing fields and accepts
//! numbers given as strings.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use council_core::ConflictHint;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("Invalid fence regex pattern")
    })
}

/// Locate the JSON object inside a model reply.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    for caps in fence_pattern().captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(body.as_str().trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

/// Parse a reply into `T`, returning the raw JSON alongside it.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Option<(T, serde_json::Value)> {
    let value = extract_json(text)?;
    let parsed = serde_json::from_value(value.clone()).ok()?;
    Some((parsed, value))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items.into_iter().filter_map(value_to_text).collect(),
        serde_json::Value::Null => Vec::new(),
        other => value_to_text(other).into_iter().collect(),
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(value).unwrap_or_default())
}

fn value_to_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProposalReply {
    #[serde(deserialize_with = "lenient_text")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub key_assumptions: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub strengths: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub risks: Vec<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(deserialize_with = "lenient_text")]
    pub differentiation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RefinementReply {
    #[serde(deserialize_with = "lenient_text")]
    pub summary: String,
    pub answers_to_questions: BTreeMap<String, serde_json::Value>,
    #[serde(deserialize_with = "lenient_strings")]
    pub patch_notes: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub new_risks: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub new_tradeoffs: Vec<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArgumentReply {
    #[serde(deserialize_with = "lenient_text")]
    pub main_argument: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub key_strengths: Vec<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub critique_of_alternatives: String,
    #[serde(deserialize_with = "lenient_text")]
    pub rubric_alignment: String,
    #[serde(deserialize_with = "lenient_text")]
    pub user_feedback_addressed: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollaborationReply {
    #[serde(deserialize_with = "lenient_text")]
    pub collaborative_summary: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub specific_improvements: Vec<String>,
    pub integrated_mechanisms: BTreeMap<String, serde_json::Value>,
    #[serde(deserialize_with = "lenient_strings")]
    pub resolved_tensions: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub new_insights: Vec<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AxiomDraft {
    #[serde(deserialize_with = "lenient_text")]
    pub statement: String,
    #[serde(deserialize_with = "lenient_text")]
    pub axiom_type: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
    pub vulnerability: Option<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub potential_biases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AxiomReply {
    pub axioms: Vec<AxiomDraft>,
    #[serde(deserialize_with = "lenient_text")]
    pub theory_contribution: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuestionsReply {
    pub questions_by_worker: BTreeMap<String, Vec<String>>,
    #[serde(deserialize_with = "lenient_text")]
    pub overall_observations: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompatibilityReply {
    #[serde(deserialize_with = "lenient_text")]
    pub compatibility: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub overlap_areas: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub conflict_areas: Vec<String>,
    pub merge_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CandidateDraft {
    #[serde(deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub source_workers: Vec<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_text")]
    pub best_use_case: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub trade_offs: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub failure_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CandidatesReply {
    pub candidates: Vec<CandidateDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoreReply {
    #[serde(deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(alias = "rationale", deserialize_with = "lenient_text")]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkReply {
    #[serde(deserialize_with = "lenient_strings")]
    pub meta_axioms: Vec<String>,
    pub conflicts: Vec<ConflictHint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_object() {
        let value = extract_json(r#"{"summary": "x"}"#).unwrap();
        assert_eq!(value["summary"], "x");
    }

    #[test]
    fn test_extract_from_fence_and_prose() {
        let text = "Here you go:\n```json\n{\"score\": 8}\n```\nThanks";
        assert_eq!(extract_json(text).unwrap()["score"], 8);

        let text = "Sure! {\"score\": 6, \"reasoning\": \"ok\"} hope that helps";
        assert_eq!(extract_json(text).unwrap()["score"], 6);
    }

    #[test]
    fn test_extract_rejects_non_objects() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1, 2]").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[test]
    fn test_lenient_fields() {
        let (reply, _) = parse_reply::<ScoreReply>(r#"{"score": "8.5", "rationale": "good"}"#)
            .unwrap();
        assert_eq!(reply.score, 8.5);
        assert_eq!(reply.reasoning, "good");

        let (reply, _) =
            parse_reply::<ProposalReply>(r#"{"summary": "s", "risks": "just one"}"#).unwrap();
        assert_eq!(reply.risks, vec!["just one"]);
        assert_eq!(reply.confidence, 0.0);
    }

    #[test]
    fn test_candidates_reply() {
        let text = r#"{"candidates": [{"id": "candidate_1", "summary": "A", "source_workers": ["worker_1"]}]}"#;
        let (reply, _) = parse_reply::<CandidatesReply>(text).unwrap();
        assert_eq!(reply.candidates.len(), 1);
        assert_eq!(reply.candidates[0].source_workers, vec!["worker_1"]);
        assert!(reply.candidates[0].trade_offs.is_empty());
    }
}
