use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A behavioral profile bindable to a worker slot.
///
/// Personas are owned by an external store; the engine only reads them and
/// copies the fields it needs into the log at bind time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Persona {
    pub id: String,
    pub name: String,
    /// System prompt template the worker runs under
    pub prompt_template: String,
    #[serde(default)]
    pub reasoning_style: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub win_rate: f64,
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt_template: prompt_template.into(),
            reasoning_style: String::new(),
            tone: String::new(),
            usage_count: 0,
            win_rate: 0.0,
        }
    }

    /// System prompt for a worker bound to this persona.
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.prompt_template.trim().to_string();
        if !self.reasoning_style.is_empty() {
            prompt.push_str(&format!("\n\nReasoning style: {}", self.reasoning_style));
        }
        if !self.tone.is_empty() {
            prompt.push_str(&format!("\nTone: {}", self.tone));
        }
        prompt
    }
}

/// The persona reference recorded on a slot and on every output it produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PersonaRef {
    pub id: String,
    pub name: String,
}

impl From<&Persona> for PersonaRef {
    fn from(persona: &Persona) -> Self {
        Self {
            id: persona.id.clone(),
            name: persona.name.clone(),
        }
    }
}

/// What happens to a slot's prior outputs when its persona is replaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    /// Keep history, still tagged with the superseded persona
    #[default]
    KeepAll,
    /// Hide prior outputs from prompts and views; the log still has them
    Archive,
    /// Clear the slot and re-run its current stage
    Restart,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepAll => "keep_all",
            Self::Archive => "archive",
            Self::Restart => "restart",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keep_all" => Some(Self::KeepAll),
            "archive" => Some(Self::Archive),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}
