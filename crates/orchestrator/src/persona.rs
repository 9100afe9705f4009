//! Persona lookup and slot rebinding.

use std::sync::RwLock;

use async_trait::async_trait;
use council_core::{LogRecord, Persona, PersonaRef, Session, SessionStatus, SwapMode};
use db::PersonaRepository;

use crate::error::{OrchestratorError, Result};

/// Read-only view of the persona catalogue.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Persona>>;

    async fn list(&self) -> Result<Vec<Persona>>;
}

#[async_trait]
impl PersonaStore for PersonaRepository {
    async fn get(&self, id: &str) -> Result<Option<Persona>> {
        Ok(self.find_by_id(id).await?)
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        Ok(self.find_all().await?)
    }
}

/// Catalogue held in memory, in insertion order.
#[derive(Default)]
pub struct InMemoryPersonaStore {
    personas: RwLock<Vec<Persona>>,
}

impl InMemoryPersonaStore {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self {
            personas: RwLock::new(personas),
        }
    }

    pub fn insert(&self, persona: Persona) {
        let mut personas = self
            .personas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        personas.retain(|p| p.id != persona.id);
        personas.push(persona);
    }
}

#[async_trait]
impl PersonaStore for InMemoryPersonaStore {
    async fn get(&self, id: &str) -> Result<Option<Persona>> {
        let personas = self
            .personas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(personas.iter().find(|p| p.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        let personas = self
            .personas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(personas.clone())
    }
}

/// Personas seeded when the configuration names none.
pub fn builtin_personas() -> Vec<Persona> {
    let mut pragmatist = Persona::new(
        "pragmatist",
        "The Pragmatist",
        "You favour solutions that can ship this quarter with the team and budget at hand. \
         Name concrete steps, owners and costs.",
    );
    pragmatist.reasoning_style = "incremental".to_string();
    pragmatist.tone = "direct".to_string();

    let mut skeptic = Persona::new(
        "skeptic",
        "The Skeptic",
        "You look for the hidden assumption, the failure case and the cost nobody priced in. \
         Challenge claims that lack evidence.",
    );
    skeptic.reasoning_style = "adversarial".to_string();
    skeptic.tone = "blunt".to_string();

    let mut visionary = Persona::new(
        "visionary",
        "The Visionary",
        "You think two steps ahead: where will this be in three years, and which choice keeps \
         the most options open?",
    );
    visionary.reasoning_style = "first principles".to_string();
    visionary.tone = "expansive".to_string();

    let mut analyst = Persona::new(
        "analyst",
        "The Analyst",
        "You quantify. Estimate magnitudes, compare alternatives on explicit criteria and state \
         your confidence.",
    );
    analyst.reasoning_style = "quantitative".to_string();
    analyst.tone = "measured".to_string();

    vec![pragmatist, skeptic, visionary, analyst]
}

/// Persona to run a slot under when the catalogue no longer has it.
pub fn fallback_persona(reference: &PersonaRef) -> Persona {
    Persona::new(
        reference.id.clone(),
        reference.name.clone(),
        format!(
            "You are {}, one member of a council of independent advisors.",
            reference.name
        ),
    )
}

/// Check a swap against the session and build the record that performs it.
pub fn swap_record(
    session: &Session,
    slot_id: &str,
    persona: &Persona,
    mode: SwapMode,
) -> Result<LogRecord> {
    if !matches!(
        session.status,
        SessionStatus::Active | SessionStatus::AwaitingInput
    ) {
        return Err(OrchestratorError::invalid_state(format!(
            "cannot swap personas while the session is {}",
            session.status.as_str()
        )));
    }

    let slot = session
        .slot(slot_id)
        .ok_or_else(|| OrchestratorError::invalid_state(format!("unknown slot {}", slot_id)))?;

    Ok(LogRecord::PersonaSwapped {
        slot_id: slot.id.clone(),
        from: slot.persona.clone(),
        to: PersonaRef::from(persona),
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_core::{LogDraft, SessionConfig};
    use uuid::Uuid;

    fn session(status_record: Option<LogRecord>) -> Session {
        let id = Uuid::new_v4();
        let personas = builtin_personas();
        let start = LogDraft::engine(LogRecord::SessionStarted {
            prompt: "p".to_string(),
            config: SessionConfig {
                worker_count: 2,
                ..Default::default()
            },
            bindings: personas[..2].to_vec(),
        })
        .into_entry(id, 1);
        let mut session = Session::start(&start).unwrap();
        if let Some(record) = status_record {
            session
                .apply(&LogDraft::engine(record).into_entry(id, 2))
                .unwrap();
        }
        session
    }

    #[tokio::test]
    async fn test_in_memory_store_lookup() {
        let store = InMemoryPersonaStore::new(builtin_personas());
        assert_eq!(store.list().await.unwrap().len(), 4);
        assert_eq!(
            store.get("skeptic").await.unwrap().unwrap().name,
            "The Skeptic"
        );
        assert!(store.get("nobody").await.unwrap().is_none());

        store.insert(Persona::new("skeptic", "Renamed", "x"));
        assert_eq!(store.list().await.unwrap().len(), 4);
        assert_eq!(store.get("skeptic").await.unwrap().unwrap().name, "Renamed");
    }

    #[test]
    fn test_swap_record_captures_both_personas() {
        let session = session(None);
        let target = &builtin_personas()[3];

        let record = swap_record(&session, "worker_2", target, SwapMode::Archive).unwrap();
        match record {
            LogRecord::PersonaSwapped {
                slot_id,
                from,
                to,
                mode,
            } => {
                assert_eq!(slot_id, "worker_2");
                assert_eq!(from.id, "skeptic");
                assert_eq!(to.id, "analyst");
                assert_eq!(mode, SwapMode::Archive);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_swap_rejected_on_error_or_unknown_slot() {
        let target = &builtin_personas()[0];

        let failed = session(Some(LogRecord::RunFailed {
            code: "upstream_generation_error".to_string(),
            message: "boom".to_string(),
        }));
        assert!(matches!(
            swap_record(&failed, "worker_1", target, SwapMode::KeepAll),
            Err(OrchestratorError::InvalidState(_))
        ));

        let active = session(None);
        assert!(swap_record(&active, "worker_9", target, SwapMode::KeepAll).is_err());
    }
}
