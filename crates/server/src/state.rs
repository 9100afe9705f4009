use std::sync::Arc;

use anyhow::Context;
use db::{EventRepository, PersonaRepository, SessionLog, SessionStore, SnapshotRepository};
use events::EventBus;
use orchestrator::{builtin_personas, CouncilEngine, InferenceGateway, OllamaGateway};
use sqlx::SqlitePool;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: CouncilEngine,
    pub event_bus: EventBus,
    pub personas: PersonaRepository,
}

impl AppState {
    /// Wire the engine onto an open pool with the given gateway.
    pub fn new(
        pool: SqlitePool,
        config: &ServerConfig,
        gateway: Arc<dyn InferenceGateway>,
    ) -> Self {
        let event_bus = EventBus::new();
        let personas = PersonaRepository::new(pool.clone());
        let store = SessionStore::new(
            SessionLog::new(config.data_dir()),
            SnapshotRepository::new(pool.clone()),
            EventRepository::new(pool),
        );
        let engine = CouncilEngine::new(store, gateway, Arc::new(personas.clone()))
            .with_event_bus(event_bus.clone())
            .with_defaults(config.defaults.clone());

        Self {
            engine,
            event_bus,
            personas,
        }
    }

    /// Open storage, seed personas and connect the HTTP gateway.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let pool = db::connect(&config.database_url())
            .await
            .context("Failed to open database")?;
        let gateway = OllamaGateway::new(config.gateway.clone())
            .context("Failed to build inference gateway")?;

        let state = Self::new(pool, config, Arc::new(gateway));
        state.seed_personas(config).await?;
        Ok(state)
    }

    /// Insert configured personas, or the built-in set when none are configured.
    pub async fn seed_personas(&self, config: &ServerConfig) -> anyhow::Result<usize> {
        let personas = if config.personas.is_empty() {
            builtin_personas()
        } else {
            config.personas.clone()
        };

        let mut inserted = 0;
        for persona in &personas {
            if self.personas.seed(persona).await? {
                inserted += 1;
            }
        }
        tracing::info!(inserted, total = personas.len(), "Personas seeded");
        Ok(inserted)
    }
}
