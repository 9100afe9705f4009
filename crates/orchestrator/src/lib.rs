//! Runs council sessions: the stage machine, the agents that talk to the
//! inference gateway, vote aggregation and the event stream clients follow.

pub mod agents;
pub mod aggregator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod parser;
pub mod persona;
pub mod prompts;
pub mod publisher;
pub mod run_guard;
pub mod state_machine;

pub use engine::{
    CouncilEngine, FeedbackInput, FeedbackKind, ReplayReport, SessionStatusView, SlotStatus,
    StartRequest,
};
pub use error::{OrchestratorError, Result};
pub use gateway::{GatewayConfig, GatewayError, InferenceGateway, OllamaGateway};
#[cfg(any(test, feature = "testing"))]
pub use gateway::{RecordedCall, ScriptedGateway};
pub use persona::{builtin_personas, InMemoryPersonaStore, PersonaStore};
pub use publisher::{EventStream, PublisherRegistry, SessionPublisher};
pub use state_machine::{NextStep, StageMachine};
