pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AI Council API",
        version = "0.1.0",
        description = "Multi-agent debate sessions with human checkpoints"
    ),
    paths(
        routes::health_check,
        routes::list_personas,
        routes::start_session,
        routes::list_sessions,
        routes::get_status,
        routes::get_full_state,
        routes::submit_round_feedback,
        routes::submit_collab_feedback,
        routes::submit_argument_feedback,
        routes::submit_vote,
        routes::submit_final_feedback,
        routes::swap_persona,
        routes::end_session,
        routes::delete_session,
        routes::export_log,
        routes::verify_replay,
        routes::sse::run_stream,
        routes::sse::continue_stream,
        routes::sse::diversify_stream,
        routes::sse::finalize_stream,
        routes::sse::session_events_stream,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::StartSessionResponse,
        routes::SessionSummary,
        routes::SwapPersonaRequest,
        routes::EndSessionRequest,
        routes::FinalFeedbackRequest,
        error::ErrorResponse,
        orchestrator::StartRequest,
        orchestrator::FeedbackInput,
        orchestrator::SessionStatusView,
        orchestrator::SlotStatus,
        orchestrator::ReplayReport,
        council_core::Session,
        council_core::SessionConfig,
        council_core::Persona,
        council_core::PersonaRef,
        council_core::SwapMode,
        council_core::VoteSubmission,
        council_core::VoteOutcome,
        council_core::LogEntry,
        events::EventEnvelope,
        events::Event,
        events::StagePayload,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "personas", description = "Persona catalogue"),
        (name = "sessions", description = "Council session lifecycle and input"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route("/api/personas", get(routes::list_personas))
        .route(
            "/api/sessions",
            get(routes::list_sessions).post(routes::start_session),
        )
        .route(
            "/api/sessions/{id}",
            axum::routing::delete(routes::delete_session),
        )
        .route("/api/sessions/{id}/status", get(routes::get_status))
        .route("/api/sessions/{id}/full-state", get(routes::get_full_state))
        .route("/api/sessions/{id}/log", get(routes::export_log))
        .route("/api/sessions/{id}/replay", get(routes::verify_replay))
        .route("/api/sessions/{id}/run", get(routes::sse::run_stream))
        .route(
            "/api/sessions/{id}/continue",
            get(routes::sse::continue_stream),
        )
        .route(
            "/api/sessions/{id}/diversify",
            get(routes::sse::diversify_stream),
        )
        .route(
            "/api/sessions/{id}/finalize",
            get(routes::sse::finalize_stream),
        )
        .route(
            "/api/sessions/{id}/events",
            get(routes::sse::session_events_stream),
        )
        .route(
            "/api/sessions/{id}/round-feedback",
            post(routes::submit_round_feedback),
        )
        .route(
            "/api/sessions/{id}/collab-feedback",
            post(routes::submit_collab_feedback),
        )
        .route(
            "/api/sessions/{id}/argument-feedback",
            post(routes::submit_argument_feedback),
        )
        .route("/api/sessions/{id}/vote", post(routes::submit_vote))
        .route(
            "/api/sessions/{id}/final-feedback",
            post(routes::submit_final_feedback),
        )
        .route(
            "/api/sessions/{id}/swap-persona",
            post(routes::swap_persona),
        )
        .route("/api/sessions/{id}/end", post(routes::end_session))
        .route("/api/events", get(routes::sse::events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until the process is stopped.
pub async fn serve(config: config::ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        data_dir = %config.data_dir().display(),
        gateway = %config.gateway.base_url,
        "Council server listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
