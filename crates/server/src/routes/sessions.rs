use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use council_core::{
    LogEntry, PersonaRef, Session, SessionStatus, Stage, SwapMode, VoteOutcome, VoteSubmission,
};
use orchestrator::{FeedbackInput, FeedbackKind, ReplayReport, SessionStatusView, StartRequest};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, ErrorResponse};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub worker_count: usize,
    pub refinement_rounds: u32,
    pub collaboration_rounds: u32,
    pub argument_rounds: u32,
    pub personas: Vec<PersonaRef>,
}

impl From<&Session> for StartSessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            worker_count: session.config.worker_count,
            refinement_rounds: session.config.refinement_rounds,
            collaboration_rounds: session.config.collaboration_rounds,
            argument_rounds: session.config.argument_rounds,
            personas: session.slots.iter().map(|s| s.persona.clone()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub stage: Stage,
    pub status: SessionStatus,
    pub last_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<db::SnapshotSummary> for SessionSummary {
    fn from(summary: db::SnapshotSummary) -> Self {
        Self {
            session_id: summary.session_id,
            stage: summary.stage,
            status: summary.status,
            last_seq: summary.last_seq,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SwapPersonaRequest {
    pub slot_id: String,
    pub persona_id: String,
    #[serde(default)]
    pub mode: SwapMode,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EndSessionRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct FinalFeedbackRequest {
    /// May be empty; submitting still completes the session
    #[serde(default)]
    pub text: String,
}

#[utoipa::path(
    post,
    path = "/api/sessions",
    request_body = StartRequest,
    responses(
        (status = 201, description = "Session created", body = StartSessionResponse),
        (status = 400, description = "Invalid configuration", body = ErrorResponse),
        (status = 404, description = "Unknown persona", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), AppError> {
    let session = state.engine.start(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse::from(&session)),
    ))
}

#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "All persisted sessions", body = Vec<SessionSummary>)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let sessions = state.engine.list_sessions().await?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/status",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session progress", body = SessionStatusView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatusView>, AppError> {
    Ok(Json(state.engine.get_status(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/full-state",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Complete session state", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn get_full_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.engine.get_full_state(id).await?))
}

async fn feedback(
    state: &AppState,
    id: Uuid,
    kind: FeedbackKind,
    input: FeedbackInput,
) -> Result<Json<SessionStatusView>, AppError> {
    state.engine.submit_feedback(id, kind, input).await?;
    Ok(Json(state.engine.get_status(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/round-feedback",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = FeedbackInput,
    responses(
        (status = 200, description = "Feedback recorded", body = SessionStatusView),
        (status = 400, description = "Not awaiting this round's feedback", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn submit_round_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<FeedbackInput>,
) -> Result<Json<SessionStatusView>, AppError> {
    feedback(&state, id, FeedbackKind::Round, input).await
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/collab-feedback",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = FeedbackInput,
    responses(
        (status = 200, description = "Feedback recorded", body = SessionStatusView),
        (status = 400, description = "Not awaiting this round's feedback", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn submit_collab_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<FeedbackInput>,
) -> Result<Json<SessionStatusView>, AppError> {
    feedback(&state, id, FeedbackKind::Collaboration, input).await
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/argument-feedback",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = FeedbackInput,
    responses(
        (status = 200, description = "Feedback recorded", body = SessionStatusView),
        (status = 400, description = "Not awaiting this round's feedback", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn submit_argument_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<FeedbackInput>,
) -> Result<Json<SessionStatusView>, AppError> {
    feedback(&state, id, FeedbackKind::Argument, input).await
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/vote",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = VoteSubmission,
    responses(
        (status = 200, description = "Vote aggregated", body = VoteOutcome),
        (status = 400, description = "Not awaiting a vote, or invalid ranks", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn submit_vote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(vote): Json<VoteSubmission>,
) -> Result<Json<VoteOutcome>, AppError> {
    Ok(Json(state.engine.vote(id, vote).await?))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/final-feedback",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = FinalFeedbackRequest,
    responses(
        (status = 200, description = "Session completed", body = SessionStatusView),
        (status = 400, description = "Final output not produced yet", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn submit_final_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FinalFeedbackRequest>,
) -> Result<Json<SessionStatusView>, AppError> {
    state.engine.submit_final_feedback(id, &request.text).await?;
    Ok(Json(state.engine.get_status(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/swap-persona",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = SwapPersonaRequest,
    responses(
        (status = 200, description = "Slot rebound", body = SessionStatusView),
        (status = 404, description = "Session or persona not found", body = ErrorResponse),
        (status = 409, description = "A run is in flight", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn swap_persona(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SwapPersonaRequest>,
) -> Result<Json<SessionStatusView>, AppError> {
    state
        .engine
        .swap_persona(id, &request.slot_id, &request.persona_id, request.mode)
        .await?;
    Ok(Json(state.engine.get_status(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/end",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = EndSessionRequest,
    responses(
        (status = 200, description = "Session aborted", body = SessionStatusView),
        (status = 400, description = "Session already ended", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<EndSessionRequest>>,
) -> Result<Json<SessionStatusView>, AppError> {
    let reason = request.map(|Json(r)| r.reason).unwrap_or_default();
    state.engine.end_session(id, &reason).await?;
    Ok(Json(state.engine.get_status(id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/log",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Every log entry in order", body = Vec<LogEntry>),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn export_log(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    Ok(Json(state.engine.export_log(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/replay",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Log replay compared with live state", body = ReplayReport),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 422, description = "Log is corrupt", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn verify_replay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayReport>, AppError> {
    Ok(Json(state.engine.verify_replay(id).await?))
}
