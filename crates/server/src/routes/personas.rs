use axum::extract::State;
use axum::Json;
use council_core::Persona;

use crate::error::AppError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/personas",
    responses(
        (status = 200, description = "Persona catalogue", body = Vec<Persona>)
    ),
    tag = "personas"
)]
pub async fn list_personas(State(state): State<AppState>) -> Result<Json<Vec<Persona>>, AppError> {
    Ok(Json(state.engine.personas().list().await?))
}
