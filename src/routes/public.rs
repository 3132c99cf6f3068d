use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::round::{CurrentState, RoundDetails, UserStats},
    error::AppError,
    services::public_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/current",
    tag = "rounds",
    responses((status = 200, description = "Open round, time left and time until the next boundary", body = CurrentState))
)]
/// Return the same snapshot WebSocket clients receive as `sessionInit`.
pub async fn current_session(State(state): State<SharedState>) -> Json<CurrentState> {
    Json(public_service::current_state(&state))
}

#[utoipa::path(
    get,
    path = "/rounds/{id}",
    tag = "rounds",
    params(("id" = Uuid, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Round summary; participants once completed", body = RoundDetails),
        (status = 404, description = "Unknown round"),
        (status = 503, description = "Round store unavailable")
    )
)]
/// Look up one round.
pub async fn round_details(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoundDetails>, AppError> {
    let details = public_service::round_details(&state, id).await?;
    Ok(Json(details))
}

#[utoipa::path(
    get,
    path = "/users/{id}/stats",
    tag = "rounds",
    params(("id" = String, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Totals over every joined round", body = UserStats),
        (status = 400, description = "Malformed user identifier"),
        (status = 503, description = "Round store unavailable")
    )
)]
/// Return a player's game, win and loss totals.
pub async fn user_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<UserStats>, AppError> {
    let stats = public_service::user_stats(&state, &id).await?;
    Ok(Json(stats))
}

/// Configure the read-only query routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/current", get(current_session))
        .route("/rounds/{id}", get(round_details))
        .route("/users/{id}/stats", get(user_stats))
}
