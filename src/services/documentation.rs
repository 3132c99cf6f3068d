use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Number Rush Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::current_session,
        crate::routes::public::round_details,
        crate::routes::public::user_stats,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StrandedRoundDto,
            crate::dto::round::RoundSummary,
            crate::dto::round::RoundDetails,
            crate::dto::round::ParticipantResult,
            crate::dto::round::CurrentState,
            crate::dto::round::UserStats,
            crate::dto::ws::ClientMessage,
            crate::dto::events::SessionStarted,
            crate::dto::events::SessionEnded,
            crate::dto::events::GameSessionJoined,
            crate::dto::events::ParticipantEntered,
            crate::dto::events::RejectionMessage,
            crate::dto::events::CurrentGameSessionEnded,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rounds", description = "Read-only round and player queries"),
        (name = "players", description = "WebSocket operations for players"),
    )
)]
pub struct ApiDoc;
