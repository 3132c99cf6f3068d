use uuid::Uuid;

use crate::{
    clock::{ms_to_secs, until_next_boundary_ms},
    dao::models::RoundStatus,
    dto::{
        round::{CurrentState, ParticipantResult, RoundDetails, RoundSummary, UserStats},
        validation::validate_user_id,
    },
    error::ServiceError,
    state::SharedState,
};

/// Current round, time left in it and time until the next boundary, read from one snapshot.
pub fn current_state(state: &SharedState) -> CurrentState {
    let snapshot = state.session();
    let now_ms = state.now_ms();
    let next_ms = until_next_boundary_ms(now_ms, state.config().cycle_interval_ms());

    match snapshot.active {
        Some(active) => CurrentState {
            session: Some(RoundSummary::from(&active.round)),
            time_left: ms_to_secs(active.time_left_ms(now_ms)),
            next_session_start: ms_to_secs(next_ms),
        },
        None => CurrentState {
            session: None,
            time_left: 0.0,
            next_session_start: ms_to_secs(next_ms),
        },
    }
}

/// Look up a round; participant outcomes are included only once it is completed.
pub async fn round_details(state: &SharedState, round_id: Uuid) -> Result<RoundDetails, ServiceError> {
    let store = state.require_round_store().await?;
    let round = store
        .get_round(round_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("round `{round_id}`")))?;

    let participants = if round.status == RoundStatus::Completed {
        let participants = store.list_participants(round_id).await?;
        Some(participants.iter().map(ParticipantResult::from).collect())
    } else {
        None
    };

    Ok(RoundDetails {
        round: RoundSummary::from(&round),
        participants,
    })
}

/// Totals over every round a user joined.
pub async fn user_stats(state: &SharedState, user_id: &str) -> Result<UserStats, ServiceError> {
    validate_user_id(user_id).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let store = state.require_round_store().await?;
    let stats = store.user_stats(user_id.to_owned()).await?;
    Ok(stats.into())
}
