//! Join and guess handling for the open round.
//!
//! Eligibility is read from the session snapshot, but the at-most-once rules are enforced by the
//! round store's conditional writes: the session check only filters obviously stale requests.

use std::ops::RangeInclusive;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clock::ms_to_secs,
    dao::{models::RoundStatus, storage::StorageError},
    dto::{events::GameSessionJoined, round::RoundSummary},
    error::ServiceError,
    services::events,
    state::{ConnectionId, SchedulerSignal, SharedState},
};

/// Why a join or guess was refused.
#[derive(Debug, Error)]
pub enum ParticipationError {
    /// No open round matches the requested id.
    #[error("Session not active")]
    RoundNotActive,
    /// The user already holds a participation in this round.
    #[error("You have already joined this session")]
    AlreadyJoined,
    /// A guess was sent without joining first.
    #[error("You have not joined this session")]
    NotJoined,
    /// The user's guess is already recorded.
    #[error("You have already picked a number")]
    AlreadyPicked,
    /// The guess lies outside the configured range.
    #[error("Number must be between {min} and {max}")]
    NumberOutOfRange {
        /// Lowest accepted guess.
        min: u8,
        /// Highest accepted guess.
        max: u8,
    },
    /// The request could not be served.
    #[error("Service unavailable")]
    Service(#[from] ServiceError),
}

impl ParticipationError {
    /// Eligibility rejections are expected outcomes, not faults.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ParticipationError::Service(_))
    }
}

/// Join `user_id` to the open round `round_id` on behalf of `connection`.
///
/// On success the caller receives `gameSessionJoined` and the rest of the room receives
/// `participantEnteredGameSession`. On failure the caller receives `gameSessionJoinError`.
pub async fn join(
    state: &SharedState,
    connection: ConnectionId,
    user_id: &str,
    round_id: Uuid,
) -> Result<(), ParticipationError> {
    let result = try_join(state, connection, user_id, round_id).await;
    if let Err(err) = &result {
        report(err, user_id, round_id, "join");
        events::send_join_error(state, connection, err.to_string());
    }
    result
}

/// Record `number` as the guess of `user_id` in the open round `round_id`.
///
/// Success is silent. On failure the caller receives `numberSelectionError`.
pub async fn select_number(
    state: &SharedState,
    connection: ConnectionId,
    user_id: &str,
    round_id: Uuid,
    number: i64,
) -> Result<(), ParticipationError> {
    let result = try_select_number(state, user_id, round_id, number).await;
    if let Err(err) = &result {
        report(err, user_id, round_id, "select number");
        events::send_number_selection_error(state, connection, err.to_string());
    }
    result
}

async fn try_join(
    state: &SharedState,
    connection: ConnectionId,
    user_id: &str,
    round_id: Uuid,
) -> Result<(), ParticipationError> {
    let active = state
        .session()
        .active_round(round_id)
        .cloned()
        .ok_or(ParticipationError::RoundNotActive)?;
    let store = state.require_round_store().await?;

    match store.get_round(round_id).await.map_err(ServiceError::from)? {
        Some(round) if round.status == RoundStatus::Active => {}
        _ => {
            flag_stale_session(state, round_id);
            return Err(ParticipationError::RoundNotActive);
        }
    }

    store
        .create_participation(user_id.to_owned(), round_id)
        .await
        .map_err(|err| match err {
            StorageError::Conflict { .. } => ParticipationError::AlreadyJoined,
            StorageError::RoundClosed { .. } => {
                flag_stale_session(state, round_id);
                ParticipationError::RoundNotActive
            }
            other => ServiceError::from(other).into(),
        })?;

    if let Err(err) = store.increment_player_count(round_id).await {
        warn!(round_id = %round_id, user_id, error = %err, "failed to increment player count");
    }

    if !state.hub().join_room(round_id, connection) {
        debug!(round_id = %round_id, user_id, "room closed while joining; results will not be pushed");
    }

    // The join is committed; a failed listing only narrows what the room is told.
    let participants: Vec<String> = match store.list_participants(round_id).await {
        Ok(participations) => participations
            .into_iter()
            .map(|participation| participation.user_id)
            .collect(),
        Err(err) => {
            warn!(round_id = %round_id, user_id, error = %err, "failed to list participants after join");
            vec![user_id.to_owned()]
        }
    };

    let mut session = RoundSummary::from(&active.round);
    session.player_count = u32::try_from(participants.len()).unwrap_or(u32::MAX);

    events::send_game_session_joined(
        state,
        connection,
        &GameSessionJoined {
            session,
            participants: participants.clone(),
            time_left: ms_to_secs(active.time_left_ms(state.now_ms())),
        },
    );
    events::send_participant_entered(state, round_id, participants, connection);

    debug!(round_id = %round_id, user_id, "participant joined");
    Ok(())
}

async fn try_select_number(
    state: &SharedState,
    user_id: &str,
    round_id: Uuid,
    number: i64,
) -> Result<(), ParticipationError> {
    if state.session().active_round(round_id).is_none() {
        return Err(ParticipationError::RoundNotActive);
    }
    let number = check_range(number, state.config().number_range())?;
    let store = state.require_round_store().await?;

    store
        .set_selected_number(user_id.to_owned(), round_id, number)
        .await
        .map_err(|err| match err {
            StorageError::Conflict { .. } => ParticipationError::AlreadyPicked,
            StorageError::NotFound { .. } => ParticipationError::NotJoined,
            StorageError::RoundClosed { .. } => {
                flag_stale_session(state, round_id);
                ParticipationError::RoundNotActive
            }
            other => ServiceError::from(other).into(),
        })?;

    debug!(round_id = %round_id, user_id, number, "number selected");
    Ok(())
}

fn check_range(number: i64, range: RangeInclusive<u8>) -> Result<u8, ParticipationError> {
    u8::try_from(number)
        .ok()
        .filter(|number| range.contains(number))
        .ok_or(ParticipationError::NumberOutOfRange {
            min: *range.start(),
            max: *range.end(),
        })
}

/// The store says the round is closed while the session still points at it.
fn flag_stale_session(state: &SharedState, round_id: Uuid) {
    if state.session().active_round(round_id).is_some() {
        warn!(round_id = %round_id, "session references a round the store reports closed");
        state.signal_scheduler(SchedulerSignal::StaleSession { round_id });
    }
}

fn report(err: &ParticipationError, user_id: &str, round_id: Uuid, action: &'static str) {
    if err.is_rejection() {
        debug!(round_id = %round_id, user_id, action, reason = %err, "request rejected");
    } else {
        warn!(round_id = %round_id, user_id, action, error = ?err, "request failed");
    }
}
