use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    clock::ms_to_secs,
    dto::{
        events::{
            CurrentGameSessionEnded, GameSessionJoined, ParticipantEntered, RejectionMessage,
            ServerEvent, SessionEnded, SessionStarted, names,
        },
        round::{CurrentState, ParticipantResult},
    },
    state::{ActiveRound, ConnectionId, SharedState},
};

/// Tell every subscriber that a round opened.
pub fn broadcast_session_started(state: &SharedState, active: &ActiveRound) {
    let payload = SessionStarted {
        id: active.id(),
        duration: ms_to_secs(active.round.duration_ms),
        time_left: ms_to_secs(active.time_left_ms(state.now_ms())),
    };
    if let Some(event) = build(names::SESSION_STARTED, &payload) {
        state.hub().broadcast(event);
    }
}

/// Tell every subscriber that a round completed.
pub fn broadcast_session_ended(
    state: &SharedState,
    round_id: Uuid,
    winning_number: u8,
    next_session_start_ms: u64,
) {
    let payload = SessionEnded {
        session_id: round_id,
        winning_number,
        next_session_start: ms_to_secs(next_session_start_ms),
    };
    if let Some(event) = build(names::SESSION_ENDED, &payload) {
        state.hub().broadcast(event);
    }
}

/// Send the results of a completed round to the members of its room.
pub fn send_current_session_ended(
    state: &SharedState,
    members: &[ConnectionId],
    payload: &CurrentGameSessionEnded,
) -> usize {
    match build(names::CURRENT_GAME_SESSION_ENDED, payload) {
        Some(event) => state.hub().send_to_many(members, &event),
        None => 0,
    }
}

/// Serve the current-state snapshot to one subscriber.
pub fn send_session_init(state: &SharedState, connection: ConnectionId, payload: &CurrentState) {
    send_direct(state, connection, names::SESSION_INIT, payload);
}

/// Confirm a join to the caller.
pub fn send_game_session_joined(
    state: &SharedState,
    connection: ConnectionId,
    payload: &GameSessionJoined,
) {
    send_direct(state, connection, names::GAME_SESSION_JOINED, payload);
}

/// Tell the rest of the room that someone joined.
pub fn send_participant_entered(
    state: &SharedState,
    round_id: Uuid,
    participants: Vec<String>,
    joiner: ConnectionId,
) {
    let payload = ParticipantEntered {
        id: round_id,
        participants,
    };
    if let Some(event) = build(names::PARTICIPANT_ENTERED, &payload) {
        state.hub().send_to_room(round_id, &event, Some(joiner));
    }
}

/// Report a refused join to the caller.
pub fn send_join_error(state: &SharedState, connection: ConnectionId, message: String) {
    send_direct(
        state,
        connection,
        names::GAME_SESSION_JOIN_ERROR,
        &RejectionMessage { message },
    );
}

/// Report a refused guess to the caller.
pub fn send_number_selection_error(state: &SharedState, connection: ConnectionId, message: String) {
    send_direct(
        state,
        connection,
        names::NUMBER_SELECTION_ERROR,
        &RejectionMessage { message },
    );
}

/// Build the room payload for a completed round.
pub fn current_session_ended_payload(
    round_id: Uuid,
    winning_number: u8,
    duration_ms: u64,
    participants: Vec<ParticipantResult>,
) -> CurrentGameSessionEnded {
    CurrentGameSessionEnded {
        session_id: round_id,
        winning_number,
        participants,
        duration: ms_to_secs(duration_ms),
        time_left: 0.0,
    }
}

fn send_direct(
    state: &SharedState,
    connection: ConnectionId,
    event: &'static str,
    payload: &impl Serialize,
) {
    if let Some(event) = build(event, payload) {
        state.hub().send_to(connection, event);
    }
}

fn build(event: &'static str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(event, payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize event payload");
            None
        }
    }
}
