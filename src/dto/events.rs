use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::round::{ParticipantResult, RoundSummary};

/// Event names as they appear in the `event` field.
pub mod names {
    /// Current-state snapshot sent on connect and on request.
    pub const SESSION_INIT: &str = "sessionInit";
    /// A round opened.
    pub const SESSION_STARTED: &str = "sessionStarted";
    /// A round completed.
    pub const SESSION_ENDED: &str = "sessionEnded";
    /// The caller joined the open round.
    pub const GAME_SESSION_JOINED: &str = "gameSessionJoined";
    /// The caller's join was rejected.
    pub const GAME_SESSION_JOIN_ERROR: &str = "gameSessionJoinError";
    /// Another participant joined the caller's round.
    pub const PARTICIPANT_ENTERED: &str = "participantEnteredGameSession";
    /// The caller's guess was rejected.
    pub const NUMBER_SELECTION_ERROR: &str = "numberSelectionError";
    /// The caller's round completed; carries the results.
    pub const CURRENT_GAME_SESSION_ENDED: &str = "currentGameSessionEnded";
}

#[derive(Clone, Debug, PartialEq, Serialize)]
/// Envelope pushed to WebSocket subscribers: `{"event": ..., "data": ...}`.
pub struct ServerEvent {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl ServerEvent {
    /// Serialise `payload` into the `data` field.
    pub fn json<T>(event: &'static str, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize,
    {
        Ok(Self {
            event,
            data: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast to every subscriber when a round opens.
pub struct SessionStarted {
    pub id: Uuid,
    pub duration: f64,
    pub time_left: f64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast to every subscriber when a round completes.
pub struct SessionEnded {
    pub session_id: Uuid,
    pub winning_number: u8,
    /// Seconds until the next boundary.
    pub next_session_start: f64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent to a caller whose join was accepted.
pub struct GameSessionJoined {
    pub session: RoundSummary,
    pub participants: Vec<String>,
    pub time_left: f64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent to the rest of a round's room when someone joins.
pub struct ParticipantEntered {
    pub id: Uuid,
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Payload of `gameSessionJoinError` and `numberSelectionError`.
pub struct RejectionMessage {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Sent to a round's room when it completes.
pub struct CurrentGameSessionEnded {
    pub session_id: Uuid,
    pub winning_number: u8,
    pub participants: Vec<ParticipantResult>,
    pub duration: f64,
    pub time_left: f64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_wraps_camel_case_payload() {
        let event = ServerEvent::json(
            names::SESSION_ENDED,
            &SessionEnded {
                session_id: Uuid::nil(),
                winning_number: 6,
                next_session_start: 10.0,
            },
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "sessionEnded",
                "data": {
                    "sessionId": "00000000-0000-0000-0000-000000000000",
                    "winningNumber": 6,
                    "nextSessionStart": 10.0,
                }
            })
        );
    }
}
