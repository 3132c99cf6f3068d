use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dto::validation::validate_user_id;

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Must be the first frame on a connection.
    #[serde(rename_all = "camelCase")]
    Identification { user_id: String },
    /// Join the open round.
    #[serde(rename_all = "camelCase")]
    JoinGameSession { session_id: Uuid },
    /// Submit a guess. Kept wide so out-of-range values reach the range check.
    #[serde(rename_all = "camelCase")]
    SelectNumberInGameSession { session_id: Uuid, number: i64 },
    /// Ask for a fresh `sessionInit` event.
    SessionInit,
    #[serde(other)]
    Unknown,
}

/// Why an inbound frame was refused.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ClientMessage {
    /// Parse a text frame and validate the fields that carry user input.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        if let Self::Identification { user_id } = &message {
            if let Err(err) = validate_user_id(user_id) {
                let mut errors = ValidationErrors::new();
                errors.add("userId", err);
                return Err(errors.into());
            }
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_message_type() {
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"identification","userId":"u1"}"#).unwrap(),
            ClientMessage::Identification {
                user_id: "u1".into()
            }
        );

        let id = Uuid::new_v4();
        assert_eq!(
            ClientMessage::from_json_str(&format!(
                r#"{{"type":"joinGameSession","sessionId":"{id}"}}"#
            ))
            .unwrap(),
            ClientMessage::JoinGameSession { session_id: id }
        );
        assert_eq!(
            ClientMessage::from_json_str(&format!(
                r#"{{"type":"selectNumberInGameSession","sessionId":"{id}","number":-3}}"#
            ))
            .unwrap(),
            ClientMessage::SelectNumberInGameSession {
                session_id: id,
                number: -3
            }
        );
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"sessionInit"}"#).unwrap(),
            ClientMessage::SessionInit
        );
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"dance"}"#).unwrap(),
            ClientMessage::Unknown
        );
    }

    #[test]
    fn invalid_user_id_is_refused() {
        let err =
            ClientMessage::from_json_str(r#"{"type":"identification","userId":"a b"}"#).unwrap_err();
        assert!(matches!(err, InboundError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_refused() {
        let err = ClientMessage::from_json_str("{").unwrap_err();
        assert!(matches!(err, InboundError::Malformed(_)));
        let err = ClientMessage::from_json_str(r#"{"type":"joinGameSession","sessionId":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, InboundError::Malformed(_)));
    }
}
