use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes surfaced on the wire `ERROR` message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    NotInRoom,
    InvalidMove,
    NotYourTurn,
    GameNotStarted,
    StaleSnapshot,
    ConnectionTimeout,
    ReconnectionFailed,
    ProtocolError,
    BackpressureAbort,
    InternalError,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomNotFound => {
                "The requested room could not be found. It may have been closed or the id is incorrect."
            }
            Self::RoomFull => {
                "The room already has two players. Try a different room or matchmaking."
            }
            Self::AlreadyInRoom => {
                "You are already in a room. Leave the current room before joining another."
            }
            Self::NotInRoom => {
                "You are not currently in any room. Join or create a room before performing this action."
            }
            Self::InvalidMove => {
                "The move's structure or move number is invalid for this room."
            }
            Self::NotYourTurn => {
                "It is not your turn. Wait for the current turn to flip before moving."
            }
            Self::GameNotStarted => {
                "The room has not started a game yet. Wait for the second player to join."
            }
            Self::StaleSnapshot => {
                "The submitted snapshot's version is not newer than the room's current snapshot."
            }
            Self::ConnectionTimeout => {
                "The operation timed out waiting for a response from the hub."
            }
            Self::ReconnectionFailed => {
                "Reconnection could not be completed within the recovery window."
            }
            Self::ProtocolError => {
                "Too many malformed frames were received on this connection; it has been closed."
            }
            Self::BackpressureAbort => {
                "The outbound queue filled with critical frames and the connection was closed."
            }
            Self::InternalError => {
                "An internal error occurred while processing the request."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ErrorCode] = &[
        ErrorCode::RoomNotFound,
        ErrorCode::RoomFull,
        ErrorCode::AlreadyInRoom,
        ErrorCode::NotInRoom,
        ErrorCode::InvalidMove,
        ErrorCode::NotYourTurn,
        ErrorCode::GameNotStarted,
        ErrorCode::StaleSnapshot,
        ErrorCode::ConnectionTimeout,
        ErrorCode::ReconnectionFailed,
        ErrorCode::ProtocolError,
        ErrorCode::BackpressureAbort,
        ErrorCode::InternalError,
    ];

    #[test]
    fn all_error_codes_have_descriptions() {
        for code in ALL {
            let description = code.description();
            assert!(!description.is_empty(), "{code:?} has empty description");
            assert!(
                description.len() > 10,
                "{code:?} has suspiciously short description: '{description}'"
            );
        }
    }

    #[test]
    fn display_uses_description() {
        let error = ErrorCode::RoomNotFound;
        assert_eq!(format!("{error}"), error.description());
    }

    #[test]
    fn serialization_matches_wire_table() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotYourTurn).unwrap(),
            "\"NOT_YOUR_TURN\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::BackpressureAbort).unwrap(),
            "\"BACKPRESSURE_ABORT\""
        );
    }
}
