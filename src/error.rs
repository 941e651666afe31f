//! Structured error taxonomy for cross-component propagation (§7).
//!
//! Each component gets its own `thiserror` enum; `HubError` composes them at
//! the points where more than one component's failure can surface through a
//! single call (mainly the message router). `anyhow::Result` is reserved for
//! the process boundary — startup, config loading, task supervision — where
//! an error is reported rather than matched on.

use thiserror::Error;

use crate::protocol::ErrorCode;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,
    #[error("peer holds no slot in this room")]
    NotAPlayer,
    #[error("it is not this peer's turn")]
    NotYourTurn,
    #[error("move number {got} is not the expected successor of {expected}")]
    InvalidMoveNumber { expected: u64, got: u64 },
    #[error("game has not started yet")]
    GameNotStarted,
    #[error("submitted snapshot version {submitted} is not newer than current {current}")]
    StaleSnapshot { current: u64, submitted: u64 },
}

impl RoomError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RoomFull => ErrorCode::RoomFull,
            Self::NotAPlayer => ErrorCode::NotInRoom,
            Self::NotYourTurn => ErrorCode::NotYourTurn,
            Self::InvalidMoveNumber { .. } => ErrorCode::InvalidMove,
            Self::GameNotStarted => ErrorCode::GameNotStarted,
            Self::StaleSnapshot { .. } => ErrorCode::StaleSnapshot,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("room not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum MatchmakerError {
    #[error("peer is not enqueued")]
    NotEnqueued,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("delta base version {base_version} does not match snapshot version {snapshot_version}")]
    VersionMismatch {
        base_version: u64,
        snapshot_version: u64,
    },
}

/// Client-side transport failures. These are logged and folded into
/// connection-state transitions rather than returned to the game app as
/// `Result` failures, per the propagation policy in §7.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("reconnection attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
    #[error("missed {missed} consecutive heartbeat pongs")]
    HeartbeatLost { missed: i64 },
    #[error("outbound queue is full of critical frames")]
    BackpressureAbort,
    #[error(transparent)]
    Codec(#[from] crate::protocol::CodecError),
}

#[derive(Debug, Error)]
pub enum ReconnectionError {
    #[error("disconnect duration exceeded the recovery window")]
    RecoveryTimeout,
    #[error("no snapshot is available for this peer")]
    NoSnapshot,
}

impl ReconnectionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RecoveryTimeout | Self::NoSnapshot => ErrorCode::ReconnectionFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Peer Session Controller failures (§4.9, §5 Cancellation and timeouts).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("connect() timed out before the handshake completed")]
    ConnectTimeout,
    #[error("createRoom() timed out waiting for a response")]
    CreateRoomTimeout,
    #[error("joinRoom() timed out waiting for a response")]
    JoinRoomTimeout,
    #[error("matchmaking search timed out")]
    MatchmakingTimeout,
    #[error("the session is not connected")]
    NotConnected,
    #[error("the session already has a connection in progress")]
    AlreadyConnected,
    #[error("the session holds no room")]
    NoRoom,
    #[error("a move can only be submitted while IN_BATTLE")]
    NotInBattle,
    #[error("received a reply of an unexpected shape for this request")]
    UnexpectedReply,
    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },
}

/// Top-level union used where a call site can fail for more than one
/// component-specific reason.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Matchmaker(#[from] MatchmakerError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Reconnection(#[from] ReconnectionError),
    #[error(transparent)]
    Codec(#[from] crate::protocol::CodecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HubError {
    /// Maps a session-logical or recovery error onto the wire `ErrorCode`
    /// it should be reported as. Protocol and transient-network kinds are
    /// not routed through here; they are logged and counted, never surfaced
    /// as `Result` failures (see §7 propagation policy).
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Room(e) => e.error_code(),
            Self::Registry(RegistryError::NotFound) => ErrorCode::RoomNotFound,
            Self::Reconnection(e) => e.error_code(),
            Self::Codec(_) => ErrorCode::ProtocolError,
            _ => ErrorCode::InternalError,
        }
    }
}
