//! Wire protocol: envelope shape, message schemas, and error codes.

pub mod codec;
pub mod error_codes;
pub mod messages;
pub mod types;

pub use codec::{decode, encode, CodecError, ParseErrorCounter, MAX_FRAME_BYTES};
pub use error_codes::ErrorCode;
pub use messages::{ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};
pub use types::{
    ChangeRecord, ConflictPolicy, ConflictRecord, ConflictType, Counters, GameSnapshot,
    GridSelector, MatchMode, MatchTicket, MoveToken, PeerId, PlayerRole, Position, RoomId,
    ScalarField, StateDelta, StateSnapshot, SyncMode,
};
