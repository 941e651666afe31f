//! Client-side orchestration (§4.2, §4.9): the Transport and the Peer
//! Session Controller that drives it.
//!
//! - `outbound`: bounded, drop-oldest-non-critical send queue
//! - `transport`: the WebSocket connection, heartbeat, and reconnect loop
//! - `controller`: the single API surface exposed to the surrounding game
//!   app, composing the Transport with a State Synchronizer, Conflict
//!   Resolver, and Reconnection Manager

mod controller;
mod outbound;
mod transport;

pub use controller::{
    ControllerEvent, GameEngineCommands, GameEngineSnapshot, PeerSessionController,
    RoomJoinOutcome, SessionOptions, SessionState,
};
pub use outbound::{ClientOutboundFrame, ClientOutboundQueue, PushOutcome};
pub use transport::{Transport, TransportState};
