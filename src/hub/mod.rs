//! The Hub: shared state, the per-peer outbound queue, and the message
//! router tying the room/matchmaker/reconnection components together
//! behind the WebSocket transport.

mod outbound;
mod peer;
mod router;
mod state;

pub use outbound::{OutboundFrame, OutboundQueue, PushOutcome};
pub use peer::{PeerHandle, PeerRegistry};
pub use router::handle_client_message;
pub use state::HubState;
