//! Room membership, turn order, broadcast, spectator fanout (§4.4), and the
//! Room Registry (§4.3).

mod actor;
mod registry;
#[allow(clippy::module_inception)]
mod room;

pub use actor::{FanoutSink, RoomCommand, RoomHandle};
pub use registry::RoomRegistry;
pub use room::{Fanout, Room, RoomSummary};
