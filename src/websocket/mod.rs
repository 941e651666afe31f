//! WebSocket transport: the axum upgrade route, the per-connection
//! read/write loops, and outbound frame serialization.
//!
//! - `routes`: HTTP route setup (`/ws` upgrade, `/health`)
//! - `connection`: per-connection read/write loops
//! - `sending`: outbound frame serialization onto the socket

mod connection;
mod routes;
mod sending;

pub use routes::{bind, create_router, run_server, serve};
