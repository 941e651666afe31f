#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Match3 Battle Hub
//!
//! The realtime coordination core of a two-player turn-based match-3 game:
//! a WebSocket hub that pairs players, routes authoritative move and state
//! messages between them, measures round-trip latency, survives transient
//! disconnects, and reconciles conflicting state snapshots.
//!
//! The match-3 grid/eliminate/cascade engine, scoring rules, AI opponent,
//! and rendering are external collaborators; this crate exchanges opaque
//! move tokens and grid snapshots with them without interpreting game rules.

/// Client-side orchestration: Transport and Peer Session Controller.
pub mod client;

/// Layered configuration loading and validation.
pub mod config;

/// Conflict detection and resolution between divergent snapshots.
pub mod conflict;

/// Structured error taxonomy shared across components.
pub mod error;

/// Hub-side shared state, message routing, and background tasks.
pub mod hub;

/// Structured logging configuration.
pub mod logging;

/// Wire protocol: envelope shape, message schemas, error codes, codec.
pub mod protocol;

/// Client-side local snapshot store and reconnection handshake.
pub mod reconnection;

/// Room membership, turn order, broadcast, and the room registry.
pub mod room;

/// FIFO matchmaking queue.
pub mod matchmaker;

/// Snapshot/delta generation, application, and mode selection.
pub mod sync;

/// Axum WebSocket routes and per-connection handling.
pub mod websocket;
