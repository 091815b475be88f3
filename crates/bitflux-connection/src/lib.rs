#![warn(missing_docs)]

//! bitflux-connection: the per-remote connection engine.
//!
//! A [`Connection`](connection::Connection) owns everything specific to one
//! remote endpoint: the handshake state machine, four families of send and
//! receive channels, the acknowledgment queue, fragment reassembly, RTT
//! estimation and MTU expansion. It performs no I/O of its own; every
//! heartbeat and every processed frame returns a list of
//! [`Action`](connection::Action)s for the network loop to carry out.

/// The connection itself: handshake FSM, heartbeat, frame processing.
pub mod connection;
/// Fragmenting oversize messages and reassembling their chunks.
pub mod fragment;
/// MTU expansion probing.
pub mod mtu;
/// Outbound sliding-window channels and retransmission policy.
pub mod send_channel;
/// Inbound sequence tracking: ordering, duplicate suppression, withholding.
pub mod receive_channel;
/// Per-connection traffic counters.
pub mod statistics;

pub use connection::{Action, Connection};
pub use statistics::ConnectionStatistics;
