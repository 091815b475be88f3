#![warn(missing_docs)]

//! bitflux-peer: the process-wide peer.
//!
//! [`Peer`] is what applications hold: it binds the socket, spawns the
//! library thread, and exposes connect/send/receive/shutdown. The library
//! thread runs the [`NetworkLoop`], which owns the socket and all connection
//! state; application threads talk to it through a command channel and read
//! released messages from a bounded queue.

/// The single-threaded network loop.
pub mod network_loop;
/// The application-facing peer handle.
pub mod peer;
/// UDP socket implementation of the transport trait.
pub mod socket;
/// Time source abstraction.
pub mod time;

pub use network_loop::{NetworkLoop, PeerCommand};
pub use peer::{Peer, PeerStatus};
pub use socket::UdpDatagramSocket;
pub use time::{Clock, SystemClock};
