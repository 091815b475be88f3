#![warn(missing_docs)]

//! Bitflux: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports
//! the most commonly used types to build reliable UDP apps:
//!
//! - Peer and its lifecycle (`Peer`, `PeerStatus`)
//! - Messages and delivery methods (`IncomingMessage`, `DeliveryMethod`)
//! - Bit-level payload building (`BitBuffer`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```no_run
//! use bitflux::{Config, DeliveryMethod, IncomingKind, Peer};
//!
//! let mut config = Config::default();
//! config.accept_incoming_connections = true;
//! let server = Peer::start(config).unwrap();
//!
//! let client = Peer::start(Config::default()).unwrap();
//! let remote = client.connect(server.local_addr(), vec![]).unwrap();
//! client
//!     .send_to(remote, b"hello".to_vec(), DeliveryMethod::ReliableOrdered, 0)
//!     .unwrap();
//!
//! while let Some(message) = server.recv_timeout(std::time::Duration::from_secs(1)) {
//!     if message.kind == IncomingKind::Data {
//!         assert_eq!(message.payload_bytes(), b"hello");
//!         break;
//!     }
//! }
//! ```

// Core: configuration, errors, bit buffers, incoming kinds
pub use bitflux_core::{
    bit_buffer::BitBuffer,
    config::Config,
    error::{ErrorKind, Result},
    incoming::{IncomingKind, IncomingKindSet},
    transport::{DatagramSocket, PortMapper},
};
// Protocol: messages, delivery methods, statuses, wire serialization
pub use bitflux_protocol::{
    registry::{TypeRegistry, WireSerialize},
    ConnectionStatus, DeliveryMethod, IncomingMessage, MessagePayload,
};
// Peer: the process-wide instance
pub use bitflux_peer::{Peer, PeerStatus};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BitBuffer, Config, ConnectionStatus, DeliveryMethod, IncomingKind, IncomingKindSet,
        IncomingMessage, Peer, PeerStatus,
    };
}
