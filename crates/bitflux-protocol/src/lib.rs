#![warn(missing_docs)]

//! bitflux-protocol: wire format and protocol primitives.
//!
//! This crate defines everything two peers must agree on:
//! - the 15-bit sequence-number space and its modular comparison
//! - message-type codes (application data codes and library control codes)
//! - per-message framing inside a datagram
//! - payload layouts of library control messages
//! - connection status codes carried in status-change notifications
//!
//! Connection state machines and channel logic live in `bitflux-connection`.

/// Library control-message payloads (handshakes, pings, acks, NAT relay).
pub mod control;
/// Outgoing and incoming message structures.
pub mod message;
/// Message-type codes and delivery methods.
pub mod message_type;
/// Datagram framing: packing messages into datagrams and parsing them out.
pub mod packet_codec;
/// Explicit wire-serialization registry for user types.
pub mod registry;
/// 15-bit sequence numbers and modular comparison.
pub mod sequence;
/// Connection status codes.
pub mod status;

pub use message::{IncomingMessage, MessagePayload, OutgoingMessage};
pub use message_type::{DeliveryMethod, MessageType};
pub use packet_codec::{DatagramBuilder, Frame};
pub use sequence::{relative, SequenceNumber};
pub use status::ConnectionStatus;
