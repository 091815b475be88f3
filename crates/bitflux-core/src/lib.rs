#![warn(missing_docs)]

//! bitflux-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Bit-granular buffers
//! - Memory utilities (message pooling)
//!
//! Protocol and connection logic live in the specialized crates:
//! - `bitflux-protocol`: message-type codes, sequence math, datagram framing
//! - `bitflux-connection`: handshake FSM, sliding-window channels, fragmentation
//! - `bitflux-peer`: network loop, routing, public API

/// Protocol constants shared across layers.
pub mod constants {
    /// The size of the per-message header inside a datagram.
    ///
    /// type (1) + fragment flag and 15-bit sequence (2) + payload bit length (2)
    pub const MESSAGE_HEADER_SIZE: usize = 5;
    /// Number of distinct sequence numbers (15-bit space).
    pub const SEQUENCE_NUMBER_COUNT: u16 = 1 << 15;
    /// Number of sequence channels per sequenced or ordered delivery method.
    pub const SEQUENCE_CHANNEL_COUNT: u8 = 32;
    /// Default sliding-window size for reliable channels. Must divide
    /// `SEQUENCE_NUMBER_COUNT`, so only powers of two are accepted.
    pub const DEFAULT_WINDOW_SIZE: u16 = 64;
    /// Default maximum transmission unit of a datagram.
    ///
    /// Conservative value that fits IPv4 and IPv6 paths without IP-level
    /// fragmentation on common links: 1500 - 60 (max IPv4 header) - 8 (UDP)
    /// rounded down to a multiple of 8.
    pub const DEFAULT_MTU: u16 = 1408;
    /// Upper bound that MTU expansion will probe towards.
    pub const ABSOLUTE_MAX_MTU: u16 = 8192;
}

/// Bit-granular read/write buffer.
pub mod bit_buffer;
/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Application-facing incoming-message kinds and their enabled-set bitmask.
pub mod incoming;
/// Message buffer pooling for memory efficiency.
pub mod message_pool;
/// Transport abstraction for pluggable I/O.
pub mod transport;
