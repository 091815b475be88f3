use std::io;

use thiserror::Error;

/// Convenience alias for results produced by this library.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur while using the library.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A read advanced past the end of a buffer's bit length.
    #[error("Read past the end of the buffer")]
    OutOfRange,
    /// A datagram could not be parsed; the whole datagram is rejected.
    #[error("Malformed datagram: {0}")]
    MalformedDatagram(&'static str),
    /// A reserved message-type code appeared on the wire.
    #[error("Reserved message type code {0} received")]
    ReservedMessageType(u8),
    /// A wire value could not be decoded into its enum.
    #[error("Could not decode {0}")]
    DecodingError(DecodingErrorKind),
    /// The operation is not valid for the peer's or connection's current state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    /// Wrapper around a std io error.
    #[error("An IO error occurred: {0}")]
    IoError(#[from] io::Error),
    /// A length-prefixed string did not contain valid UTF-8.
    #[error("String payload is not valid UTF-8")]
    InvalidString,
    /// The released-incoming-messages queue is full; the message was dropped.
    #[error("Received message queue is full")]
    QueueFull,
}

/// The enum or field that failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingErrorKind {
    /// The message-type byte.
    #[error("message type")]
    MessageType,
    /// The delivery method encoded in an application data code.
    #[error("delivery method")]
    DeliveryMethod,
    /// An endpoint (address/port pair) in a library payload.
    #[error("endpoint")]
    Endpoint,
    /// A connection status code.
    #[error("connection status")]
    ConnectionStatus,
}
