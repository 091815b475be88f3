//! Message-type codes.
//!
//! A single byte in each message header. The code space is split into three
//! ranges:
//!
//! ```text
//! 0..=65     application data; the code encodes (delivery method, channel)
//! 66..=94    Unused1..Unused29, reserved -- must never appear on the wire
//! 95..       library control messages, consumed by the transport
//! ```

use std::convert::TryFrom;

use bitflux_core::{
    constants::SEQUENCE_CHANNEL_COUNT,
    error::{DecodingErrorKind, ErrorKind},
};

const USER_UNRELIABLE: u8 = 0;
const USER_SEQUENCED_FIRST: u8 = 1;
const USER_RELIABLE_UNORDERED: u8 = USER_SEQUENCED_FIRST + SEQUENCE_CHANNEL_COUNT; // 33
const USER_RELIABLE_ORDERED_FIRST: u8 = USER_RELIABLE_UNORDERED + 1; // 34
const UNUSED_FIRST: u8 = USER_RELIABLE_ORDERED_FIRST + SEQUENCE_CHANNEL_COUNT; // 66
const UNUSED_LAST: u8 = UNUSED_FIRST + 28; // 94, Unused1..Unused29

/// First library code; everything at or above it is consumed by the transport.
pub const LIBRARY_ERROR: u8 = UNUSED_LAST + 1; // 95

const PING: u8 = LIBRARY_ERROR + 1;
const PONG: u8 = PING + 1;
const CONNECT: u8 = PONG + 1;
const CONNECT_RESPONSE: u8 = CONNECT + 1;
const CONNECTION_ESTABLISHED: u8 = CONNECT_RESPONSE + 1;
const ACKNOWLEDGE: u8 = CONNECTION_ESTABLISHED + 1;
const DISCONNECT: u8 = ACKNOWLEDGE + 1;
const DISCOVERY: u8 = DISCONNECT + 1;
const DISCOVERY_RESPONSE: u8 = DISCOVERY + 1;
const NAT_PUNCH_MESSAGE: u8 = DISCOVERY_RESPONSE + 1;
const NAT_INTRODUCTION: u8 = NAT_PUNCH_MESSAGE + 1;
const EXPAND_MTU_REQUEST: u8 = NAT_INTRODUCTION + 1;
const EXPAND_MTU_SUCCESS: u8 = EXPAND_MTU_REQUEST + 1;

/// How a message travels: the four channel families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    /// Fire and forget. No sequence number semantics on the receiver.
    Unreliable,
    /// Unreliable, but stale messages (older than the newest delivered) are dropped.
    Sequenced,
    /// Guaranteed delivery, released in arrival order.
    ReliableUnordered,
    /// Guaranteed delivery, released in send order.
    ReliableOrdered,
}

impl DeliveryMethod {
    /// Whether messages of this method are acknowledged and retransmitted.
    pub fn is_reliable(self) -> bool {
        matches!(self, DeliveryMethod::ReliableUnordered | DeliveryMethod::ReliableOrdered)
    }

    /// Number of independent sequence channels this method supports.
    pub fn channel_count(self) -> u8 {
        match self {
            DeliveryMethod::Unreliable | DeliveryMethod::ReliableUnordered => 1,
            DeliveryMethod::Sequenced | DeliveryMethod::ReliableOrdered => SEQUENCE_CHANNEL_COUNT,
        }
    }
}

/// Decoded message-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Application data, unreliable.
    UserUnreliable,
    /// Application data, sequenced on the given channel.
    UserSequenced(u8),
    /// Application data, reliable without ordering.
    UserReliableUnordered,
    /// Application data, reliable and ordered on the given channel.
    UserReliableOrdered(u8),
    /// Marker for library-level failures; never sent deliberately.
    LibraryError,
    /// Keepalive probe carrying a timestamp.
    Ping,
    /// Keepalive reply echoing the ping's timestamp.
    Pong,
    /// Handshake step 1: request a connection.
    Connect,
    /// Handshake step 2: accept a connection request.
    ConnectResponse,
    /// Handshake step 3: confirm the response was received.
    ConnectionEstablished,
    /// Carries `(type, sequence)` acknowledgment entries.
    Acknowledge,
    /// Graceful teardown with a reason string.
    Disconnect,
    /// Local-network discovery request.
    Discovery,
    /// Reply to a discovery request.
    DiscoveryResponse,
    /// Small packet punched at an introduced endpoint.
    NatPunchMessage,
    /// Instructs the recipient to punch towards an introduced endpoint.
    NatIntroduction,
    /// MTU probe padded to the size under test.
    ExpandMtuRequest,
    /// Acknowledges an MTU probe of the echoed size.
    ExpandMtuSuccess,
}

impl MessageType {
    /// The application-data code for a delivery method and channel.
    ///
    /// `channel` must be below the method's channel count.
    pub fn for_delivery(method: DeliveryMethod, channel: u8) -> MessageType {
        debug_assert!(channel < method.channel_count());
        match method {
            DeliveryMethod::Unreliable => MessageType::UserUnreliable,
            DeliveryMethod::Sequenced => MessageType::UserSequenced(channel),
            DeliveryMethod::ReliableUnordered => MessageType::UserReliableUnordered,
            DeliveryMethod::ReliableOrdered => MessageType::UserReliableOrdered(channel),
        }
    }

    /// The `(delivery method, channel)` pair for application-data types.
    pub fn delivery(&self) -> Option<(DeliveryMethod, u8)> {
        match self {
            MessageType::UserUnreliable => Some((DeliveryMethod::Unreliable, 0)),
            MessageType::UserSequenced(ch) => Some((DeliveryMethod::Sequenced, *ch)),
            MessageType::UserReliableUnordered => Some((DeliveryMethod::ReliableUnordered, 0)),
            MessageType::UserReliableOrdered(ch) => Some((DeliveryMethod::ReliableOrdered, *ch)),
            _ => None,
        }
    }

    /// Whether this is a library control message.
    pub fn is_library(&self) -> bool {
        self.to_u8() >= LIBRARY_ERROR
    }

    /// Whether messages of this type are acknowledged by the receiver.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            MessageType::UserReliableUnordered | MessageType::UserReliableOrdered(_)
        )
    }

    /// Converts to the wire code.
    pub fn to_u8(&self) -> u8 {
        match self {
            MessageType::UserUnreliable => USER_UNRELIABLE,
            MessageType::UserSequenced(ch) => USER_SEQUENCED_FIRST + ch,
            MessageType::UserReliableUnordered => USER_RELIABLE_UNORDERED,
            MessageType::UserReliableOrdered(ch) => USER_RELIABLE_ORDERED_FIRST + ch,
            MessageType::LibraryError => LIBRARY_ERROR,
            MessageType::Ping => PING,
            MessageType::Pong => PONG,
            MessageType::Connect => CONNECT,
            MessageType::ConnectResponse => CONNECT_RESPONSE,
            MessageType::ConnectionEstablished => CONNECTION_ESTABLISHED,
            MessageType::Acknowledge => ACKNOWLEDGE,
            MessageType::Disconnect => DISCONNECT,
            MessageType::Discovery => DISCOVERY,
            MessageType::DiscoveryResponse => DISCOVERY_RESPONSE,
            MessageType::NatPunchMessage => NAT_PUNCH_MESSAGE,
            MessageType::NatIntroduction => NAT_INTRODUCTION,
            MessageType::ExpandMtuRequest => EXPAND_MTU_REQUEST,
            MessageType::ExpandMtuSuccess => EXPAND_MTU_SUCCESS,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ErrorKind;

    /// Decodes a wire code. Reserved codes fail with
    /// [`ErrorKind::ReservedMessageType`]; unknown library codes fail with a
    /// decoding error.
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            USER_UNRELIABLE => Ok(MessageType::UserUnreliable),
            c if (USER_SEQUENCED_FIRST..USER_RELIABLE_UNORDERED).contains(&c) => {
                Ok(MessageType::UserSequenced(c - USER_SEQUENCED_FIRST))
            }
            USER_RELIABLE_UNORDERED => Ok(MessageType::UserReliableUnordered),
            c if (USER_RELIABLE_ORDERED_FIRST..UNUSED_FIRST).contains(&c) => {
                Ok(MessageType::UserReliableOrdered(c - USER_RELIABLE_ORDERED_FIRST))
            }
            c if (UNUSED_FIRST..=UNUSED_LAST).contains(&c) => {
                Err(ErrorKind::ReservedMessageType(c))
            }
            LIBRARY_ERROR => Ok(MessageType::LibraryError),
            PING => Ok(MessageType::Ping),
            PONG => Ok(MessageType::Pong),
            CONNECT => Ok(MessageType::Connect),
            CONNECT_RESPONSE => Ok(MessageType::ConnectResponse),
            CONNECTION_ESTABLISHED => Ok(MessageType::ConnectionEstablished),
            ACKNOWLEDGE => Ok(MessageType::Acknowledge),
            DISCONNECT => Ok(MessageType::Disconnect),
            DISCOVERY => Ok(MessageType::Discovery),
            DISCOVERY_RESPONSE => Ok(MessageType::DiscoveryResponse),
            NAT_PUNCH_MESSAGE => Ok(MessageType::NatPunchMessage),
            NAT_INTRODUCTION => Ok(MessageType::NatIntroduction),
            EXPAND_MTU_REQUEST => Ok(MessageType::ExpandMtuRequest),
            EXPAND_MTU_SUCCESS => Ok(MessageType::ExpandMtuSuccess),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::MessageType)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_codes_round_trip() {
        for method in [
            DeliveryMethod::Unreliable,
            DeliveryMethod::Sequenced,
            DeliveryMethod::ReliableUnordered,
            DeliveryMethod::ReliableOrdered,
        ] {
            for channel in 0..method.channel_count() {
                let mt = MessageType::for_delivery(method, channel);
                let decoded = MessageType::try_from(mt.to_u8()).unwrap();
                assert_eq!(decoded, mt);
                assert_eq!(decoded.delivery(), Some((method, channel)));
                assert!(!decoded.is_library());
            }
        }
    }

    #[test]
    fn library_codes_round_trip() {
        let types = [
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Connect,
            MessageType::ConnectResponse,
            MessageType::ConnectionEstablished,
            MessageType::Acknowledge,
            MessageType::Disconnect,
            MessageType::Discovery,
            MessageType::DiscoveryResponse,
            MessageType::NatPunchMessage,
            MessageType::NatIntroduction,
            MessageType::ExpandMtuRequest,
            MessageType::ExpandMtuSuccess,
        ];
        for mt in types {
            assert!(mt.is_library());
            assert_eq!(MessageType::try_from(mt.to_u8()).unwrap(), mt);
            assert!(mt.delivery().is_none());
        }
    }

    #[test]
    fn reserved_codes_are_rejected() {
        for code in UNUSED_FIRST..=UNUSED_LAST {
            assert!(matches!(
                MessageType::try_from(code),
                Err(ErrorKind::ReservedMessageType(c)) if c == code
            ));
        }
    }

    #[test]
    fn code_ranges_do_not_overlap() {
        assert_eq!(USER_RELIABLE_UNORDERED, 33);
        assert_eq!(UNUSED_FIRST, 66);
        assert_eq!(UNUSED_LAST, 94);
        assert_eq!(LIBRARY_ERROR, 95);
        // 29 reserved codes exactly
        assert_eq!(UNUSED_LAST - UNUSED_FIRST + 1, 29);
    }

    #[test]
    fn unknown_codes_fail_decoding() {
        assert!(matches!(
            MessageType::try_from(200),
            Err(ErrorKind::DecodingError(DecodingErrorKind::MessageType))
        ));
    }

    #[test]
    fn reliability_classification() {
        assert!(MessageType::UserReliableOrdered(3).is_reliable());
        assert!(MessageType::UserReliableUnordered.is_reliable());
        assert!(!MessageType::UserSequenced(0).is_reliable());
        assert!(!MessageType::UserUnreliable.is_reliable());
        assert!(!MessageType::Ping.is_reliable());
    }
}
