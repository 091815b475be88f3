//! Payload layouts of library control messages.
//!
//! Control payloads are written with the bit buffer like any other message.
//! Each payload type knows how to write itself and how to read itself back;
//! the message-type byte in the frame header decides which reader runs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitflux_core::{
    bit_buffer::BitBuffer,
    error::{DecodingErrorKind, ErrorKind, Result},
};

use crate::{message::MessagePayload, sequence::SequenceNumber};

/// Writes an endpoint as `(address-length:u8, address bytes, port:u16)`.
pub fn write_endpoint(buffer: &mut BitBuffer, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buffer.write_u8(4);
            buffer.write_bytes(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buffer.write_u8(16);
            buffer.write_bytes(&ip.octets());
        }
    }
    buffer.write_u16(addr.port());
}

/// Reads an endpoint written by [`write_endpoint`].
pub fn read_endpoint(buffer: &mut BitBuffer) -> Result<SocketAddr> {
    let len = buffer.read_u8()?;
    let ip = match len {
        4 => {
            let octets = buffer.read_bytes(4)?;
            IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        16 => {
            let octets = buffer.read_bytes(16)?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&octets);
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        _ => return Err(ErrorKind::DecodingError(DecodingErrorKind::Endpoint)),
    };
    let port = buffer.read_u16()?;
    Ok(SocketAddr::new(ip, port))
}

/// `Connect` and `ConnectResponse` payload: identifies the application and
/// the sender, and carries an optional hail for the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Application identifier; mismatches reject the handshake.
    pub app_identifier: String,
    /// Sender's 64-bit unique identifier.
    pub unique_id: u64,
    /// Application-supplied hail data.
    pub hail: Vec<u8>,
}

impl HandshakePayload {
    /// Writes the payload.
    pub fn write_to(&self, buffer: &mut BitBuffer) {
        buffer.write_string(&self.app_identifier);
        buffer.write_u64(self.unique_id);
        buffer.write_byte_array(&self.hail);
    }

    /// Reads the payload.
    pub fn read_from(buffer: &mut BitBuffer) -> Result<Self> {
        Ok(Self {
            app_identifier: buffer.read_string()?,
            unique_id: buffer.read_u64()?,
            hail: buffer.read_byte_array()?,
        })
    }

    /// Encodes into a message payload.
    pub fn encode(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        self.write_to(&mut buffer);
        MessagePayload::from_bit_buffer(buffer)
    }
}

/// `Disconnect` payload: a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPayload {
    /// Why the connection is going away.
    pub reason: String,
}

impl DisconnectPayload {
    /// Writes the payload.
    pub fn write_to(&self, buffer: &mut BitBuffer) {
        buffer.write_string(&self.reason);
    }

    /// Reads the payload.
    pub fn read_from(buffer: &mut BitBuffer) -> Result<Self> {
        Ok(Self { reason: buffer.read_string()? })
    }

    /// Encodes into a message payload.
    pub fn encode(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        self.write_to(&mut buffer);
        MessagePayload::from_bit_buffer(buffer)
    }
}

/// `Ping`/`Pong` payload: a millisecond timestamp. A pong echoes the ping's
/// timestamp so the sender can compute the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    /// Sender-relative timestamp in milliseconds.
    pub timestamp_ms: u32,
}

impl PingPayload {
    /// Writes the payload.
    pub fn write_to(&self, buffer: &mut BitBuffer) {
        buffer.write_u32(self.timestamp_ms);
    }

    /// Reads the payload.
    pub fn read_from(buffer: &mut BitBuffer) -> Result<Self> {
        Ok(Self { timestamp_ms: buffer.read_u32()? })
    }

    /// Encodes into a message payload.
    pub fn encode(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        self.write_to(&mut buffer);
        MessagePayload::from_bit_buffer(buffer)
    }
}

/// One acknowledgment: the message type being acked plus its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEntry {
    /// Wire code of the acked message's type.
    pub type_code: u8,
    /// Sequence number being acknowledged.
    pub sequence: SequenceNumber,
}

/// Writes acknowledgment entries, 3 bytes each.
pub fn write_acks(buffer: &mut BitBuffer, entries: &[AckEntry]) {
    for entry in entries {
        buffer.write_u8(entry.type_code);
        buffer.write_u16(entry.sequence);
    }
}

/// Reads acknowledgment entries until the payload runs out.
pub fn read_acks(buffer: &mut BitBuffer) -> Result<Vec<AckEntry>> {
    let mut entries = Vec::with_capacity(buffer.remaining_bits() / 24);
    while buffer.remaining_bits() >= 24 {
        entries.push(AckEntry { type_code: buffer.read_u8()?, sequence: buffer.read_u16()? });
    }
    Ok(entries)
}

/// `NatIntroduction` payload: both views of the endpoint to punch towards,
/// plus a token echoed in the success notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatIntroductionPayload {
    /// The introduced party's own view of its address.
    pub internal: SocketAddr,
    /// The introduced party's address as seen by the introducer.
    pub external: SocketAddr,
    /// Opaque token for correlating the introduction.
    pub token: String,
}

impl NatIntroductionPayload {
    /// Writes the payload.
    pub fn write_to(&self, buffer: &mut BitBuffer) {
        write_endpoint(buffer, &self.internal);
        write_endpoint(buffer, &self.external);
        buffer.write_string(&self.token);
    }

    /// Reads the payload.
    pub fn read_from(buffer: &mut BitBuffer) -> Result<Self> {
        Ok(Self {
            internal: read_endpoint(buffer)?,
            external: read_endpoint(buffer)?,
            token: buffer.read_string()?,
        })
    }

    /// Encodes into a message payload.
    pub fn encode(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        self.write_to(&mut buffer);
        MessagePayload::from_bit_buffer(buffer)
    }
}

/// `ExpandMTURequest` payload: the probed size, padded with zeros so the
/// whole datagram actually reaches that size on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtuProbePayload {
    /// Datagram size under test, in bytes.
    pub size: u16,
}

impl MtuProbePayload {
    /// Encodes the probe, padding the payload so the framed message totals
    /// exactly `size` bytes.
    pub fn encode(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        buffer.write_u16(self.size);
        let padding = (self.size as usize)
            .saturating_sub(bitflux_core::constants::MESSAGE_HEADER_SIZE + 2);
        for _ in 0..padding {
            buffer.write_u8(0);
        }
        MessagePayload::from_bit_buffer(buffer)
    }

    /// Reads the probed size; the padding is not inspected.
    pub fn read_from(buffer: &mut BitBuffer) -> Result<Self> {
        Ok(Self { size: buffer.read_u16()? })
    }

    /// Encodes the success reply: just the echoed size.
    pub fn encode_success(&self) -> MessagePayload {
        let mut buffer = BitBuffer::new();
        buffer.write_u16(self.size);
        MessagePayload::from_bit_buffer(buffer)
    }
}
