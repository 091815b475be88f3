//! Outgoing and incoming message structures.
//!
//! An outgoing message is an immutable payload shared between every send
//! channel that references it; the last reference returns the backing buffer
//! to the pool. An incoming message is what the peer releases to the
//! application: a payload plus the metadata of its arrival.

use std::{convert::TryFrom, net::SocketAddr, sync::Arc, time::Instant};

use bitflux_core::{
    bit_buffer::BitBuffer,
    error::Result,
    incoming::IncomingKind,
    message_pool::MessagePool,
};

use crate::{
    message_type::DeliveryMethod, sequence::SequenceNumber, status::ConnectionStatus,
};

/// Immutable message payload: bytes plus an exact bit length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    /// Backing bytes; only the first `ceil(bit_length / 8)` are meaningful.
    pub data: Vec<u8>,
    /// Exact payload length in bits.
    pub bit_length: usize,
}

impl MessagePayload {
    /// Wraps whole bytes (`bit_length = len * 8`).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let bit_length = data.len() * 8;
        Self { data, bit_length }
    }

    /// Takes the written contents of a bit buffer.
    pub fn from_bit_buffer(buffer: BitBuffer) -> Self {
        let bit_length = buffer.bit_length();
        Self { data: buffer.into_bytes(), bit_length }
    }

    /// Number of whole bytes the payload occupies on the wire.
    pub fn byte_length(&self) -> usize {
        (self.bit_length + 7) / 8
    }

    /// The meaningful bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.byte_length()]
    }
}

/// A message queued for sending.
///
/// The payload is behind an `Arc`: several channels (or several connections,
/// for a broadcast) may reference the same bytes. When the final reference
/// is dropped via [`OutgoingMessage::recycle`], the buffer goes back to the
/// pool.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    payload: Arc<MessagePayload>,
    /// Set on fragment chunks; lands in the header's fragment bit.
    pub is_fragment: bool,
    /// Receipt tag released back to the application once fully acked.
    pub receipt: Option<u64>,
}

impl OutgoingMessage {
    /// Wraps a payload for sending.
    pub fn new(payload: Arc<MessagePayload>) -> Self {
        Self { payload, is_fragment: false, receipt: None }
    }

    /// Wraps a fragment chunk.
    pub fn fragment(payload: MessagePayload) -> Self {
        Self { payload: Arc::new(payload), is_fragment: true, receipt: None }
    }

    /// Attaches a delivery-receipt tag.
    pub fn with_receipt(mut self, tag: u64) -> Self {
        self.receipt = Some(tag);
        self
    }

    /// The payload.
    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    /// Clones the payload handle for another channel or connection.
    pub fn share_payload(&self) -> Arc<MessagePayload> {
        self.payload.clone()
    }

    /// Payload length in bits.
    pub fn bit_length(&self) -> usize {
        self.payload.bit_length
    }

    /// Payload length in whole bytes.
    pub fn byte_length(&self) -> usize {
        self.payload.byte_length()
    }

    /// Drops this reference; if it was the last, the backing buffer returns
    /// to the pool.
    pub fn recycle(self, pool: &mut MessagePool) {
        if let Ok(payload) = Arc::try_unwrap(self.payload) {
            pool.recycle(payload.data);
        }
    }
}

/// A message released to the application.
#[derive(Debug)]
pub struct IncomingMessage {
    /// High-level classification.
    pub kind: IncomingKind,
    /// Delivery method and channel, for `Data` messages.
    pub delivery: Option<(DeliveryMethod, u8)>,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Payload length in bits.
    pub bit_length: usize,
    /// Sequence number the message arrived with (0 when not applicable).
    pub sequence: SequenceNumber,
    /// When the datagram carrying this message was received.
    pub receive_time: Instant,
    /// Remote endpoint, when one is known.
    pub sender: Option<SocketAddr>,
}

impl IncomingMessage {
    /// Application data from a connected remote.
    pub fn data(
        delivery: DeliveryMethod,
        channel: u8,
        data: Vec<u8>,
        bit_length: usize,
        sequence: SequenceNumber,
        sender: SocketAddr,
        receive_time: Instant,
    ) -> Self {
        Self {
            kind: IncomingKind::Data,
            delivery: Some((delivery, channel)),
            data,
            bit_length,
            sequence,
            receive_time,
            sender: Some(sender),
        }
    }

    /// Application data from an endpoint without a connection.
    pub fn unconnected(
        data: Vec<u8>,
        bit_length: usize,
        sender: SocketAddr,
        receive_time: Instant,
    ) -> Self {
        Self {
            kind: IncomingKind::UnconnectedData,
            delivery: None,
            data,
            bit_length,
            sequence: 0,
            receive_time,
            sender: Some(sender),
        }
    }

    /// Status-change notification; the payload carries the status code and a
    /// reason string.
    pub fn status_changed(
        status: ConnectionStatus,
        reason: &str,
        sender: SocketAddr,
        receive_time: Instant,
    ) -> Self {
        let mut buffer = BitBuffer::new();
        buffer.write_u8(status.to_u8());
        buffer.write_string(reason);
        let bit_length = buffer.bit_length();
        Self {
            kind: IncomingKind::StatusChanged,
            delivery: None,
            data: buffer.into_bytes(),
            bit_length,
            sequence: 0,
            receive_time,
            sender: Some(sender),
        }
    }

    /// Decodes a `StatusChanged` payload.
    pub fn read_status_changed(&self) -> Result<(ConnectionStatus, String)> {
        let mut reader = self.reader();
        let status = ConnectionStatus::try_from(reader.read_u8()?)?;
        let reason = reader.read_string()?;
        Ok((status, reason))
    }

    /// Delivery receipt carrying the sender-supplied tag.
    pub fn receipt(tag: u64, sender: SocketAddr, receive_time: Instant) -> Self {
        let mut buffer = BitBuffer::new();
        buffer.write_u64(tag);
        let bit_length = buffer.bit_length();
        Self {
            kind: IncomingKind::Receipt,
            delivery: None,
            data: buffer.into_bytes(),
            bit_length,
            sequence: 0,
            receive_time,
            sender: Some(sender),
        }
    }

    /// Decodes a `Receipt` payload.
    pub fn read_receipt(&self) -> Result<u64> {
        self.reader().read_u64()
    }

    /// Library diagnostic with a text payload.
    pub fn diagnostic(kind: IncomingKind, text: &str, receive_time: Instant) -> Self {
        let mut buffer = BitBuffer::new();
        buffer.write_string(text);
        let bit_length = buffer.bit_length();
        Self {
            kind,
            delivery: None,
            data: buffer.into_bytes(),
            bit_length,
            sequence: 0,
            receive_time,
            sender: None,
        }
    }

    /// Decodes a text payload (diagnostics, discovery hails).
    pub fn read_text(&self) -> Result<String> {
        self.reader().read_string()
    }

    /// A fresh bit reader over the payload.
    pub fn reader(&self) -> BitBuffer {
        BitBuffer::from_bytes(self.data.clone(), self.bit_length)
    }

    /// The payload bytes.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.data[..(self.bit_length + 7) / 8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn payload_byte_length_rounds_up() {
        let payload = MessagePayload { data: vec![0xff, 0x01], bit_length: 9 };
        assert_eq!(payload.byte_length(), 2);
        assert_eq!(payload.as_bytes(), &[0xff, 0x01]);
    }

    #[test]
    fn last_reference_recycles_into_pool() {
        let mut pool = MessagePool::new();
        let payload = Arc::new(MessagePayload::from_bytes(vec![0u8; 64]));
        let first = OutgoingMessage::new(payload.clone());
        let second = OutgoingMessage::new(payload);

        first.recycle(&mut pool);
        assert_eq!(pool.pooled(), 0, "payload still referenced");
        second.recycle(&mut pool);
        assert_eq!(pool.pooled(), 1, "last reference returns the buffer");
    }

    #[test]
    fn status_changed_round_trip() {
        let msg = IncomingMessage::status_changed(
            ConnectionStatus::Connected,
            "handshake complete",
            addr(),
            Instant::now(),
        );
        let (status, reason) = msg.read_status_changed().unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
        assert_eq!(reason, "handshake complete");
        assert_eq!(msg.kind, IncomingKind::StatusChanged);
    }

    #[test]
    fn receipt_round_trip() {
        let msg = IncomingMessage::receipt(0xfeed_beef, addr(), Instant::now());
        assert_eq!(msg.read_receipt().unwrap(), 0xfeed_beef);
    }

    #[test]
    fn diagnostic_round_trip() {
        let msg =
            IncomingMessage::diagnostic(IncomingKind::WarningMessage, "oops", Instant::now());
        assert_eq!(msg.kind, IncomingKind::WarningMessage);
        assert_eq!(msg.read_text().unwrap(), "oops");
    }
}
