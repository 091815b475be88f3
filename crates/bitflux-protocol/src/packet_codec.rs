//! Datagram framing.
//!
//! A datagram is a plain concatenation of messages. Each message carries a
//! 5-byte little-endian header:
//!
//! ```text
//! byte 0:      message_type (u8)
//! bytes 1..3:  (fragment:1) | (sequence:15)   -- fragment flag is the low bit
//! bytes 3..5:  payload bit length (u16)
//! payload:     ceil(bit_length / 8) bytes
//! ```
//!
//! [`DatagramBuilder`] packs outgoing messages greedily up to the MTU;
//! [`decode_datagram`] parses a received datagram back into frames. A frame
//! whose declared payload overruns the datagram poisons the whole datagram:
//! nothing from it is delivered.

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use bitflux_core::{
    constants::MESSAGE_HEADER_SIZE,
    error::{ErrorKind, Result},
};

use crate::sequence::SequenceNumber;

/// One framed message inside a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw message-type code; classified by the routing layer.
    pub type_code: u8,
    /// Fragment flag from the header.
    pub is_fragment: bool,
    /// 15-bit sequence number.
    pub sequence: SequenceNumber,
    /// Payload length in bits.
    pub bit_length: u16,
    /// Payload bytes, `ceil(bit_length / 8)` of them.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Bytes this frame occupies on the wire, header included.
    pub fn wire_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }
}

/// Wire size of a message with the given payload bit length.
pub fn framed_size(payload_bit_length: usize) -> usize {
    MESSAGE_HEADER_SIZE + (payload_bit_length + 7) / 8
}

/// Appends one framed message to `out`.
pub fn write_frame(
    out: &mut Vec<u8>,
    type_code: u8,
    is_fragment: bool,
    sequence: SequenceNumber,
    bit_length: u16,
    payload: &[u8],
) -> Result<()> {
    debug_assert!(sequence < 1 << 15);
    debug_assert_eq!(payload.len(), (bit_length as usize + 7) / 8);
    out.write_u8(type_code)?;
    out.write_u16::<LittleEndian>((sequence << 1) | is_fragment as u16)?;
    out.write_u16::<LittleEndian>(bit_length)?;
    out.write_all(payload)?;
    Ok(())
}

/// Parses a datagram into frames.
///
/// Any frame whose declared payload exceeds the remaining bytes rejects the
/// entire datagram; a trailing stub shorter than a header is ignored.
pub fn decode_datagram(datagram: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut cursor = Cursor::new(datagram);
    while datagram.len() - cursor.position() as usize >= MESSAGE_HEADER_SIZE {
        let type_code = cursor.read_u8()?;
        let seq_field = cursor.read_u16::<LittleEndian>()?;
        let bit_length = cursor.read_u16::<LittleEndian>()?;
        let byte_length = (bit_length as usize + 7) / 8;
        let pos = cursor.position() as usize;
        if pos + byte_length > datagram.len() {
            return Err(ErrorKind::MalformedDatagram("declared payload exceeds datagram"));
        }
        frames.push(Frame {
            type_code,
            is_fragment: seq_field & 1 != 0,
            sequence: seq_field >> 1,
            bit_length,
            payload: datagram[pos..pos + byte_length].to_vec(),
        });
        cursor.set_position((pos + byte_length) as u64);
    }
    let tail = datagram.len() - cursor.position() as usize;
    if tail != 0 {
        tracing::debug!("ignoring {} trailing bytes after last frame", tail);
    }
    Ok(frames)
}

/// Accumulates framed messages into MTU-sized datagrams.
#[derive(Debug)]
pub struct DatagramBuilder {
    buffer: Vec<u8>,
    mtu: usize,
}

impl DatagramBuilder {
    /// Creates a builder for datagrams of at most `mtu` bytes.
    pub fn new(mtu: usize) -> Self {
        Self { buffer: Vec::with_capacity(mtu), mtu }
    }

    /// The current MTU.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Raises or lowers the MTU for subsequent datagrams.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Whether a payload of `payload_bytes` more bytes still fits.
    pub fn fits(&self, payload_bytes: usize) -> bool {
        self.buffer.len() + MESSAGE_HEADER_SIZE + payload_bytes <= self.mtu
    }

    /// Appends a framed message. The caller checks [`fits`](Self::fits)
    /// first and flushes when it returns false.
    pub fn push(
        &mut self,
        type_code: u8,
        is_fragment: bool,
        sequence: SequenceNumber,
        bit_length: u16,
        payload: &[u8],
    ) -> Result<()> {
        write_frame(&mut self.buffer, type_code, is_fragment, sequence, bit_length, payload)
    }

    /// Whether no messages have been pushed since the last take.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the accumulated datagram, leaving the builder empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
