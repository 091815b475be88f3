//! Fragmentation of oversize messages.
//!
//! A message that cannot fit a single datagram is split into chunks. Each
//! chunk is an ordinary message with the header fragment flag set and a
//! var-int preamble `(group_id, chunk_count, chunk_size, chunk_index)` in
//! front of its slice of the original payload. Chunks travel through the
//! same channel as the original message would have, so reliability and
//! ordering apply to them unchanged; the receiver reassembles released
//! chunks by group id.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use bitflux_core::{
    bit_buffer::BitBuffer,
    constants::MESSAGE_HEADER_SIZE,
    error::{ErrorKind, Result},
};
use bitflux_protocol::message::{MessagePayload, OutgoingMessage};

/// Worst-case preamble size: four var-ints, conservatively 5 + 5 + 3 + 5.
pub const FRAGMENT_PREAMBLE_MAX: usize = 18;

/// Splits oversize payloads into fragment chunks.
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_group_id: u32,
}

impl Fragmenter {
    /// Creates a fragmenter with group ids starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a payload of this bit length needs fragmenting at this MTU.
    pub fn needs_split(bit_length: usize, mtu: usize) -> bool {
        MESSAGE_HEADER_SIZE + (bit_length + 7) / 8 > mtu
    }

    /// Splits `payload` into chunks sized for `mtu`. The receipt tag, if
    /// any, rides on the last chunk so it fires when the whole message has
    /// been acked through.
    pub fn split(
        &mut self,
        payload: &MessagePayload,
        mtu: usize,
        receipt: Option<u64>,
    ) -> Vec<OutgoingMessage> {
        let group_id = self.next_group_id;
        self.next_group_id = self.next_group_id.wrapping_add(1);

        let chunk_size = mtu - MESSAGE_HEADER_SIZE - FRAGMENT_PREAMBLE_MAX;
        let total_bytes = payload.byte_length();
        let chunk_count = total_bytes.div_ceil(chunk_size);

        let mut chunks = Vec::with_capacity(chunk_count);
        for index in 0..chunk_count {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(total_bytes);
            let last = index == chunk_count - 1;

            let mut buffer = BitBuffer::with_capacity(end - start + FRAGMENT_PREAMBLE_MAX);
            buffer.write_var_u32(group_id);
            buffer.write_var_u32(chunk_count as u32);
            buffer.write_var_u32(chunk_size as u32);
            buffer.write_var_u32(index as u32);
            if last {
                // The final chunk carries the exact trailing bit count.
                let full_bytes = payload.bit_length / 8 - start;
                buffer.write_bytes(&payload.data[start..start + full_bytes]);
                let trailing_bits = (payload.bit_length % 8) as u32;
                if trailing_bits != 0 {
                    buffer.write_bits(payload.data[start + full_bytes] as u64, trailing_bits);
                }
            } else {
                buffer.write_bytes(&payload.data[start..end]);
            }

            let mut chunk = OutgoingMessage::fragment(MessagePayload::from_bit_buffer(buffer));
            if last {
                if let Some(tag) = receipt {
                    chunk = chunk.with_receipt(tag);
                }
            }
            chunks.push(chunk);
        }
        chunks
    }
}

#[derive(Debug)]
struct FragmentGroup {
    chunk_count: u32,
    chunk_size: u32,
    received: Vec<bool>,
    received_count: u32,
    buffer: Vec<u8>,
    /// Bits of payload in the final chunk, known once it arrives.
    last_chunk_bits: Option<usize>,
    last_activity: Instant,
}

/// Reassembles fragment chunks back into whole messages.
///
/// One assembler exists per connection; groups that stay incomplete past the
/// TTL are dropped so lost chunks cannot pin memory forever.
#[derive(Debug)]
pub struct FragmentAssembler {
    groups: HashMap<u32, FragmentGroup>,
    ttl: Duration,
}

impl FragmentAssembler {
    /// Creates an assembler that expires idle groups after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { groups: HashMap::new(), ttl }
    }

    /// Feeds one released chunk. Returns the reassembled payload once every
    /// chunk of its group has arrived.
    pub fn insert(
        &mut self,
        data: &[u8],
        bit_length: usize,
        now: Instant,
    ) -> Result<Option<MessagePayload>> {
        let mut reader = BitBuffer::from_bytes(data.to_vec(), bit_length);
        let group_id = reader.read_var_u32()?;
        let chunk_count = reader.read_var_u32()?;
        let chunk_size = reader.read_var_u32()?;
        let chunk_index = reader.read_var_u32()?;

        if chunk_count == 0 || chunk_size == 0 || chunk_index >= chunk_count {
            return Err(ErrorKind::MalformedDatagram("inconsistent fragment preamble"));
        }

        let group = self.groups.entry(group_id).or_insert_with(|| FragmentGroup {
            chunk_count,
            chunk_size,
            received: vec![false; chunk_count as usize],
            received_count: 0,
            buffer: vec![0u8; (chunk_count * chunk_size) as usize],
            last_chunk_bits: None,
            last_activity: now,
        });
        if group.chunk_count != chunk_count || group.chunk_size != chunk_size {
            return Err(ErrorKind::MalformedDatagram("fragment preamble changed mid-group"));
        }
        group.last_activity = now;

        if group.received[chunk_index as usize] {
            // Duplicate chunk of a reliable retransmit.
            return Ok(None);
        }

        let data_bits = bit_length - reader.read_position();
        let last = chunk_index == chunk_count - 1;
        if !last && data_bits != chunk_size as usize * 8 {
            return Err(ErrorKind::MalformedDatagram("short interior fragment chunk"));
        }
        let data_bytes = reader.read_bytes(data_bits / 8)?;
        let offset = (chunk_index * chunk_size) as usize;
        group.buffer[offset..offset + data_bytes.len()].copy_from_slice(&data_bytes);
        if last {
            if data_bits % 8 != 0 {
                let trailing = reader.read_bits((data_bits % 8) as u32)?;
                group.buffer[offset + data_bytes.len()] = trailing as u8;
            }
            group.last_chunk_bits = Some(data_bits);
        }
        group.received[chunk_index as usize] = true;
        group.received_count += 1;

        if group.received_count < group.chunk_count {
            return Ok(None);
        }

        let group = self.groups.remove(&group_id).expect("group exists");
        let last_bits = group.last_chunk_bits.unwrap_or(0);
        let bit_length = (group.chunk_count as usize - 1) * group.chunk_size as usize * 8
            + last_bits;
        let mut data = group.buffer;
        data.truncate((bit_length + 7) / 8);
        Ok(Some(MessagePayload { data, bit_length }))
    }

    /// Drops groups that have been idle past the TTL.
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.groups.len();
        self.groups.retain(|_, group| now.duration_since(group.last_activity) <= ttl);
        let dropped = before - self.groups.len();
        if dropped > 0 {
            tracing::warn!("dropped {} abandoned fragment group(s)", dropped);
        }
    }

    /// Number of groups still waiting for chunks.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }
}
