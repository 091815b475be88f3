//! Outbound channels.
//!
//! Each `(delivery method, sequence channel)` pair owns one send channel.
//! All variants share the same shape: messages wait in an outbound queue
//! until the heartbeat assigns them a sequence number and emits them.
//! Reliable variants additionally keep a window of in-flight records and
//! retransmit on a doubling timer until acked.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bitflux_core::message_pool::MessagePool;
use bitflux_protocol::{
    message::OutgoingMessage,
    sequence::{self, relative, SequenceNumber},
};

/// Ceiling for the retransmission delay.
const RESEND_DELAY_CAP: Duration = Duration::from_secs(8);

/// Retransmits of a single sequence before the connection is told to treat
/// the silence as a timeout signal.
const STALL_RETRANSMITS: u32 = 3;

/// Delay before (re)transmission number `retransmit_count + 1`.
///
/// Starts at `max(base, 2 * rtt)` and doubles per retransmit, capped at 8 s.
pub fn resend_delay(base: Duration, rtt: Duration, retransmit_count: u32) -> Duration {
    let initial = base.max(rtt * 2);
    let doubled = initial * 2u32.saturating_pow(retransmit_count.min(8));
    doubled.min(RESEND_DELAY_CAP)
}

/// A message the channel wants on the wire this heartbeat.
#[derive(Debug, Clone)]
pub struct Transmit {
    /// Sequence number assigned to the message.
    pub sequence: SequenceNumber,
    /// The message; payload shared with the in-flight record.
    pub message: OutgoingMessage,
    /// Whether this is a retransmission of an unacked record.
    pub is_retransmit: bool,
}

#[derive(Debug)]
struct SendRecord {
    sequence: SequenceNumber,
    message: OutgoingMessage,
    next_retransmit: Instant,
    retransmit_count: u32,
}

/// Reliable send channel: sliding window, retransmission, ack tracking.
/// Serves both the unordered and the ordered delivery methods; the receiver
/// side is what differs between the two.
#[derive(Debug)]
pub struct ReliableSendChannel {
    window_size: u16,
    send_start: SequenceNumber,
    next_sequence: SequenceNumber,
    queued: VecDeque<OutgoingMessage>,
    records: Vec<Option<SendRecord>>,
    acked: Vec<bool>,
    resend_base: Duration,
    max_retransmits: u32,
    stalled: bool,
    failed: bool,
}

impl ReliableSendChannel {
    /// Creates a channel with the given window and retransmit policy.
    /// `window_size` must be a power of two (validated by the config).
    pub fn new(window_size: u16, resend_base: Duration, max_retransmits: u32) -> Self {
        debug_assert!(window_size.is_power_of_two());
        Self {
            window_size,
            send_start: 0,
            next_sequence: 0,
            queued: VecDeque::new(),
            records: (0..window_size).map(|_| None).collect(),
            acked: vec![false; window_size as usize],
            resend_base,
            max_retransmits,
            stalled: false,
            failed: false,
        }
    }

    fn slot(&self, sequence: SequenceNumber) -> usize {
        (sequence % self.window_size) as usize
    }

    /// Queues a message for its first transmission.
    pub fn enqueue(&mut self, message: OutgoingMessage) {
        self.queued.push_back(message);
    }

    /// Emits retransmits that are due, then (when `allow_new` is set) fresh
    /// sends while the window has room. Retransmits never wait for a flush.
    pub fn due(&mut self, now: Instant, rtt: Duration, allow_new: bool) -> Vec<Transmit> {
        let mut out = Vec::new();

        for record in self.records.iter_mut().flatten() {
            if record.next_retransmit <= now {
                record.retransmit_count += 1;
                if record.retransmit_count >= STALL_RETRANSMITS {
                    self.stalled = true;
                }
                if record.retransmit_count > self.max_retransmits {
                    self.failed = true;
                }
                record.next_retransmit =
                    now + resend_delay(self.resend_base, rtt, record.retransmit_count);
                out.push(Transmit {
                    sequence: record.sequence,
                    message: record.message.clone(),
                    is_retransmit: true,
                });
            }
        }

        while allow_new && !self.queued.is_empty() {
            if relative(self.next_sequence, self.send_start) >= self.window_size as i16 {
                break; // window full
            }
            let message = self.queued.pop_front().expect("checked non-empty");
            let seq = self.next_sequence;
            self.next_sequence = sequence::next(seq);
            let slot = self.slot(seq);
            self.records[slot] = Some(SendRecord {
                sequence: seq,
                message: message.clone(),
                next_retransmit: now + resend_delay(self.resend_base, rtt, 0),
                retransmit_count: 0,
            });
            self.acked[slot] = false;
            out.push(Transmit { sequence: seq, message, is_retransmit: false });
        }

        out
    }

    /// Handles an acknowledgment. Frees the record, advances `send_start`
    /// past the contiguous acked prefix and recycles the payload when this
    /// was its last reference. Returns the receipt tag if the message
    /// carried one.
    pub fn handle_ack(&mut self, sequence: SequenceNumber, pool: &mut MessagePool) -> Option<u64> {
        let slot = self.slot(sequence);
        let matches = self.records[slot]
            .as_ref()
            .map(|r| r.sequence == sequence)
            .unwrap_or(false);
        if !matches {
            // Duplicate or stale ack.
            return None;
        }
        let record = self.records[slot].take().expect("checked above");
        self.acked[slot] = true;
        self.stalled = false;
        let receipt = record.message.receipt;
        record.message.recycle(pool);

        while self.send_start != self.next_sequence && self.acked[self.slot(self.send_start)] {
            let slot = self.slot(self.send_start);
            self.acked[slot] = false;
            self.send_start = sequence::next(self.send_start);
        }
        receipt
    }

    /// Whether anything is queued or in flight.
    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty() || self.records.iter().any(Option::is_some)
    }

    /// Whether a sequence has been retransmitted three times without an ack.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Whether a sequence exhausted its retransmit budget.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Recycles everything still queued or in flight. Used at teardown.
    pub fn clear(&mut self, pool: &mut MessagePool) {
        for message in self.queued.drain(..) {
            message.recycle(pool);
        }
        for record in self.records.iter_mut() {
            if let Some(record) = record.take() {
                record.message.recycle(pool);
            }
        }
    }
}

/// Sequenced send channel: a sequence number per message, no records.
#[derive(Debug, Default)]
pub struct SequencedSendChannel {
    next_sequence: SequenceNumber,
    queued: VecDeque<OutgoingMessage>,
}

impl SequencedSendChannel {
    /// Queues a message.
    pub fn enqueue(&mut self, message: OutgoingMessage) {
        self.queued.push_back(message);
    }

    /// Emits every queued message with a fresh sequence number.
    pub fn due(&mut self) -> Vec<Transmit> {
        self.queued
            .drain(..)
            .map(|message| {
                let seq = self.next_sequence;
                self.next_sequence = sequence::next(seq);
                Transmit { sequence: seq, message, is_retransmit: false }
            })
            .collect()
    }

    /// Whether messages await transmission.
    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty()
    }
}

/// Unreliable send channel: fire and forget, sequence number zero.
#[derive(Debug, Default)]
pub struct UnreliableSendChannel {
    queued: VecDeque<OutgoingMessage>,
}

impl UnreliableSendChannel {
    /// Queues a message.
    pub fn enqueue(&mut self, message: OutgoingMessage) {
        self.queued.push_back(message);
    }

    /// Emits every queued message.
    pub fn due(&mut self) -> Vec<Transmit> {
        self.queued
            .drain(..)
            .map(|message| Transmit { sequence: 0, message, is_retransmit: false })
            .collect()
    }

    /// Whether messages await transmission.
    pub fn has_pending(&self) -> bool {
        !self.queued.is_empty()
    }
}

/// One send channel of any variant.
#[derive(Debug)]
pub enum SendChannel {
    /// Fire and forget.
    Unreliable(UnreliableSendChannel),
    /// Sequence-stamped, unacked.
    Sequenced(SequencedSendChannel),
    /// Windowed and retransmitted.
    Reliable(ReliableSendChannel),
}

impl SendChannel {
    /// Queues a message on whichever variant this is.
    pub fn enqueue(&mut self, message: OutgoingMessage) {
        match self {
            SendChannel::Unreliable(ch) => ch.enqueue(message),
            SendChannel::Sequenced(ch) => ch.enqueue(message),
            SendChannel::Reliable(ch) => ch.enqueue(message),
        }
    }

    /// Emits messages due this heartbeat. When `allow_new` is false only
    /// reliable retransmits flow; fresh sends wait for the next flush.
    pub fn due(&mut self, now: Instant, rtt: Duration, allow_new: bool) -> Vec<Transmit> {
        match self {
            SendChannel::Unreliable(ch) if allow_new => ch.due(),
            SendChannel::Sequenced(ch) if allow_new => ch.due(),
            SendChannel::Reliable(ch) => ch.due(now, rtt, allow_new),
            _ => Vec::new(),
        }
    }

    /// Whether anything is queued or in flight.
    pub fn has_pending(&self) -> bool {
        match self {
            SendChannel::Unreliable(ch) => ch.has_pending(),
            SendChannel::Sequenced(ch) => ch.has_pending(),
            SendChannel::Reliable(ch) => ch.has_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitflux_protocol::message::MessagePayload;

    use super::*;

    fn msg(byte: u8) -> OutgoingMessage {
        OutgoingMessage::new(Arc::new(MessagePayload::from_bytes(vec![byte; 8])))
    }

    fn channel() -> ReliableSendChannel {
        ReliableSendChannel::new(64, Duration::from_millis(100), 10)
    }

    #[test]
    fn resend_delay_floors_doubles_and_caps() {
        let base = Duration::from_millis(100);
        // Tiny RTT: the floor applies.
        assert_eq!(resend_delay(base, Duration::from_millis(10), 0), base);
        // Large RTT: 2 * rtt applies.
        assert_eq!(
            resend_delay(base, Duration::from_millis(300), 0),
            Duration::from_millis(600)
        );
        // Doubles per retransmit.
        assert_eq!(
            resend_delay(base, Duration::from_millis(10), 2),
            Duration::from_millis(400)
        );
        // Capped at 8 seconds.
        assert_eq!(resend_delay(base, Duration::from_secs(3), 5), RESEND_DELAY_CAP);
    }

    #[test]
    fn fresh_sends_get_consecutive_sequences() {
        let mut ch = channel();
        let now = Instant::now();
        for i in 0..3 {
            ch.enqueue(msg(i));
        }
        let out = ch.due(now, Duration::from_millis(50), true);
        let seqs: Vec<_> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn window_limits_in_flight_messages() {
        let mut ch = ReliableSendChannel::new(4, Duration::from_millis(100), 10);
        let now = Instant::now();
        for i in 0..6 {
            ch.enqueue(msg(i));
        }
        let out = ch.due(now, Duration::from_millis(10), true);
        assert_eq!(out.len(), 4, "only a window's worth may fly");

        // Acking the head frees one slot.
        let mut pool = MessagePool::new();
        ch.handle_ack(0, &mut pool);
        let out = ch.due(now, Duration::from_millis(10), true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence, 4);
    }

    #[test]
    fn unacked_message_is_retransmitted_after_delay() {
        let mut ch = channel();
        let start = Instant::now();
        ch.enqueue(msg(1));
        let first = ch.due(start, Duration::from_millis(10), true);
        assert_eq!(first.len(), 1);

        // Nothing due before the delay elapses.
        let later = start + Duration::from_millis(50);
        assert!(ch.due(later, Duration::from_millis(10), true).is_empty());

        // Due after resend_delay(base=100ms, rtt=10ms, 0) = 100ms.
        let later = start + Duration::from_millis(150);
        let retransmits = ch.due(later, Duration::from_millis(10), true);
        assert_eq!(retransmits.len(), 1);
        assert_eq!(retransmits[0].sequence, 0);
    }

    #[test]
    fn ack_frees_record_and_stops_retransmits() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let start = Instant::now();
        ch.enqueue(msg(1));
        ch.due(start, Duration::from_millis(10), true);

        ch.handle_ack(0, &mut pool);
        assert!(!ch.has_pending());
        let much_later = start + Duration::from_secs(10);
        assert!(ch.due(much_later, Duration::from_millis(10), true).is_empty());
    }

    #[test]
    fn ordered_window_advances_past_contiguous_acked_prefix() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let now = Instant::now();
        for i in 0..4 {
            ch.enqueue(msg(i));
        }
        ch.due(now, Duration::from_millis(10), true);

        // Ack out of order: 2, then 0, then 1.
        ch.handle_ack(2, &mut pool);
        ch.handle_ack(0, &mut pool);
        ch.handle_ack(1, &mut pool);
        // send_start should have advanced to 3; the window admits 63 more.
        ch.handle_ack(3, &mut pool);
        assert!(!ch.has_pending());
    }

    #[test]
    fn duplicate_acks_are_ignored() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let now = Instant::now();
        ch.enqueue(msg(1));
        ch.due(now, Duration::from_millis(10), true);

        assert!(ch.handle_ack(0, &mut pool).is_none()); // no receipt attached
        assert!(ch.handle_ack(0, &mut pool).is_none()); // duplicate, no-op
        assert!(ch.handle_ack(17, &mut pool).is_none()); // never sent
    }

    #[test]
    fn receipt_tag_surfaces_on_ack() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let now = Instant::now();
        ch.enqueue(msg(1).with_receipt(0xabcd));
        ch.due(now, Duration::from_millis(10), true);
        assert_eq!(ch.handle_ack(0, &mut pool), Some(0xabcd));
    }

    #[test]
    fn acked_payload_returns_to_pool() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let now = Instant::now();
        ch.enqueue(msg(1));
        ch.due(now, Duration::from_millis(10), true);
        assert_eq!(pool.pooled(), 0);
        ch.handle_ack(0, &mut pool);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn three_retransmits_raise_the_stall_signal() {
        let mut ch = channel();
        let mut now = Instant::now();
        ch.enqueue(msg(1));
        ch.due(now, Duration::from_millis(1), true);
        assert!(!ch.is_stalled());

        for _ in 0..3 {
            now += Duration::from_secs(9); // past any capped delay
            ch.due(now, Duration::from_millis(1), true);
        }
        assert!(ch.is_stalled());
        assert!(!ch.has_failed());
    }

    #[test]
    fn exhausted_retransmits_fail_the_channel() {
        let mut ch = ReliableSendChannel::new(64, Duration::from_millis(100), 3);
        let mut now = Instant::now();
        ch.enqueue(msg(1));
        ch.due(now, Duration::from_millis(1), true);

        for _ in 0..4 {
            now += Duration::from_secs(9);
            ch.due(now, Duration::from_millis(1), true);
        }
        assert!(ch.has_failed());
    }

    #[test]
    fn sequence_numbers_wrap_within_fifteen_bits() {
        let mut ch = channel();
        let mut pool = MessagePool::new();
        let now = Instant::now();
        // Walk the channel close to the wrap point.
        for _ in 0..512 {
            for i in 0..64 {
                ch.enqueue(msg(i as u8));
            }
            for t in ch.due(now, Duration::from_millis(1), true) {
                ch.handle_ack(t.sequence, &mut pool);
            }
        }
        // 512 * 64 = 32768 sends: next sequence is back at 0.
        ch.enqueue(msg(9));
        let out = ch.due(now, Duration::from_millis(1), true);
        assert_eq!(out[0].sequence, 0);
    }

    #[test]
    fn sequenced_channel_stamps_and_drains() {
        let mut ch = SequencedSendChannel::default();
        ch.enqueue(msg(1));
        ch.enqueue(msg(2));
        let out = ch.due();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence, 0);
        assert_eq!(out[1].sequence, 1);
        assert!(!ch.has_pending());
    }

    #[test]
    fn unreliable_channel_drains_without_sequences() {
        let mut ch = UnreliableSendChannel::default();
        ch.enqueue(msg(1));
        let out = ch.due();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence, 0);
    }
}
