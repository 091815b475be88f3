//! Inbound sequence tracking.
//!
//! Three receiver variants mirror the send channels that need one:
//!
//! - [`ReliableOrderedReceiver`] releases messages in sequence order,
//!   withholding early arrivals until their predecessors show up.
//! - [`ReliableUnorderedReceiver`] releases on arrival and only suppresses
//!   duplicates.
//! - [`SequencedReceiver`] keeps the newest message and drops stale ones.
//!
//! Acknowledging is not done here: the connection acks every reliable
//! arrival before consulting the receiver, so duplicates re-ack without
//! being re-delivered.

use bitflux_protocol::sequence::{self, relative, SequenceNumber};

/// What to do with a just-received message.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome<T> {
    /// Release these messages to the application, in order.
    Released(Vec<(SequenceNumber, T)>),
    /// Already delivered; recycle silently.
    Duplicate(T),
    /// Further ahead than the window allows; recycle and log.
    TooEarly(T),
    /// Buffered until its predecessors arrive. If a copy was already
    /// withheld the replaced value is handed back for recycling.
    Withheld(Option<T>),
}

/// Reliable-ordered receiver: a sliding window with withheld early messages.
#[derive(Debug)]
pub struct ReliableOrderedReceiver<T> {
    window_start: SequenceNumber,
    window_size: u16,
    early_received: Vec<bool>,
    withheld: Vec<Option<T>>,
}

impl<T> ReliableOrderedReceiver<T> {
    /// Creates a receiver. `window_size` must be a power of two so slot
    /// aliasing modulo the window agrees with the 15-bit sequence space.
    pub fn new(window_size: u16) -> Self {
        assert!(
            window_size.is_power_of_two(),
            "window size must divide the sequence space"
        );
        Self {
            window_start: 0,
            window_size,
            early_received: vec![false; window_size as usize],
            withheld: (0..window_size).map(|_| None).collect(),
        }
    }

    fn slot(&self, sequence: SequenceNumber) -> usize {
        (sequence % self.window_size) as usize
    }

    fn advance_window(&mut self) {
        let slot = self.slot(self.window_start);
        self.early_received[slot] = false;
        self.window_start = sequence::next(self.window_start);
    }

    /// Start of the receive window.
    pub fn window_start(&self) -> SequenceNumber {
        self.window_start
    }

    /// Processes an arrival.
    pub fn receive(&mut self, s: SequenceNumber, value: T) -> ReceiveOutcome<T> {
        let r = relative(s, self.window_start);
        if r == 0 {
            let mut released = vec![(s, value)];
            self.advance_window();
            while self.early_received[self.slot(self.window_start)] {
                let slot = self.slot(self.window_start);
                match self.withheld[slot].take() {
                    Some(withheld) => released.push((self.window_start, withheld)),
                    None => break,
                }
                self.advance_window();
            }
            ReceiveOutcome::Released(released)
        } else if r < 0 {
            ReceiveOutcome::Duplicate(value)
        } else if r > self.window_size as i16 {
            ReceiveOutcome::TooEarly(value)
        } else {
            let slot = self.slot(s);
            let replaced = self.withheld[slot].replace(value);
            self.early_received[slot] = true;
            ReceiveOutcome::Withheld(replaced)
        }
    }
}

/// Reliable-unordered receiver: releases on arrival, suppresses duplicates
/// within the window, and treats anything behind the window as a duplicate.
#[derive(Debug)]
pub struct ReliableUnorderedReceiver {
    window_start: SequenceNumber,
    window_size: u16,
    received: Vec<bool>,
}

/// Outcome for receivers that never buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum UnorderedOutcome {
    /// Hand the message to the application.
    Release,
    /// Seen before (or behind the window); drop silently.
    Duplicate,
    /// Further ahead than the window allows; drop and log.
    TooEarly,
}

impl ReliableUnorderedReceiver {
    /// Creates a receiver with a power-of-two window.
    pub fn new(window_size: u16) -> Self {
        assert!(window_size.is_power_of_two());
        Self { window_start: 0, window_size, received: vec![false; window_size as usize] }
    }

    fn slot(&self, sequence: SequenceNumber) -> usize {
        (sequence % self.window_size) as usize
    }

    /// Processes an arrival.
    pub fn receive(&mut self, s: SequenceNumber) -> UnorderedOutcome {
        let r = relative(s, self.window_start);
        if r < 0 {
            return UnorderedOutcome::Duplicate;
        }
        if r > self.window_size as i16 {
            return UnorderedOutcome::TooEarly;
        }
        let slot = self.slot(s);
        if r == 0 || !self.received[slot] {
            self.received[slot] = true;
            while self.received[self.slot(self.window_start)] {
                let slot = self.slot(self.window_start);
                self.received[slot] = false;
                self.window_start = sequence::next(self.window_start);
            }
            UnorderedOutcome::Release
        } else {
            UnorderedOutcome::Duplicate
        }
    }
}

/// Sequenced receiver: only messages newer than the last delivered pass.
#[derive(Debug, Default)]
pub struct SequencedReceiver {
    last_received: Option<SequenceNumber>,
}

impl SequencedReceiver {
    /// Creates a receiver that accepts the first arrival unconditionally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the message should be released.
    pub fn receive(&mut self, s: SequenceNumber) -> bool {
        if let Some(last) = self.last_received {
            if relative(s, last) <= 0 {
                return false;
            }
        }
        self.last_received = Some(s);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released<T: std::fmt::Debug>(outcome: ReceiveOutcome<T>) -> Vec<SequenceNumber> {
        match outcome {
            ReceiveOutcome::Released(run) => run.into_iter().map(|(s, _)| s).collect(),
            other => panic!("expected release, got {:?}", other),
        }
    }

    #[test]
    fn in_order_arrivals_release_immediately() {
        let mut rx = ReliableOrderedReceiver::new(64);
        for s in 0..5u16 {
            assert_eq!(released(rx.receive(s, s)), vec![s]);
        }
        assert_eq!(rx.window_start(), 5);
    }

    #[test]
    fn out_of_order_arrivals_release_in_order() {
        // Arrivals B D A C for sends A B C D must come out A B C D.
        let mut rx = ReliableOrderedReceiver::new(64);
        assert!(matches!(rx.receive(1, "B"), ReceiveOutcome::Withheld(None)));
        assert!(matches!(rx.receive(3, "D"), ReceiveOutcome::Withheld(None)));
        assert_eq!(released(rx.receive(0, "A")), vec![0, 1]);
        assert_eq!(released(rx.receive(2, "C")), vec![2, 3]);
    }

    #[test]
    fn duplicates_are_not_redelivered() {
        let mut rx = ReliableOrderedReceiver::new(64);
        released(rx.receive(0, "A"));
        assert!(matches!(rx.receive(0, "A"), ReceiveOutcome::Duplicate(_)));

        // An early duplicate replaces its withheld copy instead of queueing twice.
        assert!(matches!(rx.receive(2, "C"), ReceiveOutcome::Withheld(None)));
        assert!(matches!(rx.receive(2, "C"), ReceiveOutcome::Withheld(Some("C"))));
        released(rx.receive(1, "B"));
    }

    #[test]
    fn gap_larger_than_window_is_too_early() {
        let mut rx = ReliableOrderedReceiver::new(64);
        // window_start = 0; r = 65 > 64.
        assert!(matches!(rx.receive(65, "X"), ReceiveOutcome::TooEarly(_)));
        // r = 64 is still accepted per the window rule.
        assert!(matches!(rx.receive(64, "Y"), ReceiveOutcome::Withheld(None)));
    }

    #[test]
    fn release_order_is_strictly_monotonic_across_wrap() {
        let mut rx = ReliableOrderedReceiver::new(64);
        // Pretend a long session: walk the window to the wrap point.
        for s in 0..32768u16 {
            released(rx.receive(s, ()));
        }
        assert_eq!(rx.window_start(), 0);

        // Sends 32765..=32767, 0..=2 arrive shuffled around the boundary.
        let mut rx = ReliableOrderedReceiver::new(64);
        for s in 0..32765u16 {
            released(rx.receive(s, ()));
        }
        assert!(matches!(rx.receive(32766, ()), ReceiveOutcome::Withheld(None)));
        assert!(matches!(rx.receive(0, ()), ReceiveOutcome::Withheld(None)));
        assert_eq!(released(rx.receive(32765, ())), vec![32765, 32766]);
        assert_eq!(released(rx.receive(32767, ())), vec![32767, 0]);
        assert_eq!(released(rx.receive(1, ())), vec![1]);
    }

    #[test]
    fn stale_arrival_behind_window_is_duplicate() {
        let mut rx = ReliableOrderedReceiver::new(64);
        for s in 0..100u16 {
            released(rx.receive(s, ()));
        }
        assert!(matches!(rx.receive(40, ()), ReceiveOutcome::Duplicate(_)));
    }

    #[test]
    fn unordered_releases_any_order_once() {
        let mut rx = ReliableUnorderedReceiver::new(64);
        assert_eq!(rx.receive(3), UnorderedOutcome::Release);
        assert_eq!(rx.receive(0), UnorderedOutcome::Release);
        assert_eq!(rx.receive(3), UnorderedOutcome::Duplicate);
        assert_eq!(rx.receive(1), UnorderedOutcome::Release);
        assert_eq!(rx.receive(2), UnorderedOutcome::Release);
        // Window advanced past 0..=3; stale arrivals are duplicates.
        assert_eq!(rx.receive(0), UnorderedOutcome::Duplicate);
    }

    #[test]
    fn unordered_rejects_beyond_window() {
        let mut rx = ReliableUnorderedReceiver::new(64);
        assert_eq!(rx.receive(100), UnorderedOutcome::TooEarly);
        assert_eq!(rx.receive(64), UnorderedOutcome::Release);
    }

    #[test]
    fn sequenced_drops_old_and_equal() {
        let mut rx = SequencedReceiver::new();
        assert!(rx.receive(5));
        assert!(!rx.receive(5));
        assert!(!rx.receive(3));
        assert!(rx.receive(6));
        assert!(rx.receive(100));
        assert!(!rx.receive(99));
    }

    #[test]
    fn sequenced_accepts_across_wrap() {
        let mut rx = SequencedReceiver::new();
        assert!(rx.receive(32767));
        // 0 is newer than 32767 in modular terms.
        assert!(rx.receive(0));
        assert!(!rx.receive(32767));
    }

    #[test]
    fn sequenced_accepts_first_message_whatever_its_sequence() {
        let mut rx = SequencedReceiver::new();
        assert!(rx.receive(20000));
    }
}
