//! MTU expansion.
//!
//! After the handshake completes, the connection probes for a larger
//! datagram size than the conservative default. Probes are padded
//! `ExpandMTURequest` messages sent as standalone datagrams of exactly the
//! candidate size; the remote answers with `ExpandMTUSuccess`. A success
//! raises the current MTU towards the probed size; a probe that times out
//! repeatedly means the path cannot carry that size, and the search
//! finalizes at the last size that worked.

use std::time::{Duration, Instant};

use bitflux_protocol::{control::MtuProbePayload, message::MessagePayload};

/// Attempts per candidate size before the search gives up on it.
const PROBE_ATTEMPTS: u32 = 3;

/// Stop probing once the remaining search gap is this small.
const CONVERGE_THRESHOLD: u16 = 16;

/// How long to wait for a success before re-probing.
fn probe_timeout(rtt: Duration) -> Duration {
    (rtt * 4).max(Duration::from_millis(500))
}

/// State of the MTU expansion search for one connection.
#[derive(Debug)]
pub struct MtuExpansion {
    enabled: bool,
    current: u16,
    ceiling: u16,
    outstanding: Option<(u16, Instant)>,
    attempts: u32,
    finalized: bool,
}

impl MtuExpansion {
    /// Creates the search. `current` is the configured default MTU,
    /// `ceiling` the configured maximum.
    pub fn new(enabled: bool, current: u16, ceiling: u16) -> Self {
        Self {
            enabled,
            current,
            ceiling,
            outstanding: None,
            attempts: 0,
            finalized: !enabled || current >= ceiling,
        }
    }

    /// The MTU the connection may currently use.
    pub fn current_mtu(&self) -> u16 {
        self.current
    }

    /// Whether the search has settled.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn candidate(&self) -> u16 {
        // Midpoint between what works and the ceiling, probing upward.
        self.current + (self.ceiling - self.current + 1) / 2
    }

    /// Drives the search. Returns a probe payload to send as its own
    /// datagram when one is due.
    pub fn heartbeat(&mut self, now: Instant, rtt: Duration) -> Option<MessagePayload> {
        if self.finalized {
            return None;
        }

        if let Some((size, sent)) = self.outstanding {
            if now.duration_since(sent) < probe_timeout(rtt) {
                return None;
            }
            self.attempts += 1;
            if self.attempts >= PROBE_ATTEMPTS {
                // The path will not carry this size. Back off and settle.
                tracing::debug!("MTU probe of {} bytes failed; finalizing at {}", size, self.current);
                self.finalized = true;
                self.outstanding = None;
                return None;
            }
            // Retry the same size.
            self.outstanding = Some((size, now));
            return Some(MtuProbePayload { size }.encode());
        }

        if self.ceiling - self.current <= CONVERGE_THRESHOLD {
            self.finalized = true;
            return None;
        }

        let size = self.candidate();
        self.attempts = 0;
        self.outstanding = Some((size, now));
        Some(MtuProbePayload { size }.encode())
    }

    /// Handles an `ExpandMTUSuccess` for the echoed size.
    pub fn process_success(&mut self, size: u16) -> bool {
        match self.outstanding {
            Some((probed, _)) if probed == size => {
                self.current = self.current.max(size);
                self.outstanding = None;
                self.attempts = 0;
                if self.ceiling - self.current <= CONVERGE_THRESHOLD {
                    self.finalized = true;
                }
                tracing::debug!("MTU raised to {}", self.current);
                true
            }
            _ => false,
        }
    }

    /// Builds the success reply for a received probe of `size` bytes.
    pub fn success_reply(size: u16) -> MessagePayload {
        MtuProbePayload { size }.encode_success()
    }
}
