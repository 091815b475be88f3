//! Per-connection traffic counters.

/// Counters for one connection. Updated by the library thread; snapshots are
/// cheap copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStatistics {
    /// Messages handed to a send channel.
    pub messages_sent: u64,
    /// Messages released to the application.
    pub messages_received: u64,
    /// Retransmissions performed.
    pub messages_resent: u64,
    /// Duplicates suppressed by the receive channels.
    pub duplicates_dropped: u64,
    /// Messages dropped for arriving further ahead than the window allows.
    pub too_early_dropped: u64,
    /// Datagram bytes sent, headers included.
    pub bytes_sent: u64,
    /// Datagram bytes received, headers included.
    pub bytes_received: u64,
    /// Malformed frames and other protocol violations seen.
    pub protocol_errors: u64,
}

impl ConnectionStatistics {
    /// Resets every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
