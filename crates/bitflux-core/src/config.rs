use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use crate::{
    constants::{ABSOLUTE_MAX_MTU, DEFAULT_MTU, DEFAULT_WINDOW_SIZE},
    incoming::IncomingKindSet,
};

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
///
/// The configuration is consumed when the peer starts; there is no way to
/// mutate it afterwards, which is what locks the settings for the lifetime
/// of the peer.
pub struct Config {
    /// Address to bind the socket to (IPv4 or IPv6).
    pub local_address: IpAddr,
    /// Port to bind to. 0 lets the OS choose.
    pub port: u16,
    /// Accept IPv4 traffic on an IPv6 socket.
    pub dual_stack: bool,
    /// Socket receive buffer size in bytes (None = system default).
    pub receive_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    pub send_buffer_size: Option<usize>,
    /// Cap on simultaneous connections, in-flight handshakes included.
    pub maximum_connections: usize,
    /// Interval between keepalive pings on an established connection.
    pub ping_interval: Duration,
    /// Max time without any traffic before a connection is considered lost.
    pub connection_timeout: Duration,
    /// Datagram size used until MTU expansion finds a larger one.
    pub default_mtu: u16,
    /// Upper bound for MTU expansion probes.
    pub maximum_mtu: u16,
    /// Probe for a larger MTU after the handshake completes.
    pub expand_mtu: bool,
    /// Floor for the retransmission delay; the effective delay is
    /// `max(resend_base_delay, 2 * rtt)` doubled per retransmit, capped at 8 s.
    pub resend_base_delay: Duration,
    /// Retransmit attempts per sequence before the connection is declared failed.
    pub max_retransmits: u32,
    /// Answer inbound `Connect` messages. Disable for pure clients.
    pub accept_incoming_connections: bool,
    /// Ask an external port mapper to forward the bound port. The library
    /// only invokes the supplied [`PortMapper`](crate::transport) hook; it
    /// ships no UPnP implementation of its own.
    pub enable_upnp: bool,
    /// Flush queued sends every heartbeat instead of waiting for an explicit
    /// flush call.
    pub auto_flush_send_queue: bool,
    /// Which incoming-message kinds are released to the application.
    pub enabled_incoming_kinds: IncomingKindSet,
    /// Sliding-window size for reliable channels. Must be a power of two so
    /// that it divides the 15-bit sequence space.
    pub window_size: u16,
    /// Idle time after which a partly received fragment group is dropped.
    pub fragment_group_ttl: Duration,
    /// Capacity of the released-incoming-messages queue.
    pub received_queue_capacity: usize,
    /// Interval between handshake message retransmissions.
    pub resend_handshake_interval: Duration,
    /// Handshake sends before giving up on establishing the connection.
    pub maximum_handshake_attempts: u32,
    /// Application identifier echoed in handshakes; peers with a different
    /// identifier are rejected.
    pub app_identifier: String,
    /// MAC address used to derive the peer's unique identifier. Discovery of
    /// the hardware address is the caller's concern; when absent a random
    /// identifier is generated.
    pub hardware_address: Option<[u8; 6]>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            dual_stack: false,
            receive_buffer_size: None,
            send_buffer_size: None,
            maximum_connections: 32,
            ping_interval: Duration::from_secs(4),
            connection_timeout: Duration::from_secs(25),
            default_mtu: DEFAULT_MTU,
            maximum_mtu: ABSOLUTE_MAX_MTU,
            expand_mtu: true,
            resend_base_delay: Duration::from_millis(100),
            max_retransmits: 10,
            accept_incoming_connections: false,
            enable_upnp: false,
            auto_flush_send_queue: true,
            enabled_incoming_kinds: IncomingKindSet::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            fragment_group_ttl: Duration::from_secs(60),
            received_queue_capacity: 1024,
            resend_handshake_interval: Duration::from_secs(3),
            maximum_handshake_attempts: 5,
            app_identifier: String::new(),
            hardware_address: None,
        }
    }
}

impl Config {
    /// Validates invariants the protocol depends on.
    ///
    /// The window size must be a power of two: slot indexing aliases
    /// sequence numbers modulo the window, which is only correct when the
    /// window divides the 2^15 sequence space.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.window_size == 0 || !self.window_size.is_power_of_two() {
            return Err("window_size must be a nonzero power of two");
        }
        if self.window_size > crate::constants::SEQUENCE_NUMBER_COUNT / 2 {
            return Err("window_size must not exceed half the sequence space");
        }
        if self.default_mtu > self.maximum_mtu {
            return Err("default_mtu exceeds maximum_mtu");
        }
        if self.maximum_mtu > crate::constants::ABSOLUTE_MAX_MTU {
            // Bit lengths must fit the 16-bit header field.
            return Err("maximum_mtu exceeds the supported ceiling");
        }
        if usize::from(self.default_mtu) <= crate::constants::MESSAGE_HEADER_SIZE {
            return Err("default_mtu leaves no room for a message header");
        }
        if self.maximum_connections == 0 {
            return Err("maximum_connections must be at least 1");
        }
        Ok(())
    }
}
