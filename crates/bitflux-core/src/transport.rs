//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr, time::Duration};

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory emulator, etc.) to
/// be plugged into the network loop without coupling to a concrete socket.
pub trait DatagramSocket: Send {
    /// Sends a single datagram.
    fn send_to(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram, blocking at most for the configured read
    /// timeout. `WouldBlock`/`TimedOut` mean no data is available.
    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the local address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Rebinds the socket to its address with address reuse enabled.
    /// Called after a `NotConnected` error; transports without a concept of
    /// rebinding just return `Ok`.
    fn rebind(&mut self) -> Result<()>;

    /// Adjusts how long `recv_from` may block waiting for data.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

/// External port-mapping hook (UPnP or otherwise).
///
/// The library never maps ports itself; when `enable_upnp` is set it calls
/// whatever mapper the application supplied at start.
pub trait PortMapper: Send {
    /// Requests that `external_port` on the gateway be forwarded to
    /// `internal_port` on this host, for UDP.
    fn map_udp_port(&mut self, internal_port: u16, external_port: u16) -> Result<()>;

    /// Removes a previously created mapping.
    fn unmap_udp_port(&mut self, external_port: u16) -> Result<()>;
}
