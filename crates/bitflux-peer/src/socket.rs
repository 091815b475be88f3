//! UDP implementation of the datagram transport.
//!
//! Socket options come from the configuration through `socket2`; binding is
//! serialized by a process-wide lock so two peers rebinding at once cannot
//! race for the same port.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{Mutex, OnceLock},
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};

use bitflux_core::{config::Config, transport::DatagramSocket};

/// Serializes bind/rebind across every peer in the process.
fn bind_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// How long a receive may block waiting for data.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A bound UDP socket configured from a [`Config`].
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
    /// The address actually bound, port resolved. Rebinds go back here.
    bound: SocketAddr,
    dual_stack: bool,
    receive_buffer_size: Option<usize>,
    send_buffer_size: Option<usize>,
}

impl UdpDatagramSocket {
    /// Binds a socket according to the configuration.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let requested = SocketAddr::new(config.local_address, config.port);
        let socket = Self::open(
            requested,
            config.dual_stack,
            config.receive_buffer_size,
            config.send_buffer_size,
            false,
        )?;
        let bound = socket.local_addr()?;
        Ok(Self {
            socket,
            bound,
            dual_stack: config.dual_stack,
            receive_buffer_size: config.receive_buffer_size,
            send_buffer_size: config.send_buffer_size,
        })
    }

    fn open(
        addr: SocketAddr,
        dual_stack: bool,
        receive_buffer_size: Option<usize>,
        send_buffer_size: Option<usize>,
        reuse_address: bool,
    ) -> io::Result<UdpSocket> {
        let _guard = bind_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() && dual_stack {
            socket.set_only_v6(false)?;
        }
        if let Some(size) = receive_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if reuse_address {
            socket.set_reuse_address(true)?;
        }
        // Discovery sends to the broadcast address.
        socket.set_broadcast(true)?;
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(socket)
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(len, addr)| (&buffer[..len], addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn rebind(&mut self) -> io::Result<()> {
        // Release the port first: swap in an ephemeral placeholder so the old
        // socket drops before the new bind. If the real bind then fails, the
        // next rebind attempt still targets `self.bound`.
        let placeholder = Self::open(
            SocketAddr::new(self.bound.ip(), 0),
            self.dual_stack,
            self.receive_buffer_size,
            self.send_buffer_size,
            false,
        )?;
        self.socket = placeholder;
        self.socket = Self::open(
            self.bound,
            self.dual_stack,
            self.receive_buffer_size,
            self.send_buffer_size,
            true,
        )?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }
}
