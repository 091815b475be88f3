//! The application-facing peer handle.
//!
//! `Peer::start` binds the socket, derives the unique identifier and spawns
//! the library thread. The handle is then safe to share across application
//! threads: sends become commands drained at the next heartbeat, receives
//! pull from the bounded released-messages queue.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use sha2::{Digest, Sha256};

use bitflux_core::{
    config::Config,
    error::{ErrorKind, Result},
    message_pool::{MessagePool, PoolMailbox},
    transport::PortMapper,
};
use bitflux_protocol::{
    message::{IncomingMessage, MessagePayload},
    message_type::DeliveryMethod,
};

use crate::{
    network_loop::{NetworkLoop, PeerCommand},
    socket::UdpDatagramSocket,
    time::SystemClock,
};

/// Peer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerStatus {
    /// Not started, or fully shut down.
    NotRunning = 0,
    /// Binding the socket and spawning the library thread.
    Starting = 1,
    /// The library thread is running.
    Running = 2,
    /// Shutdown requested; the final heartbeat is pending.
    ShuttingDown = 3,
}

impl PeerStatus {
    /// Decodes the atomic representation.
    pub fn from_u8(value: u8) -> PeerStatus {
        match value {
            1 => PeerStatus::Starting,
            2 => PeerStatus::Running,
            3 => PeerStatus::ShuttingDown,
            _ => PeerStatus::NotRunning,
        }
    }
}

/// Derives the peer's 64-bit unique identifier from its endpoint and MAC
/// address: the low 8 bytes of `SHA-256(endpoint-string || mac)`.
pub fn derive_unique_identifier(local: &SocketAddr, mac: &[u8]) -> u64 {
    let mut hasher = Sha256::default();
    hasher.update(local.to_string().as_bytes());
    hasher.update(mac);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[digest.len() - 8..]);
    u64::from_le_bytes(bytes)
}

/// A running peer: socket owner by proxy, command front-end, message source.
pub struct Peer {
    local_addr: SocketAddr,
    unique_id: u64,
    status: Arc<AtomicU8>,
    commands: Sender<PeerCommand>,
    received: Receiver<IncomingMessage>,
    flush_requested: Arc<AtomicBool>,
    pool_mailbox: PoolMailbox,
    thread: Option<JoinHandle<()>>,
}

impl Peer {
    /// Validates the configuration, binds the socket and spawns the library
    /// thread.
    pub fn start(config: Config) -> Result<Peer> {
        Self::start_with_mapper(config, None)
    }

    /// Like [`start`](Self::start), with an external port mapper invoked
    /// when `enable_upnp` is set.
    pub fn start_with_mapper(
        config: Config,
        mut mapper: Option<Box<dyn PortMapper>>,
    ) -> Result<Peer> {
        config.validate().map_err(ErrorKind::InvalidState)?;

        let status = Arc::new(AtomicU8::new(PeerStatus::Starting as u8));
        let socket = UdpDatagramSocket::bind(&config)?;
        let local_addr = bitflux_core::transport::DatagramSocket::local_addr(&socket)?;

        if config.enable_upnp {
            if let Some(mapper) = mapper.as_mut() {
                if let Err(err) = mapper.map_udp_port(local_addr.port(), local_addr.port()) {
                    tracing::warn!("port mapping failed: {}", err);
                }
            } else {
                tracing::warn!("enable_upnp set but no port mapper supplied");
            }
        }

        let unique_id = match config.hardware_address {
            Some(mac) => derive_unique_identifier(&local_addr, &mac),
            None => rand::random(),
        };

        let (command_tx, command_rx) = unbounded();
        let (released_tx, released_rx) = bounded(config.received_queue_capacity);
        let flush_requested = Arc::new(AtomicBool::new(false));

        // The mailbox lets recycled buffers find their way back to the
        // loop's pool from application threads.
        let pool = MessagePool::new();
        let pool_mailbox = pool.mailbox();

        let mut network_loop = NetworkLoop::new(
            socket,
            config,
            unique_id,
            pool,
            command_rx,
            released_tx,
            flush_requested.clone(),
            status.clone(),
        );
        status.store(PeerStatus::Running as u8, Ordering::SeqCst);
        let thread = std::thread::Builder::new()
            .name("bitflux-network".into())
            .spawn(move || {
                network_loop.run(&SystemClock);
            })?;

        Ok(Peer {
            local_addr,
            unique_id,
            status,
            commands: command_tx,
            received: released_rx,
            flush_requested,
            pool_mailbox,
            thread: Some(thread),
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The peer's 64-bit unique identifier.
    pub fn unique_identifier(&self) -> u64 {
        self.unique_id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> PeerStatus {
        PeerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Handle for returning message buffers to the library thread's pool.
    pub fn pool_mailbox(&self) -> PoolMailbox {
        self.pool_mailbox.clone()
    }

    fn command(&self, command: PeerCommand) -> Result<()> {
        if self.status() != PeerStatus::Running {
            return Err(ErrorKind::InvalidState("peer is not running"));
        }
        self.commands
            .send(command)
            .map_err(|_| ErrorKind::InvalidState("library thread has exited"))
    }

    fn resolve(remote: impl ToSocketAddrs) -> Result<SocketAddr> {
        remote
            .to_socket_addrs()?
            .next()
            .ok_or(ErrorKind::InvalidState("remote address did not resolve"))
    }

    /// Opens a connection, optionally carrying hail data in the `Connect`.
    pub fn connect(&self, remote: impl ToSocketAddrs, hail: Vec<u8>) -> Result<SocketAddr> {
        let remote = Self::resolve(remote)?;
        self.command(PeerCommand::Connect { remote, hail })?;
        Ok(remote)
    }

    /// Queues application data for a connected remote.
    pub fn send_to(
        &self,
        remote: SocketAddr,
        data: Vec<u8>,
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<()> {
        self.command(PeerCommand::Send {
            remote,
            payload: Arc::new(MessagePayload::from_bytes(data)),
            method,
            channel,
            receipt: None,
        })
    }

    /// Queues a pre-built payload; use this to share one payload across
    /// several recipients without copying.
    pub fn send_payload(
        &self,
        remote: SocketAddr,
        payload: Arc<MessagePayload>,
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<()> {
        self.command(PeerCommand::Send { remote, payload, method, channel, receipt: None })
    }

    /// Queues reliable data and asks for a `Receipt` carrying `tag` once the
    /// remote has acknowledged all of it.
    pub fn send_with_receipt(
        &self,
        remote: SocketAddr,
        data: Vec<u8>,
        method: DeliveryMethod,
        channel: u8,
        tag: u64,
    ) -> Result<()> {
        self.command(PeerCommand::Send {
            remote,
            payload: Arc::new(MessagePayload::from_bytes(data)),
            method,
            channel,
            receipt: Some(tag),
        })
    }

    /// Sends data to an endpoint without establishing a connection.
    pub fn send_unconnected(&self, remote: SocketAddr, data: Vec<u8>) -> Result<()> {
        self.command(PeerCommand::SendUnconnected { remote, payload: data })
    }

    /// Approves a connection surfaced as `ConnectionApproval`.
    pub fn approve(&self, remote: SocketAddr) -> Result<()> {
        self.command(PeerCommand::Approve { remote })
    }

    /// Denies a connection surfaced as `ConnectionApproval`.
    pub fn deny(&self, remote: SocketAddr, reason: &str) -> Result<()> {
        self.command(PeerCommand::Deny { remote, reason: reason.to_owned() })
    }

    /// Starts a graceful disconnect from one remote.
    pub fn disconnect_from(&self, remote: SocketAddr, reason: &str) -> Result<()> {
        self.command(PeerCommand::Disconnect { remote, reason: reason.to_owned() })
    }

    /// Broadcasts a discovery request on the local network.
    pub fn discover_local_peers(&self, port: u16) -> Result<()> {
        self.command(PeerCommand::DiscoverLocal { port })
    }

    /// Sends a discovery request to a known endpoint.
    pub fn discover_known_peer(&self, remote: SocketAddr) -> Result<()> {
        self.command(PeerCommand::DiscoverKnown { remote })
    }

    /// Answers a `DiscoveryRequest` with an application payload.
    pub fn send_discovery_response(&self, remote: SocketAddr, data: Vec<u8>) -> Result<()> {
        self.command(PeerCommand::DiscoveryResponse { remote, payload: data })
    }

    /// Introduces two peers to each other for NAT punch-through.
    pub fn introduce(
        &self,
        host_internal: SocketAddr,
        host_external: SocketAddr,
        client_internal: SocketAddr,
        client_external: SocketAddr,
        token: &str,
    ) -> Result<()> {
        self.command(PeerCommand::Introduce {
            host_internal,
            host_external,
            client_internal,
            client_external,
            token: token.to_owned(),
        })
    }

    /// Asks the library thread to flush queued sends on its next tick.
    pub fn flush_send_queue(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
    }

    /// Takes the next released message without blocking.
    pub fn recv(&self) -> Option<IncomingMessage> {
        self.received.try_recv().ok()
    }

    /// Waits up to `timeout` for the next released message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<IncomingMessage> {
        match self.received.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Shuts the peer down: every connected remote receives a `Disconnect`
    /// with `reason`, queued messages go out in a final heartbeat, then the
    /// library thread exits and the socket closes.
    pub fn shutdown(&mut self, reason: &str) {
        if self.status() == PeerStatus::Running {
            let _ = self.commands.send(PeerCommand::Shutdown { reason: reason.to_owned() });
            self.status.store(PeerStatus::ShuttingDown as u8, Ordering::SeqCst);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown("Peer dropped");
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("local_addr", &self.local_addr)
            .field("status", &self.status())
            .finish()
    }
}
