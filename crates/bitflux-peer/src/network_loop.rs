//! The single-threaded network loop.
//!
//! Exactly one library thread runs this loop from peer start to shutdown.
//! It owns the socket, both connection maps and the message pool; nothing
//! else touches them. Application threads reach it through the command
//! channel, and receive released messages from the bounded queue.
//!
//! Each tick: heartbeats (rate limited), handshake heartbeats every third
//! tick, the unconnected send queue, then a bounded drain of the socket.

use std::{
    collections::{HashMap, VecDeque},
    convert::TryFrom,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use bitflux_connection::{connection::Action, Connection};
use bitflux_core::{
    bit_buffer::BitBuffer,
    config::Config,
    constants::MESSAGE_HEADER_SIZE,
    incoming::IncomingKind,
    message_pool::MessagePool,
    transport::DatagramSocket,
};
use bitflux_protocol::{
    control::NatIntroductionPayload,
    message::{IncomingMessage, MessagePayload},
    message_type::{DeliveryMethod, MessageType},
    packet_codec::{self, Frame},
    status::ConnectionStatus,
};

use crate::{peer::PeerStatus, time::Clock};

/// Upper bound on datagrams drained from the socket per tick.
const MAX_READS_PER_TICK: usize = 1024;

/// Requests posted by application threads, drained at heartbeat.
#[derive(Debug)]
pub enum PeerCommand {
    /// Open a connection to a remote peer.
    Connect {
        /// Remote endpoint.
        remote: SocketAddr,
        /// Hail data carried in the `Connect` message.
        hail: Vec<u8>,
    },
    /// Queue application data on a connection.
    Send {
        /// Remote endpoint of the connection.
        remote: SocketAddr,
        /// Payload to deliver.
        payload: Arc<MessagePayload>,
        /// Delivery method.
        method: DeliveryMethod,
        /// Sequence channel within the method.
        channel: u8,
        /// Optional delivery-receipt tag.
        receipt: Option<u64>,
    },
    /// Send a datagram to an endpoint without a connection.
    SendUnconnected {
        /// Destination endpoint.
        remote: SocketAddr,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },
    /// Approve a connection waiting in `RespondedAwaitingApproval`.
    Approve {
        /// The pending remote.
        remote: SocketAddr,
    },
    /// Deny a pending connection.
    Deny {
        /// The pending remote.
        remote: SocketAddr,
        /// Reason sent in the `Disconnect`.
        reason: String,
    },
    /// Disconnect an established connection.
    Disconnect {
        /// The remote to drop.
        remote: SocketAddr,
        /// Reason sent in the `Disconnect`.
        reason: String,
    },
    /// Broadcast a discovery request on the local network.
    DiscoverLocal {
        /// Port the request is broadcast to.
        port: u16,
    },
    /// Send a discovery request to a known endpoint.
    DiscoverKnown {
        /// The endpoint to query.
        remote: SocketAddr,
    },
    /// Answer a discovery request.
    DiscoveryResponse {
        /// Requester's endpoint.
        remote: SocketAddr,
        /// Application payload for the response.
        payload: Vec<u8>,
    },
    /// Introduce two peers to each other for NAT punch-through.
    Introduce {
        /// Host's own view of its endpoint.
        host_internal: SocketAddr,
        /// Host as seen from here.
        host_external: SocketAddr,
        /// Client's own view of its endpoint.
        client_internal: SocketAddr,
        /// Client as seen from here.
        client_external: SocketAddr,
        /// Token echoed in the success notifications.
        token: String,
    },
    /// Stop the peer after a final heartbeat.
    Shutdown {
        /// Reason sent to every connected peer.
        reason: String,
    },
}

/// Loop-level counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStatistics {
    /// Datagrams read off the socket.
    pub datagrams_received: u64,
    /// Datagrams written to the socket.
    pub datagrams_sent: u64,
    /// Malformed datagrams and reserved-code messages dropped.
    pub protocol_errors: u64,
}

/// Owns the socket and drives every connection.
pub struct NetworkLoop<T: DatagramSocket> {
    socket: T,
    config: Config,
    local_unique_id: u64,

    connections: HashMap<SocketAddr, Connection>,
    handshakes: HashMap<SocketAddr, Connection>,
    pool: MessagePool,

    commands: Receiver<PeerCommand>,
    released: Sender<IncomingMessage>,
    flush_requested: Arc<AtomicBool>,
    status: Arc<AtomicU8>,

    unsent_unconnected: VecDeque<(SocketAddr, Vec<u8>)>,
    receive_buffer: Vec<u8>,
    last_heartbeat: Option<Instant>,
    last_rebind: Option<Instant>,
    tick_count: u64,
    shutdown_reason: String,
    statistics: LoopStatistics,
}

impl<T: DatagramSocket> NetworkLoop<T> {
    /// Creates the loop around a bound socket. The pool arrives from the
    /// peer so that its cross-thread mailbox stays valid.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: T,
        config: Config,
        local_unique_id: u64,
        pool: MessagePool,
        commands: Receiver<PeerCommand>,
        released: Sender<IncomingMessage>,
        flush_requested: Arc<AtomicBool>,
        status: Arc<AtomicU8>,
    ) -> Self {
        // Sized for the largest possible UDP payload, not our own MTU: the
        // remote's idea of the path MTU may exceed ours.
        let receive_buffer = vec![0u8; 65536];
        Self {
            socket,
            config,
            local_unique_id,
            connections: HashMap::new(),
            handshakes: HashMap::new(),
            pool,
            commands,
            released,
            flush_requested,
            status,
            unsent_unconnected: VecDeque::new(),
            receive_buffer,
            last_heartbeat: None,
            last_rebind: None,
            tick_count: 0,
            shutdown_reason: String::from("Shutting down"),
            statistics: LoopStatistics::default(),
        }
    }

    /// Runs until the status flips to `ShuttingDown`, then performs the
    /// final drain.
    pub fn run(&mut self, clock: &dyn Clock) {
        while PeerStatus::from_u8(self.status.load(Ordering::SeqCst)) != PeerStatus::ShuttingDown
        {
            self.tick(clock.now());
        }
        self.shutdown_drain(clock.now());
        self.status.store(PeerStatus::NotRunning as u8, Ordering::SeqCst);
    }

    /// One loop iteration: a rate-limited heartbeat followed by a socket
    /// drain. Public so tests can drive the loop deterministically.
    pub fn tick(&mut self, now: Instant) {
        let max_cps = 1250usize.saturating_sub(self.connections.len()).max(250);
        let interval = Duration::from_micros((1_000_000 / max_cps) as u64);
        let due = match self.last_heartbeat {
            Some(last) => now.duration_since(last) >= interval,
            None => true,
        };
        if due {
            self.last_heartbeat = Some(now);
            self.heartbeat(now);
        }
        self.read_socket(now);
    }

    /// Number of established connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of handshakes in flight.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.len()
    }

    /// Status of the connection or handshake for `remote`.
    pub fn connection_status(&self, remote: &SocketAddr) -> Option<ConnectionStatus> {
        self.connections
            .get(remote)
            .or_else(|| self.handshakes.get(remote))
            .map(Connection::status)
    }

    /// Loop-level counters.
    pub fn statistics(&self) -> LoopStatistics {
        self.statistics
    }

    /// Local address of the owned socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    // ===== Heartbeat =====

    fn heartbeat(&mut self, now: Instant) {
        self.drain_commands(now);
        self.tick_count += 1;
        let flush =
            self.config.auto_flush_send_queue || self.flush_requested.swap(false, Ordering::SeqCst);

        if self.tick_count % 3 == 0 {
            let keys: Vec<SocketAddr> = self.handshakes.keys().copied().collect();
            for key in keys {
                let actions = match self.handshakes.get_mut(&key) {
                    Some(conn) => conn.heartbeat(now, &mut self.pool, flush),
                    None => continue,
                };
                self.perform(key, actions, now);
                self.sweep(key);
            }
        }

        let keys: Vec<SocketAddr> = self.connections.keys().copied().collect();
        for key in keys {
            let actions = match self.connections.get_mut(&key) {
                Some(conn) => conn.heartbeat(now, &mut self.pool, flush),
                None => continue,
            };
            self.perform(key, actions, now);
            self.sweep(key);
        }

        while let Some((remote, datagram)) = self.unsent_unconnected.pop_front() {
            self.send_datagram(remote, &datagram, now);
        }

        self.pool.reclaim_mailbox();
    }

    fn drain_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command, now);
        }
    }

    fn handle_command(&mut self, command: PeerCommand, now: Instant) {
        match command {
            PeerCommand::Connect { remote, hail } => {
                if self.connections.contains_key(&remote) || self.handshakes.contains_key(&remote)
                {
                    tracing::debug!("connect to {} ignored; already known", remote);
                    return;
                }
                if self.at_capacity() {
                    self.release(IncomingMessage::diagnostic(
                        IncomingKind::ErrorMessage,
                        &format!("cannot connect to {}: connection limit reached", remote),
                        now,
                    ));
                    return;
                }
                let (connection, actions) =
                    Connection::connect(remote, &self.config, self.local_unique_id, hail, now);
                self.handshakes.insert(remote, connection);
                self.perform(remote, actions, now);
            }
            PeerCommand::Send { remote, payload, method, channel, receipt } => {
                let connection = self
                    .connections
                    .get_mut(&remote)
                    .or_else(|| self.handshakes.get_mut(&remote));
                match connection {
                    Some(conn) => {
                        if let Err(err) = conn.enqueue_send(method, channel, payload, receipt) {
                            tracing::warn!("send to {} failed: {}", remote, err);
                        }
                    }
                    None => {
                        tracing::warn!("send to {} dropped; no connection", remote);
                        self.release(IncomingMessage::diagnostic(
                            IncomingKind::WarningMessage,
                            &format!("send to {} dropped; no connection", remote),
                            now,
                        ));
                    }
                }
            }
            PeerCommand::SendUnconnected { remote, payload } => {
                let payload = MessagePayload::from_bytes(payload);
                let datagram = build_unconnected(MessageType::UserUnreliable, &payload);
                self.unsent_unconnected.push_back((remote, datagram));
            }
            PeerCommand::Approve { remote } => {
                if let Some(conn) = self.handshakes.get_mut(&remote) {
                    let actions = conn.approve(now);
                    self.perform(remote, actions, now);
                }
            }
            PeerCommand::Deny { remote, reason } => {
                if let Some(conn) = self.handshakes.get_mut(&remote) {
                    let actions = conn.deny(&reason, now);
                    self.perform(remote, actions, now);
                    self.sweep(remote);
                }
            }
            PeerCommand::Disconnect { remote, reason } => {
                let actions = self
                    .connections
                    .get_mut(&remote)
                    .or_else(|| self.handshakes.get_mut(&remote))
                    .map(|conn| conn.disconnect(&reason, now))
                    .unwrap_or_default();
                self.perform(remote, actions, now);
            }
            PeerCommand::DiscoverLocal { port } => {
                let broadcast = SocketAddr::new(Ipv4Addr::BROADCAST.into(), port);
                let datagram =
                    build_unconnected(MessageType::Discovery, &MessagePayload::from_bytes(vec![]));
                self.unsent_unconnected.push_back((broadcast, datagram));
            }
            PeerCommand::DiscoverKnown { remote } => {
                let datagram =
                    build_unconnected(MessageType::Discovery, &MessagePayload::from_bytes(vec![]));
                self.unsent_unconnected.push_back((remote, datagram));
            }
            PeerCommand::DiscoveryResponse { remote, payload } => {
                let datagram = build_unconnected(
                    MessageType::DiscoveryResponse,
                    &MessagePayload::from_bytes(payload),
                );
                self.unsent_unconnected.push_back((remote, datagram));
            }
            PeerCommand::Introduce {
                host_internal,
                host_external,
                client_internal,
                client_external,
                token,
            } => {
                // Tell the host about the client and the client about the host.
                let to_host = NatIntroductionPayload {
                    internal: client_internal,
                    external: client_external,
                    token: token.clone(),
                };
                let to_client = NatIntroductionPayload {
                    internal: host_internal,
                    external: host_external,
                    token,
                };
                self.unsent_unconnected.push_back((
                    host_external,
                    build_unconnected(MessageType::NatIntroduction, &to_host.encode()),
                ));
                self.unsent_unconnected.push_back((
                    client_external,
                    build_unconnected(MessageType::NatIntroduction, &to_client.encode()),
                ));
            }
            PeerCommand::Shutdown { reason } => {
                self.shutdown_reason = reason;
                self.status.store(PeerStatus::ShuttingDown as u8, Ordering::SeqCst);
            }
        }
    }

    fn at_capacity(&self) -> bool {
        self.connections.len() + self.handshakes.len() >= self.config.maximum_connections
    }

    // ===== Socket reads and routing =====

    fn read_socket(&mut self, now: Instant) {
        for _ in 0..MAX_READS_PER_TICK {
            let received = match self.socket.recv_from(&mut self.receive_buffer) {
                Ok((payload, sender)) => Some((payload.to_vec(), sender)),
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    None
                }
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    // The sender address cannot be trusted to identify which
                    // connection reset, so the datagram is abandoned.
                    tracing::debug!("connection reset on receive; datagram abandoned");
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                    tracing::warn!("socket reports not connected; attempting rebind");
                    self.try_rebind(now);
                    return;
                }
                Err(err) => {
                    tracing::warn!("error receiving datagram: {}", err);
                    return;
                }
            };
            let Some((datagram, sender)) = received else {
                return;
            };
            self.statistics.datagrams_received += 1;
            self.route(sender, datagram, now);
        }
    }

    fn try_rebind(&mut self, now: Instant) {
        let allowed = self
            .last_rebind
            .map(|last| now.duration_since(last) >= Duration::from_secs(1))
            .unwrap_or(true);
        if !allowed {
            return;
        }
        self.last_rebind = Some(now);
        match self.socket.rebind() {
            Ok(()) => tracing::debug!("socket rebound"),
            Err(err) => tracing::warn!("socket rebind failed: {}", err),
        }
    }

    fn route(&mut self, sender: SocketAddr, datagram: Vec<u8>, now: Instant) {
        if self.connections.contains_key(&sender) {
            let actions = self
                .connections
                .get_mut(&sender)
                .map(|conn| conn.process_datagram(&datagram, now, &mut self.pool))
                .unwrap_or_default();
            self.perform(sender, actions, now);
            self.sweep(sender);
            return;
        }
        if self.handshakes.contains_key(&sender) {
            let actions = self
                .handshakes
                .get_mut(&sender)
                .map(|conn| conn.process_datagram(&datagram, now, &mut self.pool))
                .unwrap_or_default();
            self.perform(sender, actions, now);
            self.sweep(sender);
            return;
        }

        let frames = match packet_codec::decode_datagram(&datagram) {
            Ok(frames) => frames,
            Err(err) => {
                self.statistics.protocol_errors += 1;
                tracing::warn!("malformed datagram from unknown sender {}: {}", sender, err);
                return;
            }
        };

        // A ConnectResponse from a known IP on an unexpected port means NAT
        // remapped the responder: rekey the pending handshake first.
        let response_code = MessageType::ConnectResponse.to_u8();
        if frames.iter().any(|f| f.type_code == response_code)
            && self.rekey_handshake(sender, &datagram, now)
        {
            return;
        }

        let connect_code = MessageType::Connect.to_u8();
        if frames.iter().any(|f| f.type_code == connect_code) {
            self.handle_incoming_connect(sender, &datagram, now);
            return;
        }

        for frame in frames {
            self.handle_unconnected_frame(sender, frame, now);
        }
    }

    /// Moves an initiator handshake keyed at the same IP but another port to
    /// `sender`, then processes the datagram on it. Keys are snapshotted
    /// before any mutation.
    fn rekey_handshake(&mut self, sender: SocketAddr, datagram: &[u8], now: Instant) -> bool {
        let keys: Vec<SocketAddr> = self.handshakes.keys().copied().collect();
        for old in keys {
            if old.ip() != sender.ip() {
                continue;
            }
            let initiated = self
                .handshakes
                .get(&old)
                .map(|c| c.status() == ConnectionStatus::InitiatedConnect)
                .unwrap_or(false);
            if !initiated {
                continue;
            }
            let Some(mut connection) = self.handshakes.remove(&old) else {
                continue;
            };
            tracing::debug!("rekeying handshake from {} to {}", old, sender);
            connection.set_remote(sender);
            self.handshakes.insert(sender, connection);
            let actions = self
                .handshakes
                .get_mut(&sender)
                .map(|conn| conn.process_datagram(datagram, now, &mut self.pool))
                .unwrap_or_default();
            self.perform(sender, actions, now);
            self.sweep(sender);
            return true;
        }
        false
    }

    fn handle_incoming_connect(&mut self, sender: SocketAddr, datagram: &[u8], now: Instant) {
        if !self.config.accept_incoming_connections {
            tracing::debug!("rejecting Connect from {}; not accepting connections", sender);
            let datagram = build_disconnect("Connections not accepted");
            self.send_datagram(sender, &datagram, now);
            return;
        }
        if self.at_capacity() {
            tracing::debug!("rejecting Connect from {}; server full", sender);
            let datagram = build_disconnect("Server full");
            self.send_datagram(sender, &datagram, now);
            return;
        }
        let mut connection = Connection::accept(sender, &self.config, self.local_unique_id, now);
        let actions = connection.process_datagram(datagram, now, &mut self.pool);
        self.handshakes.insert(sender, connection);
        self.perform(sender, actions, now);
        self.sweep(sender);
    }

    fn handle_unconnected_frame(&mut self, sender: SocketAddr, frame: Frame, now: Instant) {
        let message_type = match MessageType::try_from(frame.type_code) {
            Ok(mt) => mt,
            Err(err) => {
                self.statistics.protocol_errors += 1;
                tracing::warn!("bad message type from unconnected {}: {}", sender, err);
                return;
            }
        };
        let bit_length = frame.bit_length as usize;
        match message_type {
            MessageType::Discovery => {
                self.release(IncomingMessage {
                    kind: IncomingKind::DiscoveryRequest,
                    delivery: None,
                    data: frame.payload,
                    bit_length,
                    sequence: 0,
                    receive_time: now,
                    sender: Some(sender),
                });
            }
            MessageType::DiscoveryResponse => {
                self.release(IncomingMessage {
                    kind: IncomingKind::DiscoveryResponse,
                    delivery: None,
                    data: frame.payload,
                    bit_length,
                    sequence: 0,
                    receive_time: now,
                    sender: Some(sender),
                });
            }
            MessageType::NatIntroduction => {
                let mut reader = BitBuffer::from_bytes(frame.payload, bit_length);
                match NatIntroductionPayload::read_from(&mut reader) {
                    Ok(intro) => {
                        // Punch a small packet at both views of the endpoint.
                        let mut buffer = BitBuffer::new();
                        buffer.write_string(&intro.token);
                        let punch = MessagePayload::from_bit_buffer(buffer);
                        let datagram =
                            build_unconnected(MessageType::NatPunchMessage, &punch);
                        self.unsent_unconnected.push_back((intro.internal, datagram.clone()));
                        self.unsent_unconnected.push_back((intro.external, datagram));
                    }
                    Err(err) => {
                        self.statistics.protocol_errors += 1;
                        tracing::warn!("bad NAT introduction from {}: {}", sender, err);
                    }
                }
            }
            MessageType::NatPunchMessage => {
                self.release(IncomingMessage {
                    kind: IncomingKind::NatIntroductionSuccess,
                    delivery: None,
                    data: frame.payload,
                    bit_length,
                    sequence: 0,
                    receive_time: now,
                    sender: Some(sender),
                });
            }
            MessageType::UserUnreliable => {
                self.release(IncomingMessage::unconnected(
                    frame.payload,
                    bit_length,
                    sender,
                    now,
                ));
            }
            MessageType::Disconnect => {
                tracing::debug!("Disconnect from unknown sender {}", sender);
            }
            other => {
                tracing::debug!("ignoring {:?} from unconnected sender {}", other, sender);
            }
        }
    }

    // ===== Action dispatch =====

    fn perform(&mut self, remote: SocketAddr, actions: Vec<Action>, now: Instant) {
        for action in actions {
            match action {
                Action::Send(datagram) => self.send_datagram(remote, &datagram, now),
                Action::Release(message) => self.release(message),
            }
        }
    }

    fn send_datagram(&mut self, remote: SocketAddr, datagram: &[u8], now: Instant) {
        match self.socket.send_to(&remote, datagram) {
            Ok(_) => {
                self.statistics.datagrams_sent += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!("connection reset sending to {}", remote);
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                tracing::warn!("socket not connected sending to {}", remote);
                self.try_rebind(now);
            }
            Err(err) => {
                tracing::warn!("error sending to {}: {}", remote, err);
            }
        }
    }

    fn release(&mut self, message: IncomingMessage) {
        if !self.config.enabled_incoming_kinds.contains(message.kind) {
            return;
        }
        match self.released.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("received-message queue is full; dropping message");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Promotes completed handshakes and removes dead connections.
    fn sweep(&mut self, remote: SocketAddr) {
        if let Some(conn) = self.handshakes.get(&remote) {
            match conn.status() {
                ConnectionStatus::Connected => {
                    if let Some(conn) = self.handshakes.remove(&remote) {
                        self.connections.insert(remote, conn);
                    }
                }
                ConnectionStatus::Disconnected => {
                    self.handshakes.remove(&remote);
                }
                _ => {}
            }
        }
        if let Some(conn) = self.connections.get(&remote) {
            if conn.status() == ConnectionStatus::Disconnected {
                self.connections.remove(&remote);
            }
        }
    }

    // ===== Shutdown =====

    /// Final heartbeat: flush queued sends, disconnect every peer, drain the
    /// unconnected queue.
    fn shutdown_drain(&mut self, now: Instant) {
        self.drain_commands(now);
        let reason = self.shutdown_reason.clone();

        let keys: Vec<SocketAddr> = self
            .connections
            .keys()
            .chain(self.handshakes.keys())
            .copied()
            .collect();
        for key in &keys {
            let actions = self
                .connections
                .get_mut(key)
                .or_else(|| self.handshakes.get_mut(key))
                .map(|conn| conn.heartbeat(now, &mut self.pool, true))
                .unwrap_or_default();
            self.perform(*key, actions, now);
        }
        for key in &keys {
            let actions = self
                .connections
                .get_mut(key)
                .or_else(|| self.handshakes.get_mut(key))
                .map(|conn| conn.disconnect(&reason, now))
                .unwrap_or_default();
            self.perform(*key, actions, now);
        }
        while let Some((remote, datagram)) = self.unsent_unconnected.pop_front() {
            self.send_datagram(remote, &datagram, now);
        }
        self.connections.clear();
        self.handshakes.clear();
    }
}

/// Frames a single library message as an unconnected datagram.
fn build_unconnected(message_type: MessageType, payload: &MessagePayload) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.byte_length());
    if let Err(err) = packet_codec::write_frame(
        &mut datagram,
        message_type.to_u8(),
        false,
        0,
        payload.bit_length as u16,
        payload.as_bytes(),
    ) {
        tracing::error!("failed to frame {:?}: {}", message_type, err);
    }
    datagram
}

fn build_disconnect(reason: &str) -> Vec<u8> {
    let payload =
        bitflux_protocol::control::DisconnectPayload { reason: reason.to_owned() }.encode();
    build_unconnected(MessageType::Disconnect, &payload)
}
