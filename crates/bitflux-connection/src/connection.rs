//! The per-remote connection.
//!
//! A `Connection` is pure state machine: it never touches a socket. The
//! network loop feeds it received datagrams and periodic heartbeats; it
//! answers with [`Action`]s — datagrams to send and messages to release to
//! the application. All per-connection protocol state lives here: handshake,
//! channels, ack queue, fragment reassembly, RTT estimate and MTU search.

use std::{
    collections::{HashMap, VecDeque},
    convert::TryFrom,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use bitflux_core::{
    bit_buffer::BitBuffer,
    config::Config,
    constants::MESSAGE_HEADER_SIZE,
    error::{ErrorKind, Result},
    incoming::IncomingKind,
    message_pool::MessagePool,
};
use bitflux_protocol::{
    control::{self, AckEntry, DisconnectPayload, HandshakePayload, MtuProbePayload, PingPayload},
    message::{IncomingMessage, MessagePayload, OutgoingMessage},
    message_type::{DeliveryMethod, MessageType},
    packet_codec::{self, DatagramBuilder},
    sequence::SequenceNumber,
    status::ConnectionStatus,
};

use crate::{
    fragment::{FragmentAssembler, Fragmenter},
    mtu::MtuExpansion,
    receive_channel::{
        ReceiveOutcome, ReliableOrderedReceiver, ReliableUnorderedReceiver, SequencedReceiver,
        UnorderedOutcome,
    },
    send_channel::{ReliableSendChannel, SendChannel, SequencedSendChannel, UnreliableSendChannel},
    statistics::ConnectionStatistics,
};

/// EWMA weight for new RTT samples.
const RTT_ALPHA: f64 = 0.25;

/// What the network loop should do on the connection's behalf.
#[derive(Debug)]
pub enum Action {
    /// Send this datagram to the connection's remote endpoint.
    Send(Vec<u8>),
    /// Release this message to the application.
    Release(IncomingMessage),
}

/// A received message waiting in the ordered window.
#[derive(Debug)]
struct PendingData {
    payload: MessagePayload,
    is_fragment: bool,
}

/// Connection to one remote endpoint.
pub struct Connection {
    remote: SocketAddr,
    status: ConnectionStatus,
    config: Config,
    created: Instant,

    builder: DatagramBuilder,
    send_channels: HashMap<(DeliveryMethod, u8), SendChannel>,
    ordered_receivers: HashMap<u8, ReliableOrderedReceiver<PendingData>>,
    sequenced_receivers: HashMap<u8, SequencedReceiver>,
    unordered_receiver: ReliableUnorderedReceiver,
    ack_queue: VecDeque<AckEntry>,

    fragmenter: Fragmenter,
    assembler: FragmentAssembler,
    mtu: MtuExpansion,

    rtt: Duration,
    rtt_initialized: bool,
    last_heard: Instant,
    last_sent: Instant,
    last_ping: Instant,
    last_expire: Instant,

    handshake_attempts: u32,
    next_handshake_resend: Instant,
    local_unique_id: u64,
    remote_unique_id: u64,
    local_hail: Vec<u8>,
    remote_hail: Vec<u8>,
    disconnect_reason: String,

    statistics: ConnectionStatistics,
}

impl Connection {
    fn new(remote: SocketAddr, config: &Config, local_unique_id: u64, now: Instant) -> Self {
        Self {
            remote,
            status: ConnectionStatus::None,
            config: config.clone(),
            created: now,
            builder: DatagramBuilder::new(config.default_mtu as usize),
            send_channels: HashMap::new(),
            ordered_receivers: HashMap::new(),
            sequenced_receivers: HashMap::new(),
            unordered_receiver: ReliableUnorderedReceiver::new(config.window_size),
            ack_queue: VecDeque::new(),
            fragmenter: Fragmenter::new(),
            assembler: FragmentAssembler::new(config.fragment_group_ttl),
            mtu: MtuExpansion::new(config.expand_mtu, config.default_mtu, config.maximum_mtu),
            rtt: Duration::from_millis(100),
            rtt_initialized: false,
            last_heard: now,
            last_sent: now,
            last_ping: now,
            last_expire: now,
            handshake_attempts: 0,
            next_handshake_resend: now,
            local_unique_id,
            remote_unique_id: 0,
            local_hail: Vec::new(),
            remote_hail: Vec::new(),
            disconnect_reason: String::new(),
            statistics: ConnectionStatistics::default(),
        }
    }

    /// Creates an initiating connection and emits the first `Connect`.
    pub fn connect(
        remote: SocketAddr,
        config: &Config,
        local_unique_id: u64,
        hail: Vec<u8>,
        now: Instant,
    ) -> (Self, Vec<Action>) {
        let mut conn = Self::new(remote, config, local_unique_id, now);
        conn.local_hail = hail;
        conn.status = ConnectionStatus::InitiatedConnect;
        conn.handshake_attempts = 1;
        conn.next_handshake_resend = now + config.resend_handshake_interval;

        let mut actions = Vec::new();
        conn.send_handshake(&mut actions, MessageType::Connect);
        conn.finish(&mut actions, now);
        (conn, actions)
    }

    /// Creates an accepting connection; the peer's `Connect` drives it from
    /// there.
    pub fn accept(
        remote: SocketAddr,
        config: &Config,
        local_unique_id: u64,
        now: Instant,
    ) -> Self {
        Self::new(remote, config, local_unique_id, now)
    }

    /// The remote endpoint.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Rekeys the connection to a new endpoint after a NAT port remap.
    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = remote;
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Smoothed round-trip time.
    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// The MTU currently in effect for outgoing datagrams.
    pub fn current_mtu(&self) -> u16 {
        self.mtu.current_mtu()
    }

    /// The remote's 64-bit unique identifier, once the handshake carried it.
    pub fn remote_unique_id(&self) -> u64 {
        self.remote_unique_id
    }

    /// Hail data the remote supplied with its handshake.
    pub fn remote_hail(&self) -> &[u8] {
        &self.remote_hail
    }

    /// Traffic counters.
    pub fn statistics(&self) -> &ConnectionStatistics {
        &self.statistics
    }

    /// Time since the remote was last heard from.
    pub fn time_since_heard(&self, now: Instant) -> Duration {
        now.duration_since(self.last_heard)
    }

    /// Time since this side last put a datagram on the wire.
    pub fn time_since_sent(&self, now: Instant) -> Duration {
        now.duration_since(self.last_sent)
    }

    /// Whether any channel still has messages queued or in flight.
    pub fn has_pending_sends(&self) -> bool {
        self.send_channels.values().any(SendChannel::has_pending)
    }

    // ===== Sending =====

    /// Queues application data. Oversize payloads are fragmented to the
    /// current MTU. `receipt` tags reliable messages for a delivery receipt.
    pub fn enqueue_send(
        &mut self,
        method: DeliveryMethod,
        channel: u8,
        payload: Arc<MessagePayload>,
        receipt: Option<u64>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ErrorKind::InvalidState("connection is closed"));
        }
        if channel >= method.channel_count() {
            return Err(ErrorKind::InvalidState("sequence channel out of range"));
        }
        let mtu = self.mtu.current_mtu() as usize;
        if Fragmenter::needs_split(payload.bit_length, mtu) {
            let chunks = self.fragmenter.split(&payload, mtu, receipt);
            let ch = self.send_channel_mut(method, channel);
            for chunk in chunks {
                ch.enqueue(chunk);
            }
        } else {
            let mut message = OutgoingMessage::new(payload);
            if let Some(tag) = receipt {
                message = message.with_receipt(tag);
            }
            self.send_channel_mut(method, channel).enqueue(message);
        }
        self.statistics.messages_sent += 1;
        Ok(())
    }

    fn send_channel_mut(&mut self, method: DeliveryMethod, channel: u8) -> &mut SendChannel {
        let config = &self.config;
        self.send_channels.entry((method, channel)).or_insert_with(|| match method {
            DeliveryMethod::Unreliable => {
                SendChannel::Unreliable(UnreliableSendChannel::default())
            }
            DeliveryMethod::Sequenced => SendChannel::Sequenced(SequencedSendChannel::default()),
            DeliveryMethod::ReliableUnordered | DeliveryMethod::ReliableOrdered => {
                SendChannel::Reliable(ReliableSendChannel::new(
                    config.window_size,
                    config.resend_base_delay,
                    config.max_retransmits,
                ))
            }
        })
    }

    // ===== Lifecycle driven by the application =====

    /// Approves a connection held in `RespondedAwaitingApproval`.
    pub fn approve(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if matches!(
            self.status,
            ConnectionStatus::ReceivedInitiation | ConnectionStatus::RespondedAwaitingApproval
        ) {
            self.respond_connect(&mut actions, now);
            self.finish(&mut actions, now);
        }
        actions
    }

    /// Denies a pending connection with a reason.
    pub fn deny(&mut self, reason: &str, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        self.send_disconnect_frame(&mut actions, reason);
        self.status = ConnectionStatus::Disconnected;
        self.finish(&mut actions, now);
        actions
    }

    /// Starts a graceful disconnect. The final `Disconnect` leaves
    /// immediately; the status settles on the next heartbeat.
    pub fn disconnect(&mut self, reason: &str, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.status.is_terminal() {
            return actions;
        }
        self.send_disconnect_frame(&mut actions, reason);
        self.disconnect_reason = reason.to_owned();
        self.status = ConnectionStatus::Disconnecting;
        self.finish(&mut actions, now);
        actions
    }

    // ===== Heartbeat =====

    /// One heartbeat: handshake retries, timeouts, keepalive, MTU probing,
    /// ack emission and channel transmissions. `flush` releases fresh sends;
    /// retransmits and control traffic flow regardless.
    pub fn heartbeat(
        &mut self,
        now: Instant,
        pool: &mut MessagePool,
        flush: bool,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        match self.status {
            ConnectionStatus::Disconnected => return actions,
            ConnectionStatus::Disconnecting => {
                self.status = ConnectionStatus::Disconnected;
                let reason = self.disconnect_reason.clone();
                self.release_status(&mut actions, ConnectionStatus::Disconnected, &reason, now);
                self.teardown(pool);
                return actions;
            }
            _ => {}
        }

        if self.status.is_handshaking() && now >= self.next_handshake_resend {
            if self.handshake_attempts >= self.config.maximum_handshake_attempts {
                self.fail(&mut actions, "Failed to establish connection", now, pool);
                return actions;
            }
            match self.status {
                ConnectionStatus::InitiatedConnect => {
                    self.send_handshake(&mut actions, MessageType::Connect);
                    self.handshake_attempts += 1;
                }
                ConnectionStatus::RespondedConnect => {
                    self.send_handshake(&mut actions, MessageType::ConnectResponse);
                    self.handshake_attempts += 1;
                }
                _ => {}
            }
            self.next_handshake_resend = now + self.config.resend_handshake_interval;
        }

        // A channel that has retransmitted the same sequence three times
        // without an ack counts toward the timeout: halve the patience.
        let stalled = self.send_channels.values().any(|ch| match ch {
            SendChannel::Reliable(ch) => ch.is_stalled(),
            _ => false,
        });
        let timeout = if stalled {
            self.config.connection_timeout / 2
        } else {
            self.config.connection_timeout
        };
        if now.duration_since(self.last_heard) >= timeout {
            self.fail(&mut actions, "Connection timed out", now, pool);
            return actions;
        }

        let exhausted = self.send_channels.values().any(|ch| match ch {
            SendChannel::Reliable(ch) => ch.has_failed(),
            _ => false,
        });
        if exhausted {
            self.fail(&mut actions, "Connection timed out (retransmit limit)", now, pool);
            return actions;
        }

        if self.status.is_connected() {
            if now.duration_since(self.last_ping) >= self.config.ping_interval {
                self.last_ping = now;
                let payload = PingPayload { timestamp_ms: self.timestamp_ms(now) }.encode();
                self.push_frame(&mut actions, MessageType::Ping, false, 0, &payload);
            }

            // MTU probes travel as standalone datagrams of exactly the
            // candidate size, so flush whatever is batched first.
            let rtt = self.rtt;
            if let Some(probe) = self.mtu.heartbeat(now, rtt) {
                self.flush_builder(&mut actions);
                let mut datagram = Vec::with_capacity(probe.byte_length() + MESSAGE_HEADER_SIZE);
                if let Err(err) = packet_codec::write_frame(
                    &mut datagram,
                    MessageType::ExpandMtuRequest.to_u8(),
                    false,
                    0,
                    probe.bit_length as u16,
                    probe.as_bytes(),
                ) {
                    tracing::error!("failed to encode MTU probe: {}", err);
                } else {
                    actions.push(Action::Send(datagram));
                }
            }
            if self.mtu.current_mtu() as usize != self.builder.mtu() {
                self.builder.set_mtu(self.mtu.current_mtu() as usize);
            }
        }

        self.flush_acks(&mut actions, pool);

        if self.status.is_connected() {
            let allow_new = flush;
            let rtt = self.rtt;
            let keys: Vec<(DeliveryMethod, u8)> = self.send_channels.keys().copied().collect();
            for key in keys {
                let transmits = self
                    .send_channels
                    .get_mut(&key)
                    .map(|ch| ch.due(now, rtt, allow_new))
                    .unwrap_or_default();
                let message_type = MessageType::for_delivery(key.0, key.1);
                for transmit in transmits {
                    if transmit.is_retransmit {
                        self.statistics.messages_resent += 1;
                    }
                    self.push_frame(
                        &mut actions,
                        message_type,
                        transmit.message.is_fragment,
                        transmit.sequence,
                        transmit.message.payload(),
                    );
                }
            }
        }

        if now.duration_since(self.last_expire) >= Duration::from_secs(1) {
            self.assembler.expire(now);
            self.last_expire = now;
        }

        self.finish(&mut actions, now);
        actions
    }

    // ===== Receiving =====

    /// Parses a datagram and processes every frame in it. A malformed
    /// datagram is rejected whole: nothing in it is delivered.
    pub fn process_datagram(
        &mut self,
        datagram: &[u8],
        now: Instant,
        pool: &mut MessagePool,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.status == ConnectionStatus::Disconnected {
            return actions;
        }
        let frames = match packet_codec::decode_datagram(datagram) {
            Ok(frames) => frames,
            Err(err) => {
                self.statistics.protocol_errors += 1;
                tracing::warn!("rejecting malformed datagram from {}: {}", self.remote, err);
                self.release_warning(&mut actions, &format!("malformed datagram: {}", err), now);
                return actions;
            }
        };
        self.last_heard = now;
        self.statistics.bytes_received += datagram.len() as u64;

        for frame in frames {
            let message_type = match MessageType::try_from(frame.type_code) {
                Ok(mt) => mt,
                Err(err) => {
                    self.statistics.protocol_errors += 1;
                    tracing::warn!(
                        "dropping message with bad type code {} from {}: {}",
                        frame.type_code,
                        self.remote,
                        err
                    );
                    self.release_warning(
                        &mut actions,
                        &format!("bad message type {}", frame.type_code),
                        now,
                    );
                    continue;
                }
            };
            if message_type.is_library() {
                self.process_library(&mut actions, message_type, &frame, now, pool);
            } else {
                self.process_data(&mut actions, message_type, frame, now);
            }
            if self.status == ConnectionStatus::Disconnected {
                break;
            }
        }

        self.finish(&mut actions, now);
        actions
    }

    fn process_library(
        &mut self,
        actions: &mut Vec<Action>,
        message_type: MessageType,
        frame: &bitflux_protocol::packet_codec::Frame,
        now: Instant,
        pool: &mut MessagePool,
    ) {
        let mut reader = BitBuffer::from_bytes(frame.payload.clone(), frame.bit_length as usize);
        let result = match message_type {
            MessageType::Ping => self.on_ping(actions, &mut reader),
            MessageType::Pong => self.on_pong(&mut reader, now),
            MessageType::Acknowledge => self.on_acknowledge(actions, &mut reader, now, pool),
            MessageType::Connect => self.on_connect(actions, &mut reader, now),
            MessageType::ConnectResponse => self.on_connect_response(actions, &mut reader, now),
            MessageType::ConnectionEstablished => self.on_connection_established(actions, now),
            MessageType::Disconnect => self.on_disconnect(actions, &mut reader, now, pool),
            MessageType::ExpandMtuRequest => self.on_expand_mtu_request(actions, &mut reader),
            MessageType::ExpandMtuSuccess => self.on_expand_mtu_success(&mut reader),
            MessageType::LibraryError => {
                Err(ErrorKind::InvalidState("LibraryError received on the wire"))
            }
            // Unconnected types are routed by the loop before they get here.
            _ => {
                tracing::debug!("ignoring {:?} on an established connection", message_type);
                Ok(())
            }
        };
        if let Err(err) = result {
            self.statistics.protocol_errors += 1;
            tracing::warn!("error processing {:?} from {}: {}", message_type, self.remote, err);
        }
    }

    fn on_ping(&mut self, actions: &mut Vec<Action>, reader: &mut BitBuffer) -> Result<()> {
        let ping = PingPayload::read_from(reader)?;
        // Echo the timestamp so the sender can compute its round trip.
        let pong = PingPayload { timestamp_ms: ping.timestamp_ms }.encode();
        self.push_frame(actions, MessageType::Pong, false, 0, &pong);
        Ok(())
    }

    fn on_pong(&mut self, reader: &mut BitBuffer, now: Instant) -> Result<()> {
        let pong = PingPayload::read_from(reader)?;
        let now_ms = self.timestamp_ms(now);
        if let Some(sample_ms) = now_ms.checked_sub(pong.timestamp_ms) {
            self.update_rtt(Duration::from_millis(sample_ms as u64));
        }
        Ok(())
    }

    fn on_acknowledge(
        &mut self,
        actions: &mut Vec<Action>,
        reader: &mut BitBuffer,
        now: Instant,
        pool: &mut MessagePool,
    ) -> Result<()> {
        for entry in control::read_acks(reader)? {
            let message_type = match MessageType::try_from(entry.type_code) {
                Ok(mt) => mt,
                Err(_) => {
                    self.statistics.protocol_errors += 1;
                    continue;
                }
            };
            let Some((method, channel)) = message_type.delivery() else {
                self.statistics.protocol_errors += 1;
                continue;
            };
            if let Some(SendChannel::Reliable(ch)) =
                self.send_channels.get_mut(&(method, channel))
            {
                if let Some(tag) = ch.handle_ack(entry.sequence, pool) {
                    if self.config.enabled_incoming_kinds.contains(IncomingKind::Receipt) {
                        actions.push(Action::Release(IncomingMessage::receipt(
                            tag,
                            self.remote,
                            now,
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn on_connect(
        &mut self,
        actions: &mut Vec<Action>,
        reader: &mut BitBuffer,
        now: Instant,
    ) -> Result<()> {
        let handshake = HandshakePayload::read_from(reader)?;
        if handshake.app_identifier != self.config.app_identifier {
            self.send_disconnect_frame(actions, "Wrong application identifier");
            self.status = ConnectionStatus::Disconnected;
            return Ok(());
        }
        match self.status {
            ConnectionStatus::None => {
                self.status = ConnectionStatus::ReceivedInitiation;
                self.remote_unique_id = handshake.unique_id;
                self.remote_hail = handshake.hail;
                if self
                    .config
                    .enabled_incoming_kinds
                    .contains(IncomingKind::ConnectionApproval)
                {
                    self.status = ConnectionStatus::RespondedAwaitingApproval;
                    let hail = self.remote_hail.clone();
                    let bit_length = hail.len() * 8;
                    actions.push(Action::Release(IncomingMessage {
                        kind: IncomingKind::ConnectionApproval,
                        delivery: None,
                        data: hail,
                        bit_length,
                        sequence: 0,
                        receive_time: now,
                        sender: Some(self.remote),
                    }));
                } else {
                    self.respond_connect(actions, now);
                }
            }
            ConnectionStatus::RespondedConnect => {
                // Our response was lost; repeat it.
                self.send_handshake(actions, MessageType::ConnectResponse);
            }
            _ => {
                tracing::debug!("duplicate Connect from {} in {:?}", self.remote, self.status);
            }
        }
        Ok(())
    }

    fn on_connect_response(
        &mut self,
        actions: &mut Vec<Action>,
        reader: &mut BitBuffer,
        now: Instant,
    ) -> Result<()> {
        let handshake = HandshakePayload::read_from(reader)?;
        match self.status {
            ConnectionStatus::InitiatedConnect => {
                if handshake.app_identifier != self.config.app_identifier {
                    self.send_disconnect_frame(actions, "Wrong application identifier");
                    self.status = ConnectionStatus::Disconnected;
                    return Ok(());
                }
                self.remote_unique_id = handshake.unique_id;
                self.remote_hail = handshake.hail;
                self.send_handshake(actions, MessageType::ConnectionEstablished);
                self.enter_connected(actions, now);
            }
            ConnectionStatus::Connected => {
                // Our ConnectionEstablished was lost; repeat it.
                self.send_handshake(actions, MessageType::ConnectionEstablished);
            }
            _ => {
                tracing::debug!(
                    "unexpected ConnectResponse from {} in {:?}",
                    self.remote,
                    self.status
                );
            }
        }
        Ok(())
    }

    fn on_connection_established(
        &mut self,
        actions: &mut Vec<Action>,
        now: Instant,
    ) -> Result<()> {
        if self.status == ConnectionStatus::RespondedConnect {
            self.enter_connected(actions, now);
        }
        Ok(())
    }

    fn on_disconnect(
        &mut self,
        actions: &mut Vec<Action>,
        reader: &mut BitBuffer,
        now: Instant,
        pool: &mut MessagePool,
    ) -> Result<()> {
        let payload = DisconnectPayload::read_from(reader)?;
        self.status = ConnectionStatus::Disconnected;
        self.release_status(actions, ConnectionStatus::Disconnected, &payload.reason, now);
        self.teardown(pool);
        Ok(())
    }

    fn on_expand_mtu_request(
        &mut self,
        actions: &mut Vec<Action>,
        reader: &mut BitBuffer,
    ) -> Result<()> {
        let probe = MtuProbePayload::read_from(reader)?;
        let reply = MtuExpansion::success_reply(probe.size);
        self.push_frame(actions, MessageType::ExpandMtuSuccess, false, 0, &reply);
        Ok(())
    }

    fn on_expand_mtu_success(&mut self, reader: &mut BitBuffer) -> Result<()> {
        let probe = MtuProbePayload::read_from(reader)?;
        if self.mtu.process_success(probe.size) {
            self.builder.set_mtu(self.mtu.current_mtu() as usize);
        }
        Ok(())
    }

    fn process_data(
        &mut self,
        actions: &mut Vec<Action>,
        message_type: MessageType,
        frame: bitflux_protocol::packet_codec::Frame,
        now: Instant,
    ) {
        let Some((method, channel)) = message_type.delivery() else {
            return;
        };
        if !self.status.is_connected() {
            tracing::debug!("dropping data from {} before the handshake completed", self.remote);
            return;
        }
        // Every non-malformed reliable arrival is acked, duplicates included.
        if message_type.is_reliable() {
            self.ack_queue.push_back(AckEntry {
                type_code: frame.type_code,
                sequence: frame.sequence,
            });
        }

        let payload = MessagePayload {
            data: frame.payload,
            bit_length: frame.bit_length as usize,
        };
        match method {
            DeliveryMethod::Unreliable => {
                self.release_data(actions, method, channel, payload, frame.sequence, frame.is_fragment, now);
            }
            DeliveryMethod::Sequenced => {
                let receiver = self.sequenced_receivers.entry(channel).or_default();
                if receiver.receive(frame.sequence) {
                    self.release_data(actions, method, channel, payload, frame.sequence, frame.is_fragment, now);
                } else {
                    self.statistics.duplicates_dropped += 1;
                }
            }
            DeliveryMethod::ReliableUnordered => match self.unordered_receiver.receive(frame.sequence) {
                UnorderedOutcome::Release => {
                    self.release_data(actions, method, channel, payload, frame.sequence, frame.is_fragment, now);
                }
                UnorderedOutcome::Duplicate => {
                    self.statistics.duplicates_dropped += 1;
                }
                UnorderedOutcome::TooEarly => {
                    self.statistics.too_early_dropped += 1;
                    tracing::warn!(
                        "dropping too-early reliable message {} from {}",
                        frame.sequence,
                        self.remote
                    );
                }
            },
            DeliveryMethod::ReliableOrdered => {
                let window_size = self.config.window_size;
                let receiver = self
                    .ordered_receivers
                    .entry(channel)
                    .or_insert_with(|| ReliableOrderedReceiver::new(window_size));
                let pending = PendingData { payload, is_fragment: frame.is_fragment };
                match receiver.receive(frame.sequence, pending) {
                    ReceiveOutcome::Released(run) => {
                        for (sequence, pending) in run {
                            self.release_data(
                                actions,
                                method,
                                channel,
                                pending.payload,
                                sequence,
                                pending.is_fragment,
                                now,
                            );
                        }
                    }
                    ReceiveOutcome::Duplicate(_) => {
                        self.statistics.duplicates_dropped += 1;
                    }
                    ReceiveOutcome::TooEarly(_) => {
                        self.statistics.too_early_dropped += 1;
                        tracing::warn!(
                            "dropping too-early ordered message {} from {}",
                            frame.sequence,
                            self.remote
                        );
                    }
                    ReceiveOutcome::Withheld(replaced) => {
                        if replaced.is_some() {
                            self.statistics.duplicates_dropped += 1;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn release_data(
        &mut self,
        actions: &mut Vec<Action>,
        method: DeliveryMethod,
        channel: u8,
        payload: MessagePayload,
        sequence: SequenceNumber,
        is_fragment: bool,
        now: Instant,
    ) {
        if is_fragment {
            match self.assembler.insert(payload.as_bytes(), payload.bit_length, now) {
                Ok(Some(assembled)) => {
                    self.release_message(
                        actions,
                        IncomingMessage::data(
                            method,
                            channel,
                            assembled.data,
                            assembled.bit_length,
                            sequence,
                            self.remote,
                            now,
                        ),
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    self.statistics.protocol_errors += 1;
                    tracing::warn!("bad fragment from {}: {}", self.remote, err);
                }
            }
        } else {
            self.release_message(
                actions,
                IncomingMessage::data(
                    method,
                    channel,
                    payload.data,
                    payload.bit_length,
                    sequence,
                    self.remote,
                    now,
                ),
            );
        }
    }

    // ===== Internal helpers =====

    fn release_message(&mut self, actions: &mut Vec<Action>, message: IncomingMessage) {
        if self.config.enabled_incoming_kinds.contains(message.kind) {
            self.statistics.messages_received += 1;
            actions.push(Action::Release(message));
        }
    }

    fn release_status(
        &mut self,
        actions: &mut Vec<Action>,
        status: ConnectionStatus,
        reason: &str,
        now: Instant,
    ) {
        let message = IncomingMessage::status_changed(status, reason, self.remote, now);
        if self.config.enabled_incoming_kinds.contains(IncomingKind::StatusChanged) {
            actions.push(Action::Release(message));
        }
    }

    fn release_warning(&mut self, actions: &mut Vec<Action>, text: &str, now: Instant) {
        if self.config.enabled_incoming_kinds.contains(IncomingKind::WarningMessage) {
            actions.push(Action::Release(IncomingMessage::diagnostic(
                IncomingKind::WarningMessage,
                text,
                now,
            )));
        }
    }

    fn enter_connected(&mut self, actions: &mut Vec<Action>, now: Instant) {
        self.status = ConnectionStatus::Connected;
        self.last_ping = now;
        self.handshake_attempts = 0;
        self.release_status(actions, ConnectionStatus::Connected, "Connected", now);
    }

    fn respond_connect(&mut self, actions: &mut Vec<Action>, now: Instant) {
        self.status = ConnectionStatus::RespondedConnect;
        self.handshake_attempts = 1;
        self.next_handshake_resend = now + self.config.resend_handshake_interval;
        self.send_handshake(actions, MessageType::ConnectResponse);
    }

    fn send_handshake(&mut self, actions: &mut Vec<Action>, message_type: MessageType) {
        let payload = HandshakePayload {
            app_identifier: self.config.app_identifier.clone(),
            unique_id: self.local_unique_id,
            hail: self.local_hail.clone(),
        }
        .encode();
        let payload = match message_type {
            // ConnectionEstablished carries no handshake body.
            MessageType::ConnectionEstablished => MessagePayload::from_bytes(Vec::new()),
            _ => payload,
        };
        self.push_frame(actions, message_type, false, 0, &payload);
    }

    fn send_disconnect_frame(&mut self, actions: &mut Vec<Action>, reason: &str) {
        let payload = DisconnectPayload { reason: reason.to_owned() }.encode();
        self.push_frame(actions, MessageType::Disconnect, false, 0, &payload);
        self.flush_builder(actions);
    }

    fn fail(
        &mut self,
        actions: &mut Vec<Action>,
        reason: &str,
        now: Instant,
        pool: &mut MessagePool,
    ) {
        tracing::debug!("connection to {} failed: {}", self.remote, reason);
        self.status = ConnectionStatus::Disconnected;
        self.release_status(actions, ConnectionStatus::Disconnected, reason, now);
        self.teardown(pool);
    }

    fn teardown(&mut self, pool: &mut MessagePool) {
        for channel in self.send_channels.values_mut() {
            if let SendChannel::Reliable(ch) = channel {
                ch.clear(pool);
            }
        }
        self.ack_queue.clear();
    }

    fn flush_acks(&mut self, actions: &mut Vec<Action>, pool: &mut MessagePool) {
        while !self.ack_queue.is_empty() {
            let max_entries = (self.builder.mtu() - MESSAGE_HEADER_SIZE) / 3;
            let count = self.ack_queue.len().min(max_entries);
            let mut buffer = BitBuffer::from_pooled(pool.rent(count * 3));
            let entries: Vec<AckEntry> = self.ack_queue.drain(..count).collect();
            control::write_acks(&mut buffer, &entries);
            let payload = MessagePayload::from_bit_buffer(buffer);
            self.push_frame(actions, MessageType::Acknowledge, false, 0, &payload);
            pool.recycle(payload.data);
        }
    }

    fn push_frame(
        &mut self,
        actions: &mut Vec<Action>,
        message_type: MessageType,
        is_fragment: bool,
        sequence: SequenceNumber,
        payload: &MessagePayload,
    ) {
        if !self.builder.fits(payload.byte_length()) {
            self.flush_builder(actions);
        }
        if let Err(err) = self.builder.push(
            message_type.to_u8(),
            is_fragment,
            sequence,
            payload.bit_length as u16,
            payload.as_bytes(),
        ) {
            tracing::error!("failed to frame {:?}: {}", message_type, err);
        }
    }

    fn flush_builder(&mut self, actions: &mut Vec<Action>) {
        if !self.builder.is_empty() {
            actions.push(Action::Send(self.builder.take()));
        }
    }

    /// Flushes the builder and updates send-side bookkeeping. Every public
    /// entry point ends with this.
    fn finish(&mut self, actions: &mut Vec<Action>, now: Instant) {
        self.flush_builder(actions);
        let sent: u64 = actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(d) => Some(d.len() as u64),
                _ => None,
            })
            .sum();
        if sent > 0 {
            self.statistics.bytes_sent += sent;
            self.last_sent = now;
        }
    }

    fn timestamp_ms(&self, now: Instant) -> u32 {
        now.duration_since(self.created).as_millis() as u32
    }

    fn update_rtt(&mut self, sample: Duration) {
        if self.rtt_initialized {
            let mixed = self.rtt.as_secs_f64() * (1.0 - RTT_ALPHA)
                + sample.as_secs_f64() * RTT_ALPHA;
            self.rtt = Duration::from_secs_f64(mixed);
        } else {
            self.rtt = sample;
            self.rtt_initialized = true;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.remote, self.status)
    }
}
