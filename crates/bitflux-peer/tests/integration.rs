//! Integration tests.
//!
//! Most scenarios drive two `NetworkLoop`s deterministically over an
//! in-memory datagram network, so loss, reordering and NAT port remapping
//! can be staged exactly. A few end-to-end tests run real `Peer`s over
//! loopback UDP.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU8},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use bitflux_core::{
    config::Config,
    incoming::{IncomingKind, IncomingKindSet},
    message_pool::MessagePool,
    transport::DatagramSocket,
};
use bitflux_peer::{NetworkLoop, Peer, PeerCommand, PeerStatus};
use bitflux_protocol::{
    message::{IncomingMessage, MessagePayload},
    message_type::DeliveryMethod,
    status::ConnectionStatus,
};

// ============================================================================
// In-memory datagram network
// ============================================================================

#[derive(Default)]
struct NetworkInner {
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    /// Datagrams still to be dropped, per sender address.
    loss: HashMap<SocketAddr, usize>,
}

/// A fake network: every socket shares the inbox table.
#[derive(Clone, Default)]
struct Network {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Network {
    fn socket(&self, addr: &str) -> MemorySocket {
        let addr: SocketAddr = addr.parse().unwrap();
        self.inner.lock().unwrap().inboxes.entry(addr).or_default();
        MemorySocket { addr, network: self.clone() }
    }

    /// Drops the next `count` datagrams sent from `addr`.
    fn lose_from(&self, addr: SocketAddr, count: usize) {
        self.inner.lock().unwrap().loss.insert(addr, count);
    }

    /// Rewrites the sender of every queued datagram in `inbox` from
    /// `old_from` to `new_from`. Simulates a NAT port remap.
    fn rewrite_sender(&self, inbox: SocketAddr, old_from: SocketAddr, new_from: SocketAddr) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.inboxes.get_mut(&inbox) {
            for entry in queue.iter_mut() {
                if entry.0 == old_from {
                    entry.0 = new_from;
                }
            }
        }
    }
}

struct MemorySocket {
    addr: SocketAddr,
    network: Network,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        let mut inner = self.network.inner.lock().unwrap();
        if let Some(remaining) = inner.loss.get_mut(&self.addr) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(payload.len());
            }
        }
        inner
            .inboxes
            .entry(*addr)
            .or_default()
            .push_back((self.addr, payload.to_vec()));
        Ok(payload.len())
    }

    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        let mut inner = self.network.inner.lock().unwrap();
        match inner.inboxes.get_mut(&self.addr).and_then(VecDeque::pop_front) {
            Some((from, datagram)) => {
                let len = datagram.len().min(buffer.len());
                buffer[..len].copy_from_slice(&datagram[..len]);
                Ok((&buffer[..len], from))
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn rebind(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct TestLoop {
    inner: NetworkLoop<MemorySocket>,
    commands: Sender<PeerCommand>,
    released: Receiver<IncomingMessage>,
    addr: SocketAddr,
}

impl TestLoop {
    fn new(network: &Network, addr: &str, config: Config) -> Self {
        let socket = network.socket(addr);
        let addr = socket.addr;
        let (command_tx, command_rx) = unbounded();
        let (released_tx, released_rx) = bounded(config.received_queue_capacity);
        let inner = NetworkLoop::new(
            socket,
            config,
            addr.port() as u64, // distinct, deterministic ids
            MessagePool::new(),
            command_rx,
            released_tx,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicU8::new(PeerStatus::Running as u8)),
        );
        Self { inner, commands: command_tx, released: released_rx, addr }
    }

    fn drain(&self) -> Vec<IncomingMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.released.try_recv() {
            out.push(message);
        }
        out
    }

    fn drain_kind(&self, kind: IncomingKind) -> Vec<IncomingMessage> {
        self.drain().into_iter().filter(|m| m.kind == kind).collect()
    }
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.app_identifier = "integration".into();
    config.accept_incoming_connections = true;
    config
}

/// Ticks every loop `rounds` times, advancing the clock 5 ms per round.
fn run_rounds(loops: &mut [&mut TestLoop], start: Instant, rounds: u32) -> Instant {
    let mut now = start;
    for _ in 0..rounds {
        now += Duration::from_millis(5);
        for l in loops.iter_mut() {
            l.inner.tick(now);
        }
    }
    now
}

fn connect(client: &mut TestLoop, server: &mut TestLoop, start: Instant) -> Instant {
    client
        .commands
        .send(PeerCommand::Connect { remote: server.addr, hail: vec![] })
        .unwrap();
    let now = run_rounds(&mut [client, server], start, 6);
    assert_eq!(client.inner.connection_status(&server.addr), Some(ConnectionStatus::Connected));
    assert_eq!(server.inner.connection_status(&client.addr), Some(ConnectionStatus::Connected));
    now
}

fn payloads(messages: &[IncomingMessage]) -> Vec<Vec<u8>> {
    messages.iter().map(|m| m.payload_bytes().to_vec()).collect()
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn handshake_establishes_and_surfaces_one_status_change() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());

    connect(&mut client, &mut server, Instant::now());
    assert_eq!(client.inner.connection_count(), 1);
    assert_eq!(client.inner.handshake_count(), 0);
    assert_eq!(server.inner.connection_count(), 1);

    let client_status = client.drain_kind(IncomingKind::StatusChanged);
    assert_eq!(client_status.len(), 1);
    let (status, _) = client_status[0].read_status_changed().unwrap();
    assert_eq!(status, ConnectionStatus::Connected);

    assert_eq!(server.drain_kind(IncomingKind::StatusChanged).len(), 1);
}

#[test]
fn reliable_ordered_messages_arrive_in_send_order() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let now = connect(&mut client, &mut server, Instant::now());
    server.drain();

    for text in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()] {
        client
            .commands
            .send(PeerCommand::Send {
                remote: server.addr,
                payload: Arc::new(MessagePayload::from_bytes(text)),
                method: DeliveryMethod::ReliableOrdered,
                channel: 0,
                receipt: None,
            })
            .unwrap();
    }
    run_rounds(&mut [&mut client, &mut server], now, 4);

    let data = server.drain_kind(IncomingKind::Data);
    assert_eq!(
        payloads(&data),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
    );
}

#[test]
fn lost_datagrams_are_retransmitted_until_delivered() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let now = connect(&mut client, &mut server, Instant::now());
    server.drain();

    // Swallow the client's next two datagrams (first transmission).
    network.lose_from(client.addr, 2);
    client
        .commands
        .send(PeerCommand::Send {
            remote: server.addr,
            payload: Arc::new(MessagePayload::from_bytes(b"persistent".to_vec())),
            method: DeliveryMethod::ReliableOrdered,
            channel: 0,
            receipt: None,
        })
        .unwrap();

    // Run long enough for the doubling resend delay to fire twice.
    run_rounds(&mut [&mut client, &mut server], now, 250);

    let data = server.drain_kind(IncomingKind::Data);
    assert_eq!(payloads(&data), vec![b"persistent".to_vec()]);
}

#[test]
fn port_remap_rekeys_the_handshake_and_connects() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "203.0.113.5:7000", base_config());
    let remapped: SocketAddr = "203.0.113.5:40000".parse().unwrap();

    client
        .commands
        .send(PeerCommand::Connect { remote: server.addr, hail: vec![] })
        .unwrap();

    // Client sends Connect; server answers from its own port.
    let mut now = Instant::now();
    now = run_rounds(&mut [&mut client], now, 2);
    now = run_rounds(&mut [&mut server], now, 2);

    // A NAT in the middle rewrites the responder's source port.
    network.rewrite_sender(client.addr, server.addr, remapped);
    run_rounds(&mut [&mut client], now, 2);

    // The handshake was rekeyed to the new endpoint and completed.
    assert_eq!(client.inner.connection_status(&server.addr), None);
    assert_eq!(client.inner.connection_status(&remapped), Some(ConnectionStatus::Connected));
    assert_eq!(client.drain_kind(IncomingKind::StatusChanged).len(), 1);
}

#[test]
fn server_full_rejects_with_reason_and_adds_no_handshake() {
    let network = Network::default();
    let mut config = base_config();
    config.maximum_connections = 2;
    let mut server = TestLoop::new(&network, "10.0.0.9:7000", config);
    let mut first = TestLoop::new(&network, "10.0.0.1:6001", base_config());
    let mut second = TestLoop::new(&network, "10.0.0.2:6002", base_config());
    let mut third = TestLoop::new(&network, "10.0.0.3:6003", base_config());

    let now = connect(&mut first, &mut server, Instant::now());
    let now = connect(&mut second, &mut server, now);
    assert_eq!(server.inner.connection_count(), 2);

    third
        .commands
        .send(PeerCommand::Connect { remote: server.addr, hail: vec![] })
        .unwrap();
    run_rounds(&mut [&mut third, &mut server], now, 6);

    assert_eq!(server.inner.connection_count(), 2);
    assert_eq!(server.inner.handshake_count(), 0);

    let status = third.drain_kind(IncomingKind::StatusChanged);
    assert_eq!(status.len(), 1);
    let (new_status, reason) = status[0].read_status_changed().unwrap();
    assert_eq!(new_status, ConnectionStatus::Disconnected);
    assert_eq!(reason, "Server full");
}

#[test]
fn graceful_disconnect_reaches_the_other_side() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let now = connect(&mut client, &mut server, Instant::now());
    client.drain();
    server.drain();

    client
        .commands
        .send(PeerCommand::Disconnect { remote: server.addr, reason: "done here".into() })
        .unwrap();
    run_rounds(&mut [&mut client, &mut server], now, 6);

    assert_eq!(client.inner.connection_count(), 0);
    assert_eq!(server.inner.connection_count(), 0);

    let status = server.drain_kind(IncomingKind::StatusChanged);
    assert_eq!(status.len(), 1);
    let (_, reason) = status[0].read_status_changed().unwrap();
    assert_eq!(reason, "done here");
}

#[test]
fn connection_approval_gates_inbound_connects() {
    let network = Network::default();
    let mut config = base_config();
    config.enabled_incoming_kinds.enable(IncomingKind::ConnectionApproval);
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", config);
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());

    client
        .commands
        .send(PeerCommand::Connect { remote: server.addr, hail: b"knock".to_vec() })
        .unwrap();
    let now = run_rounds(&mut [&mut client, &mut server], Instant::now(), 4);

    let approvals = server.drain_kind(IncomingKind::ConnectionApproval);
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].payload_bytes(), b"knock");
    assert_eq!(
        server.inner.connection_status(&client.addr),
        Some(ConnectionStatus::RespondedAwaitingApproval)
    );

    server.commands.send(PeerCommand::Approve { remote: client.addr }).unwrap();
    run_rounds(&mut [&mut client, &mut server], now, 6);
    assert_eq!(server.inner.connection_status(&client.addr), Some(ConnectionStatus::Connected));
    assert_eq!(client.inner.connection_status(&server.addr), Some(ConnectionStatus::Connected));
}

// ============================================================================
// Fragmentation and receipts
// ============================================================================

#[test]
fn large_message_fragments_and_reassembles_across_the_loop() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let now = connect(&mut client, &mut server, Instant::now());
    server.drain();

    let original: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
    client
        .commands
        .send(PeerCommand::Send {
            remote: server.addr,
            payload: Arc::new(MessagePayload::from_bytes(original.clone())),
            method: DeliveryMethod::ReliableOrdered,
            channel: 0,
            receipt: None,
        })
        .unwrap();
    run_rounds(&mut [&mut client, &mut server], now, 10);

    let data = server.drain_kind(IncomingKind::Data);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].bit_length, 20_000 * 8);
    assert_eq!(data[0].payload_bytes(), original.as_slice());
}

#[test]
fn receipt_comes_back_after_the_remote_acks() {
    let network = Network::default();
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", base_config());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let now = connect(&mut client, &mut server, Instant::now());
    client.drain();

    client
        .commands
        .send(PeerCommand::Send {
            remote: server.addr,
            payload: Arc::new(MessagePayload::from_bytes(b"tagged".to_vec())),
            method: DeliveryMethod::ReliableOrdered,
            channel: 0,
            receipt: Some(4242),
        })
        .unwrap();
    run_rounds(&mut [&mut client, &mut server], now, 8);

    let receipts = client.drain_kind(IncomingKind::Receipt);
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].read_receipt().unwrap(), 4242);
}

// ============================================================================
// Unconnected messaging, discovery, NAT introduction
// ============================================================================

#[test]
fn unconnected_data_is_released_when_enabled() {
    let network = Network::default();
    let mut receiver_config = base_config();
    receiver_config.enabled_incoming_kinds.enable(IncomingKind::UnconnectedData);
    let mut receiver = TestLoop::new(&network, "10.0.0.2:7000", receiver_config);
    let mut sender = TestLoop::new(&network, "10.0.0.1:6000", base_config());

    sender
        .commands
        .send(PeerCommand::SendUnconnected {
            remote: receiver.addr,
            payload: b"hello out there".to_vec(),
        })
        .unwrap();
    run_rounds(&mut [&mut sender, &mut receiver], Instant::now(), 3);

    let messages = receiver.drain_kind(IncomingKind::UnconnectedData);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload_bytes(), b"hello out there");
    assert_eq!(messages[0].sender, Some(sender.addr));
}

#[test]
fn unconnected_data_is_discarded_when_disabled() {
    let network = Network::default();
    let mut receiver = TestLoop::new(&network, "10.0.0.2:7000", base_config());
    let mut sender = TestLoop::new(&network, "10.0.0.1:6000", base_config());

    sender
        .commands
        .send(PeerCommand::SendUnconnected { remote: receiver.addr, payload: b"psst".to_vec() })
        .unwrap();
    run_rounds(&mut [&mut sender, &mut receiver], Instant::now(), 3);
    assert!(receiver.drain().is_empty());
}

#[test]
fn discovery_request_and_response_round_trip() {
    let network = Network::default();
    let mut server_config = base_config();
    server_config.enabled_incoming_kinds.enable(IncomingKind::DiscoveryRequest);
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", server_config);
    let mut client_config = base_config();
    client_config.enabled_incoming_kinds.enable(IncomingKind::DiscoveryResponse);
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", client_config);

    client.commands.send(PeerCommand::DiscoverKnown { remote: server.addr }).unwrap();
    let now = run_rounds(&mut [&mut client, &mut server], Instant::now(), 3);

    let requests = server.drain_kind(IncomingKind::DiscoveryRequest);
    assert_eq!(requests.len(), 1);
    let requester = requests[0].sender.unwrap();
    assert_eq!(requester, client.addr);

    server
        .commands
        .send(PeerCommand::DiscoveryResponse {
            remote: requester,
            payload: b"game lobby 3".to_vec(),
        })
        .unwrap();
    run_rounds(&mut [&mut client, &mut server], now, 3);

    let responses = client.drain_kind(IncomingKind::DiscoveryResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload_bytes(), b"game lobby 3");
}

#[test]
fn nat_introduction_punches_both_sides() {
    let network = Network::default();
    let mut kinds = base_config();
    kinds.enabled_incoming_kinds.enable(IncomingKind::NatIntroductionSuccess);
    let mut master = TestLoop::new(&network, "10.0.0.9:9000", base_config());
    let mut host = TestLoop::new(&network, "10.0.0.2:7000", kinds.clone());
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", kinds);

    master
        .commands
        .send(PeerCommand::Introduce {
            host_internal: host.addr,
            host_external: host.addr,
            client_internal: client.addr,
            client_external: client.addr,
            token: "meet".into(),
        })
        .unwrap();
    run_rounds(&mut [&mut master, &mut host, &mut client], Instant::now(), 4);

    let host_success = host.drain_kind(IncomingKind::NatIntroductionSuccess);
    let client_success = client.drain_kind(IncomingKind::NatIntroductionSuccess);
    assert!(!host_success.is_empty());
    assert!(!client_success.is_empty());
    assert_eq!(host_success[0].sender, Some(client.addr));
    assert_eq!(client_success[0].sender, Some(host.addr));
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn silent_remote_times_out_with_a_status_change() {
    let network = Network::default();
    let mut config = base_config();
    config.connection_timeout = Duration::from_millis(200);
    let mut client = TestLoop::new(&network, "10.0.0.1:6000", config.clone());
    let mut server = TestLoop::new(&network, "10.0.0.2:7000", config);
    let now = connect(&mut client, &mut server, Instant::now());
    client.drain();

    // Server goes silent; only the client keeps ticking.
    run_rounds(&mut [&mut client], now, 80);

    assert_eq!(client.inner.connection_count(), 0);
    let status = client.drain_kind(IncomingKind::StatusChanged);
    assert_eq!(status.len(), 1);
    let (new_status, reason) = status[0].read_status_changed().unwrap();
    assert_eq!(new_status, ConnectionStatus::Disconnected);
    assert!(reason.contains("timed out"));
}

// ============================================================================
// End-to-end over real loopback UDP
// ============================================================================

fn loopback_peer_config() -> Config {
    let mut config = Config::default();
    config.local_address = "127.0.0.1".parse().unwrap();
    config.app_identifier = "e2e".into();
    config.accept_incoming_connections = true;
    config.enabled_incoming_kinds = IncomingKindSet::default();
    config
}

fn wait_for_kind(peer: &Peer, kind: IncomingKind, budget: Duration) -> Option<IncomingMessage> {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if let Some(message) = peer.recv_timeout(Duration::from_millis(50)) {
            if message.kind == kind {
                return Some(message);
            }
        }
    }
    None
}

#[test]
fn peers_connect_and_exchange_data_over_loopback() {
    let mut server = Peer::start(loopback_peer_config()).unwrap();
    let mut client = Peer::start(loopback_peer_config()).unwrap();

    let server_addr = client.connect(server.local_addr(), vec![]).unwrap();
    let connected = wait_for_kind(&client, IncomingKind::StatusChanged, Duration::from_secs(5))
        .expect("client should connect");
    let (status, _) = connected.read_status_changed().unwrap();
    assert_eq!(status, ConnectionStatus::Connected);

    client
        .send_to(server_addr, b"over real udp".to_vec(), DeliveryMethod::ReliableOrdered, 0)
        .unwrap();
    let data = wait_for_kind(&server, IncomingKind::Data, Duration::from_secs(5))
        .expect("server should receive data");
    assert_eq!(data.payload_bytes(), b"over real udp");

    client.shutdown("client done");
    server.shutdown("server done");
}

#[test]
fn shutdown_drains_queued_messages_and_notifies_the_remote() {
    let mut server = Peer::start(loopback_peer_config()).unwrap();
    let mut client = Peer::start(loopback_peer_config()).unwrap();

    let server_addr = client.connect(server.local_addr(), vec![]).unwrap();
    wait_for_kind(&client, IncomingKind::StatusChanged, Duration::from_secs(5))
        .expect("client should connect");

    for text in [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()] {
        client.send_to(server_addr, text, DeliveryMethod::ReliableOrdered, 0).unwrap();
    }
    client.shutdown("all sent");
    assert_eq!(client.status(), PeerStatus::NotRunning);

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut disconnected = false;
    while Instant::now() < deadline && !(seen.len() == 3 && disconnected) {
        if let Some(message) = server.recv_timeout(Duration::from_millis(50)) {
            match message.kind {
                IncomingKind::Data => seen.push(message.payload_bytes().to_vec()),
                IncomingKind::StatusChanged => {
                    let (status, reason) = message.read_status_changed().unwrap();
                    if status == ConnectionStatus::Disconnected {
                        assert_eq!(reason, "all sent");
                        disconnected = true;
                    }
                }
                _ => {}
            }
        }
    }
    assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    assert!(disconnected, "server should observe the disconnect");
}
