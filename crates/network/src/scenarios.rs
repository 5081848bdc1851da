//! End-to-end sessions over loopback: one dedicated server and one or more
//! clients, each with its own `Network` and `BasicSession`.

use crate::{ExecutionMode, Network, NetworkConfig};
use bytes::Bytes;
use replica_core::{Player, PlayerId, ReplicaError, ViewId};
use replica_protocol::framing::{self, FRAME_HEADER_LEN};
use replica_protocol::{
    BinaryStream, CompressionType, DeletionRequest, PacketRegistry, PacketSet, RpcArg, RpcTargets, ServerMessage,
    ViewUpdate,
};
use replica_session::{BasicSession, BasicView, Session, View};
use std::collections::VecDeque;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Peer {
    network: Network,
    session: Arc<BasicSession>,
}

impl Peer {
    fn new(config: NetworkConfig) -> Self {
        let session = Arc::new(BasicSession::new());
        let network = Network::new(config, session.clone()).unwrap();
        Self { network, session }
    }

    fn id(&self) -> PlayerId {
        self.network.local_player().unwrap().id
    }

    fn view(&self, view_id: ViewId) -> Option<Arc<BasicView>> {
        self.session.basic_view(view_id)
    }
}

fn config() -> NetworkConfig {
    NetworkConfig {
        handshake_timeout: Duration::from_secs(3),
        ping_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn start_server(config: NetworkConfig, slots: usize) -> (Peer, SocketAddr) {
    let server = Peer::new(config);
    let addr = server
        .network
        .start_dedicated("127.0.0.1:0".parse().unwrap(), slots)
        .unwrap();
    (server, addr)
}

/// Connect while another thread keeps the server updating, so the
/// handshake burst goes out
fn try_connect(server: &Peer, config: NetworkConfig, addr: SocketAddr, name: &str) -> (Peer, replica_core::Result<()>) {
    let client = Peer::new(config);
    let done = AtomicBool::new(false);

    let result = std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let _ = server.network.update();
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let result = client.network.connect(addr, name);
        done.store(true, Ordering::SeqCst);
        result
    });

    (client, result)
}

fn connect(server: &Peer, addr: SocketAddr, name: &str) -> Peer {
    let (client, result) = try_connect(server, config(), addr, name);
    result.unwrap();
    client
}

/// Pump every peer until `condition` holds
fn settle(peers: &[&Peer], condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        for peer in peers {
            let _ = peer.network.update();
        }
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Pump every peer for a fixed time
fn pump(peers: &[&Peer], duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        for peer in peers {
            let _ = peer.network.update();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn state(bytes: &[u8]) -> Vec<u8> {
    let mut stream = BinaryStream::writer();
    stream.write_bytes(bytes).unwrap();
    stream.get_bytes().to_vec()
}

/// Socket that never handshakes and reads server messages off the wire
struct RawClient {
    stream: TcpStream,
    pending: VecDeque<ServerMessage>,
}

impl RawClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            stream,
            pending: VecDeque::new(),
        }
    }

    fn next(&mut self) -> ServerMessage {
        while self.pending.is_empty() {
            let mut header = [0u8; FRAME_HEADER_LEN];
            self.stream.read_exact(&mut header).unwrap();
            let mut body = vec![0u8; framing::frame_len(header)];
            self.stream.read_exact(&mut body).unwrap();
            for payload in framing::decode_batch(&body, CompressionType::None, 1 << 20).unwrap() {
                self.pending.push_back(PacketRegistry::decode(payload).unwrap());
            }
        }
        self.pending.pop_front().unwrap()
    }
}

/// Queue `payload` on a client's socket as is
fn send_raw(peer: &Peer, payload: &'static [u8]) {
    peer.network
        .client()
        .unwrap()
        .transport()
        .send_raw(Bytes::from_static(payload))
        .unwrap();
}

/// Pings only when the test asks for them
fn manual_ping_config() -> NetworkConfig {
    NetworkConfig {
        ping_interval: Duration::from_secs(3600),
        ..config()
    }
}

fn spawn(server: &Peer, object_name: &str, initial: &[u8], owner: Option<PlayerId>) -> ViewId {
    server
        .network
        .instantiate_object(object_name, &state(initial), owner)
        .unwrap()
        .unwrap()
        .view_id()
}

#[test]
fn test_offline_network_rejects_calls() {
    let peer = Peer::new(config());
    assert!(matches!(peer.network.update(), Err(ReplicaError::NotInitialized(_))));
    assert!(matches!(
        peer.network.instantiate_object("Crate", &[], None),
        Err(ReplicaError::NotInitialized(_))
    ));
    assert!(!peer.network.is_connected());
    assert!(!peer.network.is_authority());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = NetworkConfig {
        worker_threads: 0,
        ..config()
    };
    assert!(matches!(
        Network::new(config, Arc::new(BasicSession::new())),
        Err(ReplicaError::Config(_))
    ));
}

#[test]
fn test_handshake_and_full_frames() {
    let (server, addr) = start_server(config(), 4);
    assert!(server.network.is_authority());
    assert_eq!(server.id(), PlayerId::SERVER);

    let crate_id = spawn(&server, "Crate", &[1, 2, 3], None);

    let alice = connect(&server, addr, "alice");
    assert!(alice.network.is_handshaked());
    let alice_id = alice.id();
    assert_eq!(alice_id, PlayerId::new(1));
    assert_eq!(alice.network.local_player().unwrap().name, "alice");

    // the burst carries the authority and the existing view
    assert!(settle(&[&server, &alice], || alice.view(crate_id).is_some()));
    assert!(alice.network.find_player(PlayerId::SERVER).is_some());
    let remote = alice.view(crate_id).unwrap();
    assert_eq!(remote.state(), vec![1, 2, 3]);
    assert_eq!(remote.owner(), PlayerId::SERVER);

    // the client handshake renames the player on the authority
    assert!(settle(&[&server, &alice], || {
        server.network.find_player(alice_id).map(|p| p.name) == Some("alice".to_string())
    }));

    server.view(crate_id).unwrap().set_state(vec![9, 9]);
    server.network.update_frame().unwrap();
    assert!(settle(&[&server, &alice], || remote.state() == vec![9, 9]));

    // a client without views still sends an (empty) partial frame
    alice.network.update_frame().unwrap();

    let stats = server.network.stats().unwrap();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.slots, 4);
    assert!(server.network.bytes_sent() > 0);
    assert!(alice.network.bytes_received() > 0);
}

#[test]
fn test_handshake_burst_order_on_the_wire() {
    let (server, addr) = start_server(manual_ping_config(), 4);
    let crate_id = spawn(&server, "Crate", &[1, 2, 3, 4], None);
    let server_crate: Arc<dyn View> = server.view(crate_id).unwrap();
    server
        .network
        .rpc(&server_crate, RpcTargets::All, "paint", &[RpcArg::Int(7)], true)
        .unwrap();

    let mut raw = RawClient::connect(addr);
    assert!(settle(&[&server], || server.network.server().unwrap().connections().iter().any(|c| c.handshake_sent())));

    let burst: Vec<ServerMessage> = (0..5).map(|_| raw.next()).collect();
    let ids: Vec<u8> = burst.iter().map(|m| m.packet_id()).collect();
    assert_eq!(ids, vec![0, 2, 1, 7, 10]);

    match &burst[0] {
        ServerMessage::Handshake(m) => assert_eq!(m.player.id, PlayerId::new(1)),
        other => panic!("unexpected {}", other.name()),
    }
    match &burst[1] {
        ServerMessage::PlayerJoined(m) => assert_eq!(m.player.id, PlayerId::SERVER),
        other => panic!("unexpected {}", other.name()),
    }
    match &burst[2] {
        ServerMessage::Instantiation(m) => {
            assert_eq!(m.view_id, crate_id);
            assert_eq!(m.owner_id, PlayerId::SERVER);
            assert_eq!(m.object_name, "Crate");
            assert_eq!(m.initial_state, vec![4, 0, 0, 0, 1, 2, 3, 4]);
        }
        other => panic!("unexpected {}", other.name()),
    }
    match &burst[3] {
        ServerMessage::Rpc(m) => {
            assert_eq!(m.view_id, crate_id);
            assert_eq!(m.method, "paint");
            assert_eq!(m.args, vec![RpcArg::Int(7)]);
        }
        other => panic!("unexpected {}", other.name()),
    }

    // the next frame carries the untouched state
    server.network.update_frame().unwrap();
    match raw.next() {
        ServerMessage::FrameUpdate(m) => {
            assert_eq!(m.updates, vec![ViewUpdate::new(crate_id, vec![4, 0, 0, 0, 1, 2, 3, 4])]);
        }
        other => panic!("unexpected {}", other.name()),
    }
}

#[test]
fn test_burst_after_disconnect_leaves_no_player() {
    let threaded = NetworkConfig {
        execution_mode: ExecutionMode::Threaded,
        ..config()
    };
    let (server, addr) = start_server(threaded, 4);
    let authority = server.network.server().unwrap();

    let raw = TcpStream::connect(addr).unwrap();
    assert!(settle(&[], || authority.connection_count() == 1));
    let conn = authority.connections().remove(0);

    // the receiver task finishes the disconnect before any update ran
    drop(raw);
    assert!(settle(&[], || authority.connection_count() == 0));

    authority.send_handshake_burst(&conn);
    assert!(server.network.find_player(conn.player_id()).is_none());
    assert_eq!(server.network.players(), vec![Player::server()]);
}

#[test]
fn test_ping_cycle_reaches_every_client() {
    let (server, addr) = start_server(manual_ping_config(), 4);
    let (alice, result) = try_connect(&server, manual_ping_config(), addr, "alice");
    result.unwrap();
    let (bob, result) = try_connect(&server, manual_ping_config(), addr, "bob");
    result.unwrap();
    let alice_id = alice.id();
    assert!(settle(&[&server, &alice, &bob], || bob.network.find_player(alice_id).is_some()));
    // let the pongs for the handshake pings land
    pump(&[&server, &alice, &bob], Duration::from_millis(100));

    let authority = server.network.server().unwrap();
    authority.ping_clients();

    // alice answers late
    pump(&[&server, &bob], Duration::from_millis(40));
    assert!(settle(&[&server, &alice, &bob], || {
        server.network.find_player(alice_id).is_some_and(|p| p.ping >= 40)
    }));
    let alice_ping = server.network.find_player(alice_id).unwrap().ping;

    authority.broadcast_pings();
    assert!(settle(&[&server, &alice, &bob], || {
        alice.network.find_player(alice_id).map(|p| p.ping) == Some(alice_ping)
            && bob.network.find_player(alice_id).map(|p| p.ping) == Some(alice_ping)
    }));
    assert_eq!(alice.network.local_player().unwrap().ping, alice_ping);
}

#[test]
fn test_unknown_packet_closes_connection_but_malformed_is_dropped() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let (alice_id, bob_id) = (alice.id(), bob.id());
    assert!(settle(&[&server, &alice, &bob], || {
        bob.network.find_player(alice_id).map(|p| p.name) == Some("alice".to_string())
            && server.network.find_player(bob_id).map(|p| p.name) == Some("bob".to_string())
    }));

    // truncated DeletionRequest: dropped
    send_raw(&bob, &[2, 1]);
    // id outside the table: connection closed
    send_raw(&alice, &[42]);

    assert!(settle(&[&server, &alice, &bob], || {
        server.network.find_player(alice_id).is_none() && bob.network.find_player(alice_id).is_none()
    }));
    assert!(settle(&[&alice], || !alice.network.is_connected()));
    assert_eq!(server.network.stats().unwrap().connections, 1);
    assert!(server.network.server().unwrap().connection(bob_id).is_some());
    assert!(bob.network.is_handshaked());

    // bob's connection still carries traffic both ways
    let bell = spawn(&server, "Bell", &[], None);
    assert!(settle(&[&server, &bob], || bob.view(bell).is_some()));
    let bob_bell: Arc<dyn View> = bob.view(bell).unwrap();
    bob.network.rpc(&bob_bell, RpcTargets::Others, "ring", &[], false).unwrap();
    assert!(settle(&[&server, &bob], || server.view(bell).unwrap().rpc_count("ring", bob_id) == 1));
}

#[test]
fn test_players_see_each_other() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let (alice_id, bob_id) = (alice.id(), bob.id());
    assert_ne!(alice_id, bob_id);

    assert!(settle(&[&server, &alice, &bob], || {
        alice.network.find_player(bob_id).map(|p| p.name) == Some("bob".to_string())
            && bob.network.find_player(alice_id).map(|p| p.name) == Some("alice".to_string())
    }));

    let ids: Vec<_> = bob.network.players().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![PlayerId::SERVER, alice_id, bob_id]);
}

#[test]
fn test_client_instantiation_and_partial_frames() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let alice_id = alice.id();

    assert_eq!(alice.network.instantiate_object("Ship", &state(&[5]), None).unwrap().map(|v| v.view_id()), None);

    let find_ship = |peer: &Peer| {
        peer.session
            .views()
            .into_iter()
            .find(|view| view.object_name() == "Ship")
            .map(|view| view.view_id())
    };
    assert!(settle(&[&server, &alice, &bob], || {
        find_ship(&server).is_some() && find_ship(&alice).is_some() && find_ship(&bob).is_some()
    }));
    let ship = find_ship(&server).unwrap();
    assert_eq!(server.view(ship).unwrap().owner(), alice_id);
    assert_eq!(alice.view(ship).unwrap().owner(), alice_id);

    // the owner's partial frame reaches the authority, whose full frame
    // relays it to bob but not back to alice
    alice.view(ship).unwrap().set_state(vec![6]);
    alice.network.update_frame().unwrap();
    assert!(settle(&[&server, &alice, &bob], || server.view(ship).unwrap().state() == vec![6]));

    alice.view(ship).unwrap().set_state(vec![7]);
    server.network.update_frame().unwrap();
    assert!(settle(&[&server, &alice, &bob], || bob.view(ship).unwrap().state() == vec![6]));
    pump(&[&server, &alice, &bob], Duration::from_millis(50));
    assert_eq!(alice.view(ship).unwrap().state(), vec![7]);

    // bob's frames never touch a view he does not own
    bob.view(ship).unwrap().set_state(vec![0]);
    bob.network.update_frame().unwrap();
    pump(&[&server, &alice, &bob], Duration::from_millis(100));
    assert_eq!(server.view(ship).unwrap().state(), vec![6]);
}

#[test]
fn test_ownership_transfer_and_rejection() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let alice_id = alice.id();

    let door = spawn(&server, "Door", &[], None);
    let vault = spawn(&server, "Vault", &[], None);
    server.view(vault).unwrap().set_accept_ownership(false);

    assert!(settle(&[&server, &alice], || alice.view(door).is_some() && alice.view(vault).is_some()));

    let remote_door: Arc<dyn View> = alice.view(door).unwrap();
    alice.network.request_view_ownership(&remote_door, None).unwrap();
    assert!(settle(&[&server, &alice], || {
        server.view(door).unwrap().owner() == alice_id && remote_door.owner() == alice_id
    }));

    let remote_vault: Arc<dyn View> = alice.view(vault).unwrap();
    alice.network.request_view_ownership(&remote_vault, None).unwrap();
    assert!(settle(&[&server, &alice], || alice.view(vault).unwrap().rejection_count() == 1));
    assert_eq!(server.view(vault).unwrap().owner(), PlayerId::SERVER);
    assert_eq!(remote_vault.owner(), PlayerId::SERVER);

    // the authority takes the door back
    let server_door: Arc<dyn View> = server.view(door).unwrap();
    server.network.request_view_ownership(&server_door, None).unwrap();
    assert!(settle(&[&server, &alice], || remote_door.owner() == PlayerId::SERVER));
}

#[test]
fn test_buffered_rpcs_replay_to_late_joiners() {
    let (server, addr) = start_server(config(), 4);
    let lamp = spawn(&server, "Lamp", &[], None);
    let server_lamp: Arc<dyn View> = server.view(lamp).unwrap();

    server
        .network
        .rpc(&server_lamp, RpcTargets::All, "turn_on", &[RpcArg::Int(3)], true)
        .unwrap();
    assert_eq!(server.view(lamp).unwrap().rpc_count("turn_on", PlayerId::SERVER), 1);

    let alice = connect(&server, addr, "alice");
    assert!(settle(&[&server, &alice], || {
        alice.view(lamp).map(|v| v.rpc_count("turn_on", PlayerId::SERVER)) == Some(1)
    }));
    let received = alice.view(lamp).unwrap().received_rpcs();
    assert_eq!(received[0].args, vec![RpcArg::Int(3)]);

    server.network.clear_rpc_buffer(&server_lamp).unwrap();
    let bob = connect(&server, addr, "bob");
    assert!(settle(&[&server, &bob], || bob.view(lamp).is_some()));
    pump(&[&server, &bob], Duration::from_millis(100));
    assert_eq!(bob.view(lamp).unwrap().received_rpcs().len(), 0);
}

#[test]
fn test_rpc_targets_execute_once_per_peer() {
    let (server, addr) = start_server(config(), 4);
    let totem = spawn(&server, "Totem", &[], None);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let (alice_id, bob_id) = (alice.id(), bob.id());
    assert!(settle(&[&server, &alice, &bob], || alice.view(totem).is_some() && bob.view(totem).is_some()));

    let alice_totem: Arc<dyn View> = alice.view(totem).unwrap();
    let count = |peer: &Peer, method: &str| peer.view(totem).unwrap().rpc_count(method, alice_id);

    // Others: everybody but the sender
    alice.network.rpc(&alice_totem, RpcTargets::Others, "wave", &[], false).unwrap();
    assert!(settle(&[&server, &alice, &bob], || count(&server, "wave") == 1 && count(&bob, "wave") == 1));

    // All: the sender runs it right away
    alice.network.rpc(&alice_totem, RpcTargets::All, "cheer", &[], false).unwrap();
    assert_eq!(count(&alice, "cheer"), 1);
    assert!(settle(&[&server, &alice, &bob], || count(&server, "cheer") == 1 && count(&bob, "cheer") == 1));

    // explicit players
    let bob_player = alice.network.find_player(bob_id).unwrap();
    alice
        .network
        .rpc_to_players(&alice_totem, &[bob_player, Player::server()], "nudge", &[RpcArg::from("hi")])
        .unwrap();
    assert!(settle(&[&server, &alice, &bob], || count(&server, "nudge") == 1 && count(&bob, "nudge") == 1));

    pump(&[&server, &alice, &bob], Duration::from_millis(100));
    assert_eq!(count(&alice, "wave"), 0);
    assert_eq!(count(&alice, "cheer"), 1);
    assert_eq!(count(&alice, "nudge"), 0);
    assert_eq!(count(&server, "wave"), 1);
    assert_eq!(count(&bob, "cheer"), 1);

    // Others from the authority skips the authority
    let server_totem: Arc<dyn View> = server.view(totem).unwrap();
    server.network.rpc(&server_totem, RpcTargets::Others, "tick", &[], false).unwrap();
    assert!(settle(&[&server, &alice, &bob], || {
        alice.view(totem).unwrap().rpc_count("tick", PlayerId::SERVER) == 1
            && bob.view(totem).unwrap().rpc_count("tick", PlayerId::SERVER) == 1
    }));
    assert_eq!(server.view(totem).unwrap().rpc_count("tick", PlayerId::SERVER), 0);
}

#[test]
fn test_deletion_requires_ownership() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let alice_id = alice.id();

    alice.network.instantiate_object("Box", &state(&[1]), None).unwrap();
    let find_box = |peer: &Peer| {
        peer.session
            .views()
            .into_iter()
            .find(|view| view.owner() == alice_id)
            .map(|view| view.view_id())
    };
    assert!(settle(&[&server, &alice, &bob], || {
        find_box(&server).is_some() && find_box(&alice).is_some() && find_box(&bob).is_some()
    }));
    let box_id = find_box(&server).unwrap();

    let bob_box: Arc<dyn View> = bob.view(box_id).unwrap();
    assert!(matches!(bob.network.destroy_object(&bob_box), Err(ReplicaError::NotAllowed(_))));
    assert!(matches!(bob.network.clear_rpc_buffer(&bob_box), Err(ReplicaError::NotAllowed(_))));

    // a forged request from a non-owner is dropped by the authority
    bob.network
        .client()
        .unwrap()
        .send(DeletionRequest { view_id: box_id })
        .unwrap();
    pump(&[&server, &alice, &bob], Duration::from_millis(100));
    assert!(server.network.find_view(box_id).is_some());

    let server_box = server.view(box_id).unwrap();
    let alice_box: Arc<dyn View> = alice.view(box_id).unwrap();
    alice.network.destroy_object(&alice_box).unwrap();
    assert!(settle(&[&server, &alice, &bob], || {
        server.network.find_view(box_id).is_none()
            && alice.network.find_view(box_id).is_none()
            && bob.network.find_view(box_id).is_none()
    }));
    assert!(server_box.is_destroyed());
}

#[test]
fn test_server_full_fails_connect() {
    let (server, addr) = start_server(config(), 1);
    let _alice = connect(&server, addr, "alice");

    let (bob, result) = try_connect(&server, config(), addr, "bob");
    assert!(matches!(result, Err(ReplicaError::ConnectionFailed { .. })));
    assert!(!bob.network.is_connected());
    assert_eq!(server.network.stats().unwrap().connections, 1);
}

#[test]
fn test_disconnect_cleans_up_players_and_views() {
    let (server, addr) = start_server(config(), 4);
    let alice = connect(&server, addr, "alice");
    let bob = connect(&server, addr, "bob");
    let alice_id = alice.id();

    let kite = spawn(&server, "Kite", &[], Some(alice_id));
    assert!(settle(&[&server, &alice, &bob], || bob.view(kite).is_some()));

    alice.network.disconnect();
    assert!(!alice.network.is_connected());

    assert!(settle(&[&server, &bob], || {
        server.network.find_player(alice_id).is_none()
            && server.network.find_view(kite).is_none()
            && bob.network.find_player(alice_id).is_none()
            && bob.network.find_view(kite).is_none()
    }));
    assert_eq!(server.network.stats().unwrap().connections, 1);

    // losing the authority is observable, not an error
    server.network.stop();
    assert!(settle(&[&bob], || !bob.network.is_connected()));
    assert!(bob.network.update_frame().is_ok());
}

#[test]
fn test_static_views_replicate_without_announcement() {
    let (server, addr) = start_server(config(), 4);
    let server_board = Arc::new(BasicView::new_static("Scoreboard", PlayerId::SERVER));
    let board = server.network.register_static_view(server_board.clone());

    let alice = connect(&server, addr, "alice");
    let alice_board = Arc::new(BasicView::new_static("Scoreboard", PlayerId::SERVER));
    assert_eq!(alice.network.register_static_view(alice_board.clone()), board);

    server_board.set_state(vec![4, 2]);
    server.network.update_frame().unwrap();
    assert!(settle(&[&server, &alice], || alice_board.state() == vec![4, 2]));
}

#[test]
fn test_threaded_execution_mode() {
    let threaded = NetworkConfig {
        execution_mode: ExecutionMode::Threaded,
        ..config()
    };
    let (server, addr) = start_server(threaded.clone(), 4);
    let (alice, result) = try_connect(&server, threaded, addr, "alice");
    result.unwrap();

    let flag = spawn(&server, "Flag", &[8], None);
    assert!(settle(&[&server, &alice], || alice.view(flag).map(|v| v.state()) == Some(vec![8])));

    let alice_flag: Arc<dyn View> = alice.view(flag).unwrap();
    alice.network.rpc(&alice_flag, RpcTargets::Others, "raise", &[], false).unwrap();
    let alice_id = alice.id();
    assert!(settle(&[&server, &alice], || server.view(flag).unwrap().rpc_count("raise", alice_id) == 1));
}
