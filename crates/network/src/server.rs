//! # Dedicated Server
//!
//! The authority: accepts client connections into a fixed number of slots,
//! assigns player ids, sends the handshake burst to newcomers and relays
//! everything the clients are allowed to do.
//!
//! # Architecture
//!
//! ```text
//! accept task ──► incoming() ──► slot + ServerConnection + Transport
//! ping task   ──► Ping to every client, PingUpdate to everybody
//! update()    ──► handshake bursts, queued packets, queued disconnects
//! ```
//!
//! The accept and ping tasks run on the runtime owned by
//! [`Network`](crate::Network) and only hold a `Weak` reference to the
//! server, so dropping the last `Arc` ends them.
//!
//! # Thread Safety
//!
//! Slots are guarded by a `parking_lot::Mutex` that is never held while
//! sending or while calling into the session. Broadcast helpers work on a
//! snapshot of the occupied slots.

use bytes::Bytes;
use parking_lot::Mutex;
use replica_core::{IdGenerator, Player, PlayerId, ReplicaError, Result, ViewId};
use replica_protocol::{
    framing, PacketRegistry, PingUpdate, PlayerJoined, PlayerLeft, ServerFull, ServerHandshake, ServerMessage,
};
use replica_session::Session;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ExecutionMode, NetworkConfig};
use crate::connection::{ConnectionState, ServerConnection};
use crate::transport::{Transport, TransportIo, TransportOptions};

/// Dedicated authority server
pub struct DedicatedServer {
    config: NetworkConfig,
    pub(crate) session: Arc<dyn Session>,
    pub(crate) view_ids: Arc<IdGenerator<ViewId>>,
    player_ids: IdGenerator<PlayerId>,
    slots: Mutex<Vec<Option<Arc<ServerConnection>>>>,
    local_addr: SocketAddr,
    handle: Handle,
    cancel: CancellationToken,
    stopped: AtomicBool,
    disconnect_tx: mpsc::UnboundedSender<Arc<ServerConnection>>,
    disconnect_rx: Mutex<mpsc::UnboundedReceiver<Arc<ServerConnection>>>,
}

impl DedicatedServer {
    /// Bind the listener and start the accept and ping tasks
    ///
    /// # Arguments
    /// * `handle` - Runtime the socket tasks run on
    /// * `config` - Network configuration
    /// * `session` - Session holding players and views
    /// * `view_ids` - View id allocator shared with the owning `Network`
    /// * `bind_addr` - Address to listen on; port 0 picks a free port
    /// * `slots` - Maximum number of simultaneous clients
    ///
    /// # Errors
    /// Fails if the address cannot be bound.
    pub fn start(
        handle: &Handle,
        config: NetworkConfig,
        session: Arc<dyn Session>,
        view_ids: Arc<IdGenerator<ViewId>>,
        bind_addr: SocketAddr,
        slots: usize,
    ) -> Result<Arc<Self>> {
        if slots == 0 {
            return Err(ReplicaError::Config("a server needs at least one slot".into()));
        }

        let listener = bind_listener(bind_addr)?;
        let listener = {
            let _guard = handle.enter();
            TcpListener::from_std(listener)?
        };
        let local_addr = listener.local_addr()?;

        let server_player = Player::server();
        session.set_local_player(Some(server_player));

        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let server = Arc::new(Self {
            config,
            session,
            view_ids,
            player_ids: IdGenerator::starting_at(1),
            slots: Mutex::new(vec![None; slots]),
            local_addr,
            handle: handle.clone(),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            disconnect_tx,
            disconnect_rx: Mutex::new(disconnect_rx),
        });

        handle.spawn(accept_loop(Arc::downgrade(&server), listener, server.cancel.clone()));
        handle.spawn(ping_loop(
            Arc::downgrade(&server),
            server.config.ping_interval,
            server.cancel.clone(),
        ));

        tracing::info!("Dedicated server listening on {} with {} slots", local_addr, slots);
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of occupied slots
    pub fn connection_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Snapshot of the occupied slots
    pub fn connections(&self) -> Vec<Arc<ServerConnection>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn connection(&self, player_id: PlayerId) -> Option<Arc<ServerConnection>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|conn| conn.player_id() == player_id)
            .cloned()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Put an accepted socket into a free slot, or turn it away with
    /// `ServerFull`
    async fn incoming(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (conn, io) = match self.admit(stream) {
            Admission::Accepted(conn, io) => (conn, io),
            Admission::Full(stream) => {
                self.reject_full(stream, addr).await;
                return;
            }
            Admission::Failed(e) => {
                tracing::error!("Failed to set up connection from {}: {}", addr, e);
                return;
            }
        };

        let payload_server = Arc::downgrade(self);
        let payload_conn = Arc::downgrade(&conn);
        let closed_server = Arc::downgrade(self);
        let closed_conn = Arc::downgrade(&conn);

        conn.transport().start(
            &self.handle,
            io,
            Box::new(move |payload| {
                if let (Some(server), Some(conn)) = (payload_server.upgrade(), payload_conn.upgrade()) {
                    server.on_payload(&conn, payload);
                }
            }),
            Box::new(move || {
                if let (Some(server), Some(conn)) = (closed_server.upgrade(), closed_conn.upgrade()) {
                    server.on_transport_closed(conn);
                }
            }),
        );

        tracing::info!(
            "Player {} connected from {} (slot {})",
            conn.player_id(),
            addr,
            conn.slot()
        );
    }

    fn admit(&self, stream: TcpStream) -> Admission {
        let options = TransportOptions {
            compression: self.config.compression,
            max_frame_size: self.config.max_frame_size,
        };

        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter().position(Option::is_none) else {
            return Admission::Full(stream);
        };

        match Transport::new(&self.handle, stream, options) {
            Ok((transport, io)) => {
                let player_id = self.player_ids.get_available_id();
                let conn = Arc::new(ServerConnection::new(player_id, slot, transport));
                slots[slot] = Some(conn.clone());
                Admission::Accepted(conn, io)
            }
            Err(e) => Admission::Failed(e),
        }
    }

    async fn reject_full(&self, mut stream: TcpStream, addr: SocketAddr) {
        tracing::warn!("Connection from {} rejected: server full", addr);

        let frame = PacketRegistry::encode(ServerMessage::from(ServerFull {
            sender: Player::server(),
        }))
        .and_then(|payload| framing::encode_batch(&[payload], self.config.compression));

        match frame {
            Ok(frame) => {
                if let Err(e) = stream.write_all(&frame).await {
                    tracing::debug!("Failed to notify {}: {}", addr, e);
                }
                let _ = stream.shutdown().await;
            }
            Err(e) => tracing::error!("Failed to encode ServerFull: {}", e),
        }
    }

    fn on_payload(&self, conn: &Arc<ServerConnection>, payload: Bytes) {
        match self.config.execution_mode {
            ExecutionMode::Threaded => self.handle_client_payload(conn, payload),
            ExecutionMode::Queued => conn.inbox.push(payload),
        }
    }

    fn on_transport_closed(&self, conn: Arc<ServerConnection>) {
        conn.mark_disconnected();

        if self.is_stopped() {
            self.release_slot(&conn);
            return;
        }

        match self.config.execution_mode {
            ExecutionMode::Threaded => self.finish_disconnect(&conn),
            ExecutionMode::Queued => {
                let _ = self.disconnect_tx.send(conn);
            }
        }
    }

    fn release_slot(&self, conn: &Arc<ServerConnection>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(conn.slot()) {
            Some(slot) if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Free the slot, announce the departure and destroy the player's views
    pub(crate) fn finish_disconnect(&self, conn: &Arc<ServerConnection>) {
        if !self.release_slot(conn) {
            return;
        }

        let player_id = conn.player_id();
        let player = self
            .session
            .player(player_id)
            .unwrap_or_else(|| Player::new(player_id, ""));
        self.session.set_player(player_id, None);

        if conn.handshake_sent() {
            self.broadcast(PlayerLeft {
                sender: Player::server(),
                player: player.clone(),
            });
        }

        for view in self.session.views() {
            if view.owner() == player_id {
                if let Err(e) = self.destroy_object(&view) {
                    tracing::warn!("Failed to destroy view {} of player {}: {}", view.view_id(), player_id, e);
                }
            }
        }

        tracing::info!("Player {} left", player);
    }

    /// Send handshake bursts, then handle queued packets and disconnects
    pub fn update(&self) -> Result<()> {
        for conn in self.connections() {
            if !conn.handshake_sent() {
                self.send_handshake_burst(&conn);
            }

            if self.config.execution_mode == ExecutionMode::Queued {
                for payload in conn.inbox.drain() {
                    self.handle_client_payload(&conn, payload);
                }
            }
        }

        let disconnected: Vec<_> = {
            let mut rx = self.disconnect_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for conn in disconnected {
            // packets that arrived before the socket closed still count
            for payload in conn.inbox.drain() {
                self.handle_client_payload(&conn, payload);
            }
            self.finish_disconnect(&conn);
        }

        Ok(())
    }

    /// Handshake, known players, live views and buffered RPCs, in one
    /// uninterrupted transaction
    pub(crate) fn send_handshake_burst(&self, conn: &Arc<ServerConnection>) {
        let transport = conn.transport();
        transport.start_transaction();
        if !conn.claim_handshake() {
            transport.stop_transaction();
            return;
        }

        let player_id = conn.player_id();
        let player = match self.session.player(player_id) {
            Some(player) => player,
            None => {
                let player = Player::new(player_id, "");
                self.session.set_player(player_id, Some(player.clone()));
                player
            }
        };

        // A disconnect may have been finished on the receiver task since
        // the snapshot; its cleanup ran before the record above existed.
        if conn.state() == ConnectionState::Disconnected {
            transport.stop_transaction();
            self.session.set_player(player_id, None);
            tracing::debug!("Player {} left before its handshake burst", player_id);
            return;
        }

        let result = self.write_handshake_burst(conn, &player);
        transport.stop_transaction();

        if let Err(e) = result {
            tracing::warn!("Handshake burst to player {} failed: {}", player_id, e);
            return;
        }

        tracing::debug!("Handshake burst sent to player {}", player_id);
        self.broadcast_except(
            PlayerJoined {
                sender: Player::server(),
                player,
            },
            player_id,
        );
    }

    fn write_handshake_burst(&self, conn: &ServerConnection, player: &Player) -> Result<()> {
        let server = Player::server();

        conn.send(ServerHandshake {
            sender: server.clone(),
            player: player.clone(),
        })?;

        for other in self.session.players() {
            if other.id != player.id {
                conn.send(PlayerJoined {
                    sender: server.clone(),
                    player: other,
                })?;
            }
        }

        for view in self.session.views() {
            if !view.is_static() {
                conn.send(self.instantiation_message(view.as_ref()))?;
            }
            self.replay_buffered_rpcs(conn, view.as_ref())?;
        }

        conn.start_ping(&server)
    }

    /// Send `msg` to every client that received its handshake burst
    ///
    /// # Returns
    /// The number of clients the message was queued for
    pub fn broadcast(&self, msg: impl Into<ServerMessage>) -> usize {
        self.broadcast_filtered(msg.into(), |_| true)
    }

    /// Send `msg` to every client except `exclude`
    pub fn broadcast_except(&self, msg: impl Into<ServerMessage>, exclude: PlayerId) -> usize {
        self.broadcast_filtered(msg.into(), |conn| conn.player_id() != exclude)
    }

    fn broadcast_filtered<F>(&self, msg: ServerMessage, filter: F) -> usize
    where
        F: Fn(&ServerConnection) -> bool,
    {
        let name = replica_protocol::PacketSet::name(&msg);
        let payload = match PacketRegistry::encode(msg) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", name, e);
                return 0;
            }
        };

        let mut sent_count = 0;
        for conn in self.connections() {
            if !conn.handshake_sent() || !filter(&conn) {
                continue;
            }
            match conn.send_payload(payload.clone()) {
                Ok(()) => sent_count += 1,
                Err(e) => tracing::debug!("Failed to send {} to player {}: {}", name, conn.player_id(), e),
            }
        }

        tracing::debug!("Broadcast {} to {} clients", name, sent_count);
        sent_count
    }

    /// Send an encoded payload to one client
    ///
    /// # Returns
    /// Whether the client is connected and the payload was queued
    pub(crate) fn send_payload_to(&self, player_id: PlayerId, payload: Bytes) -> bool {
        match self.connection(player_id) {
            Some(conn) if conn.handshake_sent() => conn.send_payload(payload).is_ok(),
            _ => {
                tracing::debug!("Player {} is not connected", player_id);
                false
            }
        }
    }

    pub fn send_to_player(&self, player_id: PlayerId, msg: impl Into<ServerMessage>) -> Result<bool> {
        let payload = PacketRegistry::encode(msg.into())?;
        Ok(self.send_payload_to(player_id, payload))
    }

    /// Ping every client and remember when each ping left
    pub(crate) fn ping_clients(&self) {
        let server = Player::server();
        for conn in self.connections() {
            if conn.handshake_sent() {
                if let Err(e) = conn.start_ping(&server) {
                    tracing::debug!("Failed to ping player {}: {}", conn.player_id(), e);
                }
            }
        }
    }

    /// Send the ping of every player to every client
    pub(crate) fn broadcast_pings(&self) {
        let entries: Vec<_> = self.session.players().into_iter().map(|p| (p.id, p.ping)).collect();
        self.broadcast(PingUpdate::from_entries(Player::server(), entries));
    }

    pub(crate) fn record_pong(&self, conn: &ServerConnection) {
        let Some(ping) = conn.finish_ping() else {
            tracing::debug!("Unsolicited pong from player {}", conn.player_id());
            return;
        };
        if let Some(mut player) = self.session.player(conn.player_id()) {
            player.ping = ping;
            self.session.set_player(player.id, Some(player));
        }
    }

    /// Close the listener and every client connection
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let connections: Vec<_> = self.slots.lock().iter_mut().filter_map(Option::take).collect();
        let count = connections.len();
        for conn in connections {
            conn.close();
        }

        tracing::info!("Dedicated server on {} stopped ({} clients dropped)", self.local_addr, count);
    }

    /// Get server statistics
    ///
    /// # Returns
    /// A snapshot of current server statistics
    pub fn stats(&self) -> ServerStats {
        let connections = self.connections();
        ServerStats {
            slots: self.slot_count(),
            connections: connections.len(),
            total_bytes_sent: connections.iter().map(|c| c.bytes_sent()).sum(),
            total_bytes_received: connections.iter().map(|c| c.bytes_received()).sum(),
        }
    }
}

impl Drop for DedicatedServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Admission {
    Accepted(Arc<ServerConnection>, TransportIo),
    Full(TcpStream),
    Failed(ReplicaError),
}

/// Server statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Configured number of slots
    pub slots: usize,

    /// Current number of connected clients
    pub connections: usize,

    /// Bytes sent to the connected clients
    pub total_bytes_sent: u64,

    /// Bytes received from the connected clients
    pub total_bytes_received: u64,
}

fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

async fn accept_loop(server: Weak<DedicatedServer>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let Some(server) = server.upgrade() else { break };
                tracing::debug!("New connection from {}", addr);
                server.incoming(stream, addr).await;
            }
            Err(e) => tracing::error!("Error accepting connection: {}", e),
        }
    }

    tracing::debug!("Accept loop ended");
}

async fn ping_loop(server: Weak<DedicatedServer>, interval: std::time::Duration, cancel: CancellationToken) {
    loop {
        match server.upgrade() {
            Some(server) => server.ping_clients(),
            None => break,
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match server.upgrade() {
            Some(server) => server.broadcast_pings(),
            None => break,
        }
    }

    tracing::debug!("Ping loop ended");
}
