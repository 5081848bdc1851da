//! # Client Connection
//!
//! A peer connected to a dedicated server.
//!
//! # Handshake
//!
//! ```text
//! connect ──► transaction opened ──► wait for ServerHandshake
//!         ◄── ServerHandshake(player) ── burst of joins, views, RPCs
//!         ──► ClientHandshake(name), transaction closed
//! ```
//!
//! Nothing the client queues leaves the socket before its own handshake:
//! the transaction opened at connect time holds it back until the server
//! handshake was processed.
//!
//! # Thread Safety
//!
//! `connect` blocks the calling thread, so it must not be called from
//! inside an async context.

use bytes::Bytes;
use parking_lot::Mutex;
use replica_core::{Player, PlayerId, ReplicaError, Result};
use replica_protocol::{
    ClientMessage, DeletionRequest, InstantiationRequest, OwnershipRequest, PacketRegistry, PartialFrameUpdate,
    RpcArg, RpcClear, RpcExecution, RpcRecipients, RpcTargets,
};
use replica_session::{Session, View};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::config::{ExecutionMode, NetworkConfig};
use crate::connection::{ConnectionState, Inbox};
use crate::replication;
use crate::rpc;
use crate::transport::{Transport, TransportOptions};

/// Client side of a connection to the authority
pub struct ClientConnection {
    config: NetworkConfig,
    pub(crate) session: Arc<dyn Session>,
    player_name: String,
    server_addr: SocketAddr,
    transport: Transport,
    state: Mutex<ConnectionState>,
    /// Set when the server turned the connection away
    pub(crate) server_full: AtomicBool,
    inbox: Inbox,
}

impl ClientConnection {
    /// Connect and block until the handshake completed
    ///
    /// # Arguments
    /// * `handle` - Runtime the socket tasks run on
    /// * `config` - Network configuration
    /// * `session` - Session receiving players and views
    /// * `addr` - Server address
    /// * `player_name` - Name announced to the other players
    ///
    /// # Errors
    /// `ConnectionFailed` if the socket cannot be opened, the server is
    /// full, or no handshake arrives within `handshake_timeout`.
    pub fn connect(
        handle: &Handle,
        config: NetworkConfig,
        session: Arc<dyn Session>,
        addr: SocketAddr,
        player_name: &str,
    ) -> Result<Arc<Self>> {
        let failed = |reason: String| ReplicaError::ConnectionFailed { addr, reason };

        tracing::info!("Connecting to {} as {}", addr, player_name);
        let stream = handle
            .block_on(async { tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await })
            .map_err(|_| failed("connect timed out".into()))?
            .map_err(|e| failed(e.to_string()))?;

        let options = TransportOptions {
            compression: config.compression,
            max_frame_size: config.max_frame_size,
        };
        let (transport, io) = Transport::new(handle, stream, options)?;
        transport.start_transaction();

        let conn = Arc::new(Self {
            config,
            session,
            player_name: player_name.to_owned(),
            server_addr: addr,
            transport,
            state: Mutex::new(ConnectionState::Handshaking),
            server_full: AtomicBool::new(false),
            inbox: Inbox::new(),
        });

        let payload_conn = Arc::downgrade(&conn);
        let closed_conn = Arc::downgrade(&conn);
        conn.transport.start(
            handle,
            io,
            Box::new(move |payload| {
                if let Some(conn) = payload_conn.upgrade() {
                    conn.on_payload(payload);
                }
            }),
            Box::new(move || {
                if let Some(conn) = closed_conn.upgrade() {
                    conn.on_transport_closed();
                }
            }),
        );

        let deadline = Instant::now() + conn.config.handshake_timeout;
        loop {
            conn.update();
            match conn.state() {
                ConnectionState::Handshaked => {
                    tracing::info!("Connected to {}", addr);
                    return Ok(conn);
                }
                ConnectionState::Disconnected => break,
                _ => {}
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(conn.config.handshake_poll_interval);
        }

        conn.close();
        let reason = if conn.server_full.load(Ordering::SeqCst) {
            "server full"
        } else if conn.state() == ConnectionState::Disconnected {
            "connection closed during handshake"
        } else {
            "handshake timed out"
        };
        tracing::warn!("Connection to {} failed: {}", addr, reason);
        Err(failed(reason.into()))
    }

    fn on_payload(&self, payload: Bytes) {
        match self.config.execution_mode {
            ExecutionMode::Threaded => self.handle_server_payload(payload),
            ExecutionMode::Queued => self.inbox.push(payload),
        }
    }

    fn on_transport_closed(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            tracing::info!("Disconnected from {}", self.server_addr);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub fn is_handshaked(&self) -> bool {
        self.state() == ConnectionState::Handshaked
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn bytes_sent(&self) -> u64 {
        self.transport.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.transport.bytes_received()
    }

    /// Handle queued packets (queued execution mode)
    pub fn update(&self) {
        for payload in self.inbox.drain() {
            self.handle_server_payload(payload);
        }
    }

    pub fn send(&self, msg: impl Into<ClientMessage>) -> Result<()> {
        let payload = PacketRegistry::encode(msg.into())?;
        self.transport.send_raw(payload)
    }

    fn local_player(&self) -> Result<Player> {
        self.session
            .local_player()
            .ok_or_else(|| ReplicaError::NotInitialized("handshake not completed".into()))
    }

    fn require_owner(&self, view: &dyn View, action: &str) -> Result<()> {
        let local = self.local_player()?;
        if view.owner() != local.id {
            return Err(ReplicaError::NotAllowed(format!(
                "{} view {} owned by {}",
                action,
                view.view_id(),
                view.owner()
            )));
        }
        Ok(())
    }

    /// Ask the authority to spawn an object owned by this client
    pub fn request_instantiate(&self, object_name: &str, initial_state: &[u8]) -> Result<()> {
        self.send(InstantiationRequest {
            object_name: object_name.to_owned(),
            initial_state: initial_state.to_vec(),
        })
    }

    pub fn request_destroy(&self, view: &dyn View) -> Result<()> {
        self.require_owner(view, "cannot destroy")?;
        self.send(DeletionRequest {
            view_id: view.view_id(),
        })
    }

    pub fn request_ownership(&self, view: &dyn View) -> Result<()> {
        if view.owner() == self.local_player()?.id {
            return Ok(());
        }
        self.send(OwnershipRequest {
            view_id: view.view_id(),
        })
    }

    pub fn clear_rpc_buffer(&self, view: &dyn View) -> Result<()> {
        self.require_owner(view, "cannot clear the RPC buffer of")?;
        self.send(RpcClear {
            view_id: view.view_id(),
        })
    }

    /// Send an RPC to explicit players, running it locally if this client
    /// is one of them
    pub fn rpc_to_players(&self, view: &dyn View, targets: &[Player], method: &str, args: &[RpcArg]) -> Result<()> {
        let local = self.local_player()?;
        self.send(RpcExecution {
            view_id: view.view_id(),
            method: method.to_owned(),
            buffered: false,
            recipients: RpcRecipients::Players(targets.to_vec()),
            args: args.to_vec(),
        })?;

        if rpc::includes_player(targets, local.id) {
            view.rpc_received(method, args, &local);
        }
        Ok(())
    }

    /// Send a symbolic RPC through the authority
    pub fn rpc(&self, view: &dyn View, targets: RpcTargets, method: &str, args: &[RpcArg], buffered: bool) -> Result<()> {
        let local = self.local_player()?;
        self.send(RpcExecution {
            view_id: view.view_id(),
            method: method.to_owned(),
            buffered,
            recipients: RpcRecipients::Symbolic(targets),
            args: args.to_vec(),
        })?;

        if rpc::sender_executes(targets) {
            view.rpc_received(method, args, &local);
        }
        Ok(())
    }

    /// Send the state of every view this client owns
    pub fn send_partial_frame(&self) -> Result<()> {
        if !self.is_handshaked() {
            return Ok(());
        }
        let local = self.local_player()?.id;
        let captured = replication::capture_views(&self.session.views(), |view| view.owner() == local);

        self.send(PartialFrameUpdate {
            updates: captured.into_iter().map(|view| view.update).collect(),
        })
    }

    pub fn local_player_id(&self) -> Option<PlayerId> {
        self.session.local_player().map(|player| player.id)
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.transport.close();
    }
}
