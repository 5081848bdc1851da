//! # Network
//!
//! Entry point of the library. A `Network` is offline until it either
//! starts a dedicated server (becoming the authority) or connects to one.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────┐
//!  game thread ───►  │ Network                  │
//!                    │  role: Offline           │
//!                    │        Authority(server) │
//!                    │        Client(connection)│
//!                    │  runtime (socket tasks)  │
//!                    └──────────────────────────┘
//! ```
//!
//! Every operation dispatches on the current role: the authority acts
//! directly, a client sends a request and lets the authority decide.
//!
//! # Thread Safety
//!
//! The public API is synchronous and may be called from any thread that
//! is not itself running inside an async runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_network::{Network, NetworkConfig};
//! use replica_session::BasicSession;
//! use std::sync::Arc;
//!
//! let network = Network::new(NetworkConfig::default(), Arc::new(BasicSession::new())).unwrap();
//! let addr = network.start_dedicated("127.0.0.1:0".parse().unwrap(), 8).unwrap();
//! println!("listening on {}", addr);
//!
//! loop {
//!     network.update_frame().unwrap();
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! ```

use parking_lot::RwLock;
use replica_core::{IdGenerator, Player, PlayerId, ReplicaError, Result, ViewId};
use replica_protocol::{FrameUpdate, RpcArg, RpcTargets};
use replica_session::{Session, View};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::client::ClientConnection;
use crate::config::NetworkConfig;
use crate::replication;
use crate::server::{DedicatedServer, ServerStats};

#[derive(Clone)]
enum Role {
    Offline,
    Authority(Arc<DedicatedServer>),
    Client(Arc<ClientConnection>),
}

/// Replication endpoint, authority or client
pub struct Network {
    config: NetworkConfig,
    session: Arc<dyn Session>,
    view_ids: Arc<IdGenerator<ViewId>>,
    role: RwLock<Role>,
    runtime: Option<Runtime>,
}

impl Network {
    /// Create an offline network bound to `session`
    ///
    /// # Errors
    /// `Config` if the configuration is invalid or the runtime cannot be
    /// built.
    pub fn new(config: NetworkConfig, session: Arc<dyn Session>) -> Result<Self> {
        config.validate().map_err(ReplicaError::Config)?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("replica-io")
            .enable_all()
            .build()
            .map_err(|e| ReplicaError::Config(format!("failed to build runtime: {}", e)))?;

        Ok(Self {
            config,
            session,
            view_ids: Arc::new(IdGenerator::starting_at(1)),
            role: RwLock::new(Role::Offline),
            runtime: Some(runtime),
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    fn role(&self) -> Role {
        self.role.read().clone()
    }

    fn handle(&self) -> Result<&tokio::runtime::Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| ReplicaError::NotInitialized("runtime is shut down".into()))
    }

    fn ensure_offline(&self) -> Result<()> {
        match self.role() {
            Role::Offline => Ok(()),
            _ => Err(ReplicaError::NotAllowed("network is already running".into())),
        }
    }

    /// Start a dedicated server and become the authority
    ///
    /// # Returns
    /// The address the server listens on
    pub fn start_dedicated(&self, bind_addr: SocketAddr, slots: usize) -> Result<SocketAddr> {
        self.ensure_offline()?;
        let server = DedicatedServer::start(
            self.handle()?,
            self.config.clone(),
            self.session.clone(),
            self.view_ids.clone(),
            bind_addr,
            slots,
        )?;
        let addr = server.local_addr();
        *self.role.write() = Role::Authority(server);
        Ok(addr)
    }

    /// Connect to a dedicated server, blocking until the handshake completed
    pub fn connect(&self, addr: SocketAddr, player_name: &str) -> Result<()> {
        self.ensure_offline()?;
        let client = ClientConnection::connect(
            self.handle()?,
            self.config.clone(),
            self.session.clone(),
            addr,
            player_name,
        )?;
        *self.role.write() = Role::Client(client);
        Ok(())
    }

    /// Leave the session: a server closes every connection, a client
    /// closes its connection. The network goes back offline.
    pub fn disconnect(&self) {
        let role = std::mem::replace(&mut *self.role.write(), Role::Offline);
        match role {
            Role::Offline => {}
            Role::Authority(server) => server.stop(),
            Role::Client(client) => {
                client.close();
                self.session.set_local_player(None);
            }
        }
    }

    pub fn stop(&self) {
        self.disconnect();
    }

    pub fn is_authority(&self) -> bool {
        matches!(self.role(), Role::Authority(_))
    }

    /// Whether the network is running: a started server, or a client whose
    /// connection has not dropped
    pub fn is_connected(&self) -> bool {
        match self.role() {
            Role::Offline => false,
            Role::Authority(server) => !server.is_stopped(),
            Role::Client(client) => client.is_connected(),
        }
    }

    pub fn is_handshaked(&self) -> bool {
        match self.role() {
            Role::Offline => false,
            Role::Authority(_) => true,
            Role::Client(client) => client.is_handshaked(),
        }
    }

    /// The running dedicated server, if this network is the authority
    pub fn server(&self) -> Option<Arc<DedicatedServer>> {
        match self.role() {
            Role::Authority(server) => Some(server),
            _ => None,
        }
    }

    /// The connection to the authority, if this network is a client
    pub fn client(&self) -> Option<Arc<ClientConnection>> {
        match self.role() {
            Role::Client(client) => Some(client),
            _ => None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server().map(|server| server.local_addr())
    }

    /// Process pending network events
    ///
    /// Sends handshake bursts to new clients and, in queued execution mode,
    /// interprets every packet received since the last call.
    pub fn update(&self) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => server.update(),
            Role::Client(client) => {
                client.update();
                Ok(())
            }
        }
    }

    /// `update`, then replicate view state
    ///
    /// The authority sends every client a full frame without the views that
    /// client owns; a client sends the state of the views it owns.
    pub fn update_frame(&self) -> Result<()> {
        self.update()?;

        match self.role() {
            Role::Offline => Ok(()),
            Role::Authority(server) => {
                let captured = replication::capture_views(&self.session.views(), |_| true);
                for conn in server.connections() {
                    if !conn.handshake_sent() {
                        continue;
                    }
                    let updates = replication::full_frame_for(&captured, conn.player_id());
                    if let Err(e) = conn.send(FrameUpdate {
                        sender: Player::server(),
                        updates,
                    }) {
                        tracing::debug!("Failed to send frame to player {}: {}", conn.player_id(), e);
                    }
                }
                Ok(())
            }
            Role::Client(client) => {
                if !client.is_connected() {
                    return Ok(());
                }
                client.send_partial_frame()
            }
        }
    }

    /// Allocate the next view id of this process
    pub fn allocate_view_id(&self) -> ViewId {
        self.view_ids.get_available_id()
    }

    /// Give a static view its id and register it
    ///
    /// Static views are never announced; every peer must register the same
    /// static views in the same order so their ids agree.
    pub fn register_static_view(&self, view: Arc<dyn View>) -> ViewId {
        let view_id = self.allocate_view_id();
        view.set_view_id(view_id);
        self.session.register_view(view);
        view_id
    }

    pub fn find_view(&self, view_id: ViewId) -> Option<Arc<dyn View>> {
        self.session.find_view(view_id)
    }

    pub fn find_player(&self, id: PlayerId) -> Option<Player> {
        self.session.player(id)
    }

    pub fn players(&self) -> Vec<Player> {
        self.session.players()
    }

    pub fn local_player(&self) -> Option<Player> {
        self.session.local_player()
    }

    /// Create a replicated object
    ///
    /// # Arguments
    /// * `object_name` - Object type understood by every session
    /// * `initial_state` - Opaque state delivered with every instantiation
    /// * `owner` - Owner on the authority; defaults to the authority itself.
    ///   Ignored on a client, which always owns what it requests.
    ///
    /// # Returns
    /// The view on the authority; `None` on a client, where the view
    /// appears once the authority's instantiation arrives.
    pub fn instantiate_object(
        &self,
        object_name: &str,
        initial_state: &[u8],
        owner: Option<PlayerId>,
    ) -> Result<Option<Arc<dyn View>>> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => server
                .instantiate_object(object_name, initial_state, owner.unwrap_or(PlayerId::SERVER))
                .map(Some),
            Role::Client(client) => {
                client.request_instantiate(object_name, initial_state)?;
                Ok(None)
            }
        }
    }

    /// Destroy a view
    ///
    /// # Errors
    /// `NotAllowed` on a client that does not own the view.
    pub fn destroy_object(&self, view: &Arc<dyn View>) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => server.destroy_object(view),
            Role::Client(client) => client.request_destroy(view.as_ref()),
        }
    }

    /// Call `method` on `view` for an explicit list of players
    pub fn rpc_to_players(&self, view: &Arc<dyn View>, targets: &[Player], method: &str, args: &[RpcArg]) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => {
                server.rpc_to_players(view, targets, method, args, &Player::server())?;
                Ok(())
            }
            Role::Client(client) => client.rpc_to_players(view.as_ref(), targets, method, args),
        }
    }

    /// Call `method` on `view` for `All` or `Others`
    ///
    /// A buffered RPC is kept by the authority and replayed to players
    /// joining later.
    pub fn rpc(&self, view: &Arc<dyn View>, targets: RpcTargets, method: &str, args: &[RpcArg], buffered: bool) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => {
                server.rpc_symbolic(view, targets, method, args, buffered, &Player::server())?;
                Ok(())
            }
            Role::Client(client) => client.rpc(view.as_ref(), targets, method, args, buffered),
        }
    }

    /// Drop the RPCs buffered on `view`
    ///
    /// # Errors
    /// `NotAllowed` on a client that does not own the view.
    pub fn clear_rpc_buffer(&self, view: &Arc<dyn View>) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => {
                server.clear_rpc_buffer(view.as_ref());
                Ok(())
            }
            Role::Client(client) => client.clear_rpc_buffer(view.as_ref()),
        }
    }

    /// Ask for ownership of `view`
    ///
    /// On the authority `new_owner` names the player to transfer to
    /// (default: the authority); a client always asks for itself.
    pub fn request_view_ownership(&self, view: &Arc<dyn View>, new_owner: Option<PlayerId>) -> Result<()> {
        match self.role() {
            Role::Offline => Err(ReplicaError::NotInitialized("network is not started".into())),
            Role::Authority(server) => server.request_view_ownership(view, new_owner.unwrap_or(PlayerId::SERVER)),
            Role::Client(client) => client.request_ownership(view.as_ref()),
        }
    }

    pub fn stats(&self) -> Option<ServerStats> {
        self.server().map(|server| server.stats())
    }

    pub fn bytes_sent(&self) -> u64 {
        match self.role() {
            Role::Offline => 0,
            Role::Authority(server) => server.stats().total_bytes_sent,
            Role::Client(client) => client.bytes_sent(),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self.role() {
            Role::Offline => 0,
            Role::Authority(server) => server.stats().total_bytes_received,
            Role::Client(client) => client.bytes_received(),
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
