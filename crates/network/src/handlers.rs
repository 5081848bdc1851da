//! # Packet Handlers
//!
//! Interpretation of decoded messages, one `match` per direction.
//!
//! # Architecture
//!
//! ```text
//! payload ──► PacketRegistry::decode ──► ClientMessage ──► DedicatedServer
//! payload ──► PacketRegistry::decode ──► ServerMessage ──► ClientConnection
//! ```
//!
//! Until the handshake completed only the handshake itself (and, on the
//! client, `ServerFull`) is interpreted; everything else is dropped.
//!
//! # Thread Safety
//!
//! Handlers run on the receiver task (threaded mode) or on the thread
//! calling `update` (queued mode). They never hold a lock across a call
//! into the session.

use bytes::Bytes;
use replica_core::{Player, PlayerId, Result};
use replica_protocol::{
    ClientHandshake, ClientMessage, PacketRegistry, PlayerJoined, Pong, RpcRecipients, ServerHandshake, ServerMessage,
};
use replica_session::View;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::client::ClientConnection;
use crate::connection::{ConnectionState, ServerConnection};
use crate::replication;
use crate::server::DedicatedServer;

impl DedicatedServer {
    /// Decode and handle one payload received from `conn`
    pub(crate) fn handle_client_payload(&self, conn: &Arc<ServerConnection>, payload: Bytes) {
        let msg = match PacketRegistry::decode::<ClientMessage>(payload) {
            Ok(msg) => msg,
            Err(e) if !conn.is_handshaked() => {
                tracing::debug!("Dropping packet from unhandshaked player {}: {}", conn.player_id(), e);
                return;
            }
            Err(e) if e.is_fatal_to_connection() => {
                tracing::warn!("Closing connection of player {}: {}", conn.player_id(), e);
                conn.close();
                return;
            }
            Err(e) => {
                tracing::warn!("Dropping malformed packet from player {}: {}", conn.player_id(), e);
                return;
            }
        };

        if !conn.is_handshaked() && !matches!(msg, ClientMessage::Handshake(_)) {
            tracing::debug!(
                "Dropping {} from player {} before its handshake",
                replica_protocol::PacketSet::name(&msg),
                conn.player_id()
            );
            return;
        }

        if let Err(e) = self.handle_client_message(conn, msg) {
            tracing::warn!("Packet from player {} failed: {}", conn.player_id(), e);
        }
    }

    fn handle_client_message(&self, conn: &Arc<ServerConnection>, msg: ClientMessage) -> Result<()> {
        let sender_id = conn.player_id();

        match msg {
            ClientMessage::Handshake(handshake) => self.handle_client_handshake(conn, handshake),

            ClientMessage::InstantiationRequest(request) => {
                self.instantiate_object(&request.object_name, &request.initial_state, sender_id)?;
                Ok(())
            }

            ClientMessage::DeletionRequest(request) => {
                let Some(view) = self.find_view_for(request.view_id, sender_id) else {
                    return Ok(());
                };
                if view.owner() != sender_id {
                    tracing::warn!(
                        "Player {} may not destroy view {} owned by {}",
                        sender_id,
                        request.view_id,
                        view.owner()
                    );
                    return Ok(());
                }
                self.destroy_object(&view)
            }

            ClientMessage::PartialFrameUpdate(frame) => {
                replication::apply_updates(self.session.as_ref(), frame.updates, Some(sender_id));
                Ok(())
            }

            ClientMessage::RpcExecution(execution) => {
                let Some(view) = self.find_view_for(execution.view_id, sender_id) else {
                    return Ok(());
                };
                let sender = self.player_or_placeholder(sender_id);
                match execution.recipients {
                    RpcRecipients::Symbolic(targets) => self.rpc_symbolic(
                        &view,
                        targets,
                        &execution.method,
                        &execution.args,
                        execution.buffered,
                        &sender,
                    )?,
                    RpcRecipients::Players(targets) => {
                        self.rpc_to_players(&view, &targets, &execution.method, &execution.args, &sender)?
                    }
                };
                Ok(())
            }

            ClientMessage::RpcClear(request) => {
                let Some(view) = self.find_view_for(request.view_id, sender_id) else {
                    return Ok(());
                };
                if view.owner() != sender_id {
                    tracing::warn!("Player {} may not clear RPCs of view {}", sender_id, request.view_id);
                    return Ok(());
                }
                self.clear_rpc_buffer(view.as_ref());
                Ok(())
            }

            ClientMessage::OwnershipRequest(request) => {
                let Some(view) = self.find_view_for(request.view_id, sender_id) else {
                    return Ok(());
                };
                self.request_view_ownership(&view, sender_id)
            }

            ClientMessage::Pong(Pong) => {
                self.record_pong(conn);
                Ok(())
            }
        }
    }

    fn handle_client_handshake(&self, conn: &Arc<ServerConnection>, handshake: ClientHandshake) -> Result<()> {
        let player_id = conn.player_id();
        if !conn.mark_handshaked() {
            tracing::debug!("Ignoring repeated handshake from player {}", player_id);
            return Ok(());
        }

        let mut player = self.player_or_placeholder(player_id);
        player.name = handshake.name;
        self.session.set_player(player_id, Some(player.clone()));

        tracing::info!("Player {} handshaked from {}", player, conn.peer_addr());
        self.broadcast_except(
            PlayerJoined {
                sender: Player::server(),
                player,
            },
            player_id,
        );
        Ok(())
    }

    fn find_view_for(&self, view_id: replica_core::ViewId, sender: PlayerId) -> Option<Arc<dyn View>> {
        let view = self.session.find_view(view_id);
        if view.is_none() {
            tracing::debug!("Player {} referenced unknown view {}", sender, view_id);
        }
        view
    }

    fn player_or_placeholder(&self, id: PlayerId) -> Player {
        self.session.player(id).unwrap_or_else(|| Player::new(id, ""))
    }
}

impl ClientConnection {
    /// Decode and handle one payload received from the authority
    pub(crate) fn handle_server_payload(&self, payload: Bytes) {
        let msg = match PacketRegistry::decode::<ServerMessage>(payload) {
            Ok(msg) => msg,
            Err(e) if e.is_fatal_to_connection() && self.is_handshaked() => {
                tracing::warn!("Closing connection to {}: {}", self.server_addr(), e);
                self.close();
                return;
            }
            Err(e) => {
                tracing::warn!("Dropping packet from {}: {}", self.server_addr(), e);
                return;
            }
        };

        if !self.is_handshaked() {
            match msg {
                ServerMessage::Handshake(handshake) => {
                    if let Err(e) = self.complete_handshake(handshake) {
                        tracing::error!("Handshake with {} failed: {}", self.server_addr(), e);
                        self.close();
                    }
                }
                ServerMessage::ServerFull(_) => {
                    tracing::warn!("Server {} is full", self.server_addr());
                    self.server_full.store(true, Ordering::SeqCst);
                    self.close();
                }
                other => tracing::debug!(
                    "Dropping {} received before the handshake",
                    replica_protocol::PacketSet::name(&other)
                ),
            }
            return;
        }

        if let Err(e) = self.handle_server_message(msg) {
            tracing::warn!("Packet from {} failed: {}", self.server_addr(), e);
        }
    }

    fn complete_handshake(&self, handshake: ServerHandshake) -> Result<()> {
        let mut player = handshake.player;
        player.name = self.player_name().to_owned();
        self.session.set_local_player(Some(player.clone()));

        self.send(ClientHandshake {
            name: player.name.clone(),
        })?;
        self.set_state(ConnectionState::Handshaked);
        self.transport().stop_transaction();

        tracing::info!("Handshake completed, playing as {}", player);
        Ok(())
    }

    fn handle_server_message(&self, msg: ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::Handshake(_) => {
                tracing::debug!("Ignoring repeated server handshake");
            }

            ServerMessage::Instantiation(m) => {
                if self.session.find_view(m.view_id).is_some() {
                    tracing::debug!("View {} already exists", m.view_id);
                    return Ok(());
                }
                let owner = self
                    .session
                    .player(m.owner_id)
                    .unwrap_or_else(|| Player::new(m.owner_id, ""));
                let view = self
                    .session
                    .spawn_object(&m.object_name, m.view_id, &owner, &m.initial_state)?;
                view.set_view_id(m.view_id);
                view.set_owner(m.owner_id);
                view.set_object_name(&m.object_name);
                view.set_initial_state(m.initial_state);
                self.session.register_view(view);
                tracing::debug!("Spawned {} as view {}", m.object_name, m.view_id);
            }

            ServerMessage::PlayerJoined(m) => {
                let mut player = m.player;
                if let Some(known) = self.session.player(player.id) {
                    player.ping = known.ping;
                }
                tracing::debug!("Player {} joined", player);
                self.session.set_player(player.id, Some(player));
            }

            ServerMessage::PlayerLeft(m) => {
                tracing::debug!("Player {} left", m.player);
                self.session.set_player(m.player.id, None);
            }

            ServerMessage::ServerFull(_) => {
                tracing::debug!("Ignoring ServerFull on an established connection");
            }

            ServerMessage::ObjectDeletion(m) => match self.session.remove_view(m.view_id) {
                Some(view) => view.destroy(),
                None => tracing::debug!("Deletion of unknown view {}", m.view_id),
            },

            ServerMessage::FrameUpdate(m) => {
                replication::apply_updates(self.session.as_ref(), m.updates, None);
            }

            ServerMessage::Rpc(m) => match self.session.find_view(m.view_id) {
                Some(view) => view.rpc_received(&m.method, &m.args, &m.sender),
                None => tracing::warn!("RPC {} for unknown view {}", m.method, m.view_id),
            },

            ServerMessage::OwnerChanged(m) => match self.session.find_view(m.view_id) {
                Some(view) => view.set_owner(m.owner_id),
                None => tracing::debug!("Owner change for unknown view {}", m.view_id),
            },

            ServerMessage::OwnershipRejected(m) => {
                if let Some(view) = self.session.find_view(m.view_id) {
                    view.ownership_rejected();
                }
            }

            ServerMessage::Ping(_) => self.send(Pong)?,

            ServerMessage::PingUpdate(m) => {
                for (id, ping) in m.entries() {
                    if let Some(mut player) = self.session.player(id) {
                        player.ping = ping;
                        self.session.set_player(id, Some(player));
                    }
                }
            }
        }

        Ok(())
    }
}
