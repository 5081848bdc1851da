//! # RPC Routing
//!
//! Remote procedure calls target a view and are delivered either to an
//! explicit list of players or symbolically to `All` / `Others`.
//!
//! # Delivery Rules
//!
//! - The sender never receives its own RPC over the network; a client
//!   sending to `All` (or listing itself) runs it locally before sending.
//! - The authority relays symbolic RPCs to every connected client except
//!   the sender, and runs them itself unless it sent them to `Others`.
//! - Every peer runs a given RPC exactly once.
//! - Buffered symbolic RPCs are kept on the authority's view and replayed
//!   to each player joining later, only to that player.

use replica_core::{Player, PlayerId, Result};
use replica_protocol::{PacketRegistry, Rpc, RpcArg, RpcTargets, ServerMessage};
use replica_session::{BufferedRpc, View};
use std::sync::Arc;

use crate::connection::ServerConnection;
use crate::server::DedicatedServer;

/// Players a symbolic RPC is relayed to: everybody but the sender and the
/// authority
pub fn symbolic_recipients(players: &[Player], sender: PlayerId) -> Vec<Player> {
    players
        .iter()
        .filter(|player| player.id != sender && !player.id.is_server())
        .cloned()
        .collect()
}

/// Whether the authority runs a symbolic RPC relayed on behalf of `sender`
pub fn authority_executes(targets: RpcTargets, sender: PlayerId) -> bool {
    match targets {
        RpcTargets::All => true,
        RpcTargets::Others => !sender.is_server(),
    }
}

/// Whether a client runs its own symbolic RPC before sending it
pub fn sender_executes(targets: RpcTargets) -> bool {
    targets == RpcTargets::All
}

pub fn includes_player(targets: &[Player], id: PlayerId) -> bool {
    targets.iter().any(|player| player.id == id)
}

fn rpc_payload(view: &dyn View, method: &str, args: &[RpcArg], sender: &Player) -> Result<bytes::Bytes> {
    PacketRegistry::encode(ServerMessage::from(Rpc {
        sender: sender.clone(),
        view_id: view.view_id(),
        method: method.to_owned(),
        args: args.to_vec(),
    }))
}

impl DedicatedServer {
    /// Deliver an RPC to an explicit list of players
    ///
    /// # Arguments
    /// * `view` - Target view
    /// * `targets` - Recipients; the authority itself may be listed
    /// * `method` - Method name
    /// * `args` - Arguments
    /// * `sender` - Player the RPC originates from
    ///
    /// # Returns
    /// Number of clients the RPC was queued for
    pub fn rpc_to_players(
        &self,
        view: &Arc<dyn View>,
        targets: &[Player],
        method: &str,
        args: &[RpcArg],
        sender: &Player,
    ) -> Result<usize> {
        let payload = rpc_payload(view.as_ref(), method, args, sender)?;

        let mut sent = 0;
        let mut local = false;
        for target in targets {
            if target.id.is_server() {
                local = true;
            } else if target.id != sender.id && self.send_payload_to(target.id, payload.clone()) {
                sent += 1;
            }
        }

        if local {
            view.rpc_received(method, args, sender);
        }
        Ok(sent)
    }

    /// Deliver a symbolic RPC, buffering it for late joiners if asked
    pub fn rpc_symbolic(
        &self,
        view: &Arc<dyn View>,
        targets: RpcTargets,
        method: &str,
        args: &[RpcArg],
        buffered: bool,
        sender: &Player,
    ) -> Result<usize> {
        let recipients = symbolic_recipients(&self.session.players(), sender.id);
        let sent = self.rpc_to_players(view, &recipients, method, args, sender)?;

        if buffered {
            view.add_buffered_rpc(BufferedRpc {
                method: method.to_owned(),
                args: args.to_vec(),
                targets,
                sender: sender.clone(),
            });
        }

        if authority_executes(targets, sender.id) {
            view.rpc_received(method, args, sender);
        }

        tracing::debug!(
            "RPC {} on view {} from {} relayed to {} clients",
            method,
            view.view_id(),
            sender,
            sent
        );
        Ok(sent)
    }

    /// Re-send every buffered RPC of `view` to a single connection
    pub(crate) fn replay_buffered_rpcs(&self, conn: &ServerConnection, view: &dyn View) -> Result<()> {
        for rpc in view.buffered_rpcs() {
            if rpc.sender.id == conn.player_id() {
                continue;
            }
            conn.send_payload(rpc_payload(view, &rpc.method, &rpc.args, &rpc.sender)?)?;
        }
        Ok(())
    }
}
