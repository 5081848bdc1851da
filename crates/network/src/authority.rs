//! # Authority Operations
//!
//! View lifecycle and ownership decisions taken by the dedicated server,
//! whether requested locally or relayed from a client.

use replica_core::{Player, PlayerId, ReplicaError, Result};
use replica_protocol::{Instantiation, ObjectDeletion, OwnerChanged, OwnershipRejected};
use replica_session::View;
use std::sync::Arc;

use crate::server::DedicatedServer;

impl DedicatedServer {
    /// Allocate a view id, spawn and register the object, then announce it
    ///
    /// # Arguments
    /// * `object_name` - Object type understood by the session
    /// * `initial_state` - Opaque state handed to every spawn of this view
    /// * `owner` - Player that will own the view
    ///
    /// # Returns
    /// The registered view
    pub fn instantiate_object(&self, object_name: &str, initial_state: &[u8], owner: PlayerId) -> Result<Arc<dyn View>> {
        let owner_player = self
            .session
            .player(owner)
            .ok_or_else(|| ReplicaError::NotFound(format!("player {}", owner)))?;

        let view_id = self.view_ids.get_available_id();
        let view = self
            .session
            .spawn_object(object_name, view_id, &owner_player, initial_state)?;
        view.set_view_id(view_id);
        view.set_owner(owner);
        view.set_object_name(object_name);
        view.set_initial_state(initial_state.to_vec());
        self.session.register_view(view.clone());

        let sent = self.broadcast(self.instantiation_message(view.as_ref()));
        tracing::debug!(
            "Instantiated {} as view {} owned by {} ({} clients notified)",
            object_name,
            view_id,
            owner,
            sent
        );
        Ok(view)
    }

    pub(crate) fn instantiation_message(&self, view: &dyn View) -> Instantiation {
        Instantiation {
            sender: Player::server(),
            object_name: view.object_name(),
            initial_state: view.initial_state(),
            view_id: view.view_id(),
            owner_id: view.owner(),
        }
    }

    /// Remove a view everywhere. Removing a view that is already gone is a
    /// no-op.
    pub fn destroy_object(&self, view: &Arc<dyn View>) -> Result<()> {
        let view_id = view.view_id();
        let Some(removed) = self.session.remove_view(view_id) else {
            tracing::debug!("View {} is already destroyed", view_id);
            return Ok(());
        };

        self.broadcast(ObjectDeletion {
            sender: Player::server(),
            view_id,
        });
        removed.destroy();

        tracing::debug!("Destroyed view {}", view_id);
        Ok(())
    }

    /// Decide an ownership request for `view` on behalf of `requester`
    ///
    /// Accepted transfers are announced to every client; a rejection is
    /// reported back to the requester only.
    pub fn request_view_ownership(&self, view: &Arc<dyn View>, requester: PlayerId) -> Result<()> {
        if view.owner() == requester {
            return Ok(());
        }

        let player = self
            .session
            .player(requester)
            .ok_or_else(|| ReplicaError::NotFound(format!("player {}", requester)))?;
        let view_id = view.view_id();

        if view.ownership_request(&player) {
            view.set_owner(requester);
            self.broadcast(OwnerChanged {
                sender: Player::server(),
                view_id,
                owner_id: requester,
            });
            tracing::debug!("View {} is now owned by {}", view_id, requester);
        } else if requester.is_server() {
            view.ownership_rejected();
        } else {
            self.send_to_player(
                requester,
                OwnershipRejected {
                    sender: Player::server(),
                    view_id,
                },
            )?;
            tracing::debug!("Ownership of view {} refused to {}", view_id, requester);
        }

        Ok(())
    }

    /// Drop every RPC buffered on `view`
    pub fn clear_rpc_buffer(&self, view: &dyn View) {
        view.clear_buffered_rpcs();
        tracing::debug!("Cleared RPC buffer of view {}", view.view_id());
    }
}
