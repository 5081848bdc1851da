//! # Session Contract
//!
//! The session owns the player table and the view table. The networking
//! core reads and mutates both only through this trait, from several
//! threads at once; implementations guard each table separately and must
//! not call back into the core while holding a lock.

use crate::view::View;
use replica_core::{Player, PlayerId, Result, ViewId};
use std::sync::Arc;

pub trait Session: Send + Sync {
    /// Register a view under its current id. Registering an id twice keeps
    /// the first view.
    fn register_view(&self, view: Arc<dyn View>);

    fn remove_view(&self, view_id: ViewId) -> Option<Arc<dyn View>>;

    fn find_view(&self, view_id: ViewId) -> Option<Arc<dyn View>>;

    /// Every registered view, ordered by id
    fn views(&self) -> Vec<Arc<dyn View>>;

    fn local_player(&self) -> Option<Player>;

    /// Set (or clear) the local player; a set player is also stored in the
    /// player table.
    fn set_local_player(&self, player: Option<Player>);

    fn player(&self, id: PlayerId) -> Option<Player>;

    /// Insert, replace or (with `None`) remove a player record
    fn set_player(&self, id: PlayerId, player: Option<Player>);

    /// Every known player, ordered by id
    fn players(&self) -> Vec<Player>;

    /// Construct the local object for a freshly instantiated view.
    ///
    /// The returned view is registered by the caller; implementations must
    /// not register it themselves.
    fn spawn_object(
        &self,
        object_name: &str,
        view_id: ViewId,
        owner: &Player,
        initial_state: &[u8],
    ) -> Result<Arc<dyn View>>;
}
