//! # Basic Session
//!
//! In-memory [`Session`] backed by one `DashMap` per table, plus
//! [`BasicView`], a view whose state is an opaque byte array.
//!
//! Object types are resolved through registered [`ViewFactory`]s; a type
//! without a factory spawns a [`BasicView`].
//!
//! # Example
//!
//! ```rust
//! use replica_core::{Player, ViewId};
//! use replica_session::{BasicSession, Session};
//!
//! let session = BasicSession::new();
//! session.set_local_player(Some(Player::server()));
//!
//! let view = session
//!     .spawn_object("Crate", ViewId::new(1), &Player::server(), &[2, 0, 0, 0, 7, 7])
//!     .unwrap();
//! session.register_view(view);
//! assert!(session.find_view(ViewId::new(1)).is_some());
//! ```

use crate::session::Session;
use crate::view::{BufferedRpc, View, ViewCore};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use replica_core::{Player, PlayerId, Result, ViewId};
use replica_protocol::{BinaryStream, RpcArg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Constructor for one object type: `(object_name, view_id, owner, initial_state)`
pub type ViewFactory =
    Box<dyn Fn(&str, ViewId, PlayerId, &[u8]) -> Result<Arc<dyn View>> + Send + Sync>;

/// An RPC delivered to a [`BasicView`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRpc {
    pub method: String,
    pub args: Vec<RpcArg>,
    pub sender: Player,
}

/// View with a byte-array state
///
/// # Purpose
/// Stand-in for engine objects: keeps its state as raw bytes, records every
/// RPC it receives and answers ownership requests with a configurable flag.
#[derive(Debug)]
pub struct BasicView {
    core: ViewCore,
    state: Mutex<Vec<u8>>,
    is_static: bool,
    accept_ownership: AtomicBool,
    received: Mutex<Vec<ReceivedRpc>>,
    rejections: AtomicUsize,
    destroyed: AtomicBool,
}

impl BasicView {
    pub fn new(view_id: ViewId, object_name: &str, owner: PlayerId) -> Self {
        Self {
            core: ViewCore::new(view_id, object_name, owner),
            state: Mutex::new(Vec::new()),
            is_static: false,
            accept_ownership: AtomicBool::new(true),
            received: Mutex::new(Vec::new()),
            rejections: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// A view that exists on every peer before any connection is made
    pub fn new_static(object_name: &str, owner: PlayerId) -> Self {
        Self {
            is_static: true,
            ..Self::new(ViewId::new(0), object_name, owner)
        }
    }

    /// Build a view and apply `initial_state` to it
    pub fn spawn(object_name: &str, view_id: ViewId, owner: PlayerId, initial_state: &[u8]) -> Result<Self> {
        let view = Self::new(view_id, object_name, owner);
        if !initial_state.is_empty() {
            let mut stream = BinaryStream::reader(initial_state.to_vec());
            view.serialize_state(&mut stream)?;
        }
        Ok(view)
    }

    pub fn state(&self) -> Vec<u8> {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: Vec<u8>) {
        *self.state.lock() = state;
    }

    /// Answer given to future ownership requests
    pub fn set_accept_ownership(&self, accept: bool) {
        self.accept_ownership.store(accept, Ordering::SeqCst);
    }

    pub fn received_rpcs(&self) -> Vec<ReceivedRpc> {
        self.received.lock().clone()
    }

    /// Number of received RPCs named `method` sent by `sender`
    pub fn rpc_count(&self, method: &str, sender: PlayerId) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|r| r.method == method && r.sender.id == sender)
            .count()
    }

    pub fn rejection_count(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl View for BasicView {
    fn view_id(&self) -> ViewId {
        self.core.view_id()
    }

    fn set_view_id(&self, view_id: ViewId) {
        self.core.set_view_id(view_id)
    }

    fn object_name(&self) -> String {
        self.core.object_name()
    }

    fn set_object_name(&self, name: &str) {
        self.core.set_object_name(name)
    }

    fn owner(&self) -> PlayerId {
        self.core.owner()
    }

    fn set_owner(&self, owner: PlayerId) {
        self.core.set_owner(owner)
    }

    fn serialize_state(&self, stream: &mut BinaryStream) -> Result<()> {
        let mut state = self.state.lock();
        stream.serialize_bytes(&mut state)
    }

    fn destroy(&self) {
        tracing::debug!("View {} destroyed", self.view_id());
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn rpc_received(&self, method: &str, args: &[RpcArg], sender: &Player) {
        tracing::debug!("View {} got RPC {} from {}", self.view_id(), method, sender);
        self.received.lock().push(ReceivedRpc {
            method: method.to_owned(),
            args: args.to_vec(),
            sender: sender.clone(),
        });
    }

    fn add_buffered_rpc(&self, rpc: BufferedRpc) {
        self.core.add_buffered_rpc(rpc)
    }

    fn buffered_rpcs(&self) -> Vec<BufferedRpc> {
        self.core.buffered_rpcs()
    }

    fn clear_buffered_rpcs(&self) {
        self.core.clear_buffered_rpcs()
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn initial_state(&self) -> Vec<u8> {
        self.core.initial_state()
    }

    fn set_initial_state(&self, state: Vec<u8>) {
        self.core.set_initial_state(state)
    }

    fn ownership_request(&self, requester: &Player) -> bool {
        let accept = self.accept_ownership.load(Ordering::SeqCst);
        tracing::debug!(
            "Ownership of view {} requested by {}: {}",
            self.view_id(),
            requester,
            if accept { "accepted" } else { "rejected" }
        );
        accept
    }

    fn ownership_rejected(&self) {
        tracing::debug!("Ownership request for view {} rejected", self.view_id());
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory session
///
/// # Thread Safety
/// Players and views live in separate `DashMap`s; no operation holds
/// both at once.
pub struct BasicSession {
    players: DashMap<PlayerId, Player>,
    views: DashMap<ViewId, Arc<dyn View>>,
    local_player: RwLock<Option<Player>>,
    factories: RwLock<HashMap<String, ViewFactory>>,
    /// Concrete handles to spawned [`BasicView`]s, for inspection
    basic_views: DashMap<ViewId, Arc<BasicView>>,
}

impl BasicSession {
    pub fn new() -> Self {
        tracing::debug!("Creating BasicSession");

        Self {
            players: DashMap::new(),
            views: DashMap::new(),
            local_player: RwLock::new(None),
            factories: RwLock::new(HashMap::new()),
            basic_views: DashMap::new(),
        }
    }

    /// Register the constructor used for `object_name`
    pub fn register_factory(&self, object_name: &str, factory: ViewFactory) {
        self.factories.write().insert(object_name.to_owned(), factory);
    }

    /// The concrete [`BasicView`] spawned for `view_id`, if any
    pub fn basic_view(&self, view_id: ViewId) -> Option<Arc<BasicView>> {
        self.basic_views.get(&view_id).map(|entry| entry.clone())
    }

    /// Register a [`BasicView`] and keep a concrete handle to it
    pub fn register_basic_view(&self, view: Arc<BasicView>) {
        self.basic_views.insert(view.view_id(), view.clone());
        self.register_view(view);
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl Default for BasicSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for BasicSession {
    fn register_view(&self, view: Arc<dyn View>) {
        let view_id = view.view_id();
        match self.views.entry(view_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                tracing::warn!("View {} is already registered", view_id);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!("Registered view {} ({})", view_id, view.object_name());
                slot.insert(view);
            }
        }
    }

    fn remove_view(&self, view_id: ViewId) -> Option<Arc<dyn View>> {
        self.basic_views.remove(&view_id);
        let removed = self.views.remove(&view_id).map(|(_, view)| view);
        if removed.is_none() {
            tracing::debug!("Tried to remove unknown view {}", view_id);
        }
        removed
    }

    fn find_view(&self, view_id: ViewId) -> Option<Arc<dyn View>> {
        self.views.get(&view_id).map(|entry| entry.clone())
    }

    fn views(&self) -> Vec<Arc<dyn View>> {
        let mut views: Vec<(ViewId, Arc<dyn View>)> = self
            .views
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        views.sort_by_key(|(id, _)| *id);
        views.into_iter().map(|(_, view)| view).collect()
    }

    fn local_player(&self) -> Option<Player> {
        let local = self.local_player.read().clone()?;
        // the table carries the freshest name and ping
        Some(self.player(local.id).unwrap_or(local))
    }

    fn set_local_player(&self, player: Option<Player>) {
        if let Some(player) = &player {
            self.players.insert(player.id, player.clone());
        }
        *self.local_player.write() = player;
    }

    fn player(&self, id: PlayerId) -> Option<Player> {
        self.players.get(&id).map(|entry| entry.clone())
    }

    fn set_player(&self, id: PlayerId, player: Option<Player>) {
        match player {
            Some(player) => {
                self.players.insert(id, player);
            }
            None => {
                self.players.remove(&id);
            }
        }
    }

    fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.iter().map(|entry| entry.value().clone()).collect();
        players.sort_by_key(|p| p.id);
        players
    }

    fn spawn_object(
        &self,
        object_name: &str,
        view_id: ViewId,
        owner: &Player,
        initial_state: &[u8],
    ) -> Result<Arc<dyn View>> {
        tracing::debug!(
            "Spawning {} as view {} for {} ({} bytes of initial state)",
            object_name,
            view_id,
            owner,
            initial_state.len()
        );

        if let Some(factory) = self.factories.read().get(object_name) {
            return factory(object_name, view_id, owner.id, initial_state);
        }

        let view = Arc::new(BasicView::spawn(object_name, view_id, owner.id, initial_state)?);
        self.basic_views.insert(view_id, view.clone());
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_applies_initial_state() {
        let session = BasicSession::new();
        let view = session
            .spawn_object("Crate", ViewId::new(1), &Player::server(), &[4, 0, 0, 0, 1, 2, 3, 4])
            .unwrap();
        session.register_view(view.clone());

        let basic = session.basic_view(ViewId::new(1)).unwrap();
        assert_eq!(basic.state(), vec![1, 2, 3, 4]);

        let mut stream = BinaryStream::writer();
        view.serialize_state(&mut stream).unwrap();
        assert_eq!(stream.get_bytes(), &[4, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_spawn_rejects_truncated_state() {
        let session = BasicSession::new();
        assert!(session
            .spawn_object("Crate", ViewId::new(1), &Player::server(), &[9, 0, 0, 0, 1])
            .is_err());
    }

    #[test]
    fn test_factory_is_used() {
        let session = BasicSession::new();
        session.register_factory(
            "Door",
            Box::new(|name, id, owner, _| {
                let view: Arc<dyn View> = Arc::new(BasicView::new(id, &format!("{}-custom", name), owner));
                Ok(view)
            }),
        );
        let view = session
            .spawn_object("Door", ViewId::new(5), &Player::server(), &[])
            .unwrap();
        assert_eq!(view.object_name(), "Door-custom");
        assert!(session.basic_view(ViewId::new(5)).is_none());
    }

    #[test]
    fn test_views_sorted_and_unique() {
        let session = BasicSession::new();
        for id in [3, 1, 2] {
            session.register_view(Arc::new(BasicView::new(ViewId::new(id), "x", PlayerId::SERVER)));
        }
        session.register_view(Arc::new(BasicView::new(ViewId::new(2), "dup", PlayerId::SERVER)));

        let ids: Vec<_> = session.views().iter().map(|v| v.view_id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(session.find_view(ViewId::new(2)).unwrap().object_name(), "x");

        assert!(session.remove_view(ViewId::new(2)).is_some());
        assert!(session.remove_view(ViewId::new(2)).is_none());
        assert_eq!(session.view_count(), 2);
    }

    #[test]
    fn test_player_table() {
        let session = BasicSession::new();
        session.set_local_player(Some(Player::new(PlayerId::new(2), "me")));
        session.set_player(PlayerId::new(1), Some(Player::new(PlayerId::new(1), "other")));

        let ids: Vec<_> = session.players().iter().map(|p| p.id.get()).collect();
        assert_eq!(ids, vec![1, 2]);

        let mut updated = session.player(PlayerId::new(2)).unwrap();
        updated.ping = 42;
        session.set_player(updated.id, Some(updated));
        assert_eq!(session.local_player().unwrap().ping, 42);

        session.set_player(PlayerId::new(1), None);
        assert!(session.player(PlayerId::new(1)).is_none());
    }

    #[test]
    fn test_basic_view_hooks() {
        let view = BasicView::new(ViewId::new(1), "Crate", PlayerId::SERVER);
        let sender = Player::new(PlayerId::new(3), "c");
        view.rpc_received("hit", &[RpcArg::Int(1)], &sender);
        view.rpc_received("hit", &[], &sender);
        assert_eq!(view.rpc_count("hit", PlayerId::new(3)), 2);
        assert_eq!(view.rpc_count("hit", PlayerId::SERVER), 0);

        assert!(view.ownership_request(&sender));
        view.set_accept_ownership(false);
        assert!(!view.ownership_request(&sender));

        view.ownership_rejected();
        assert_eq!(view.rejection_count(), 1);

        view.destroy();
        assert!(view.is_destroyed());
    }
}
