//! # Views
//!
//! A view is a replicated object: an id, a type name, an owner, a state
//! that is captured into frames, an immutable initial state resent to late
//! joiners and, on the authority, a buffer of RPCs replayed to them.
//!
//! # Thread Safety
//!
//! Views are shared as `Arc<dyn View>` between the receiver tasks, the
//! ping loop and the thread driving `update_frame`, so every method takes
//! `&self` and implementations synchronize internally.

use parking_lot::Mutex;
use replica_core::{Player, PlayerId, Result, ViewId};
use replica_protocol::{BinaryStream, RpcArg, RpcTargets};

/// An RPC retained on the authority for replay to players joining later
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRpc {
    pub method: String,
    pub args: Vec<RpcArg>,
    pub targets: RpcTargets,
    pub sender: Player,
}

/// Contract between the replication engine and a replicated object
pub trait View: Send + Sync {
    fn view_id(&self) -> ViewId;

    fn set_view_id(&self, view_id: ViewId);

    fn object_name(&self) -> String;

    fn set_object_name(&self, name: &str);

    fn owner(&self) -> PlayerId;

    fn set_owner(&self, owner: PlayerId);

    /// Capture (write mode) or apply (read mode) the current state.
    ///
    /// The same call sequence must be used in both modes.
    fn serialize_state(&self, stream: &mut BinaryStream) -> Result<()>;

    /// Called once the view was removed from the session
    fn destroy(&self);

    /// Called for every RPC delivered to this view
    fn rpc_received(&self, method: &str, args: &[RpcArg], sender: &Player);

    fn add_buffered_rpc(&self, rpc: BufferedRpc);

    fn buffered_rpcs(&self) -> Vec<BufferedRpc>;

    fn clear_buffered_rpcs(&self);

    /// Static views exist on every peer up front and are never announced
    fn is_static(&self) -> bool;

    fn initial_state(&self) -> Vec<u8>;

    fn set_initial_state(&self, state: Vec<u8>);

    /// Authority-side decision on whether `requester` may take the view over
    fn ownership_request(&self, requester: &Player) -> bool;

    /// The authority turned down an ownership request issued by this peer
    fn ownership_rejected(&self);
}

/// Bookkeeping shared by most [`View`] implementations.
///
/// Holds the id, name, owner, initial state and RPC buffer behind locks so
/// an implementation only has to forward the corresponding trait methods
/// and provide its own state serialization and hooks.
#[derive(Debug)]
pub struct ViewCore {
    view_id: Mutex<ViewId>,
    object_name: Mutex<String>,
    owner: Mutex<PlayerId>,
    initial_state: Mutex<Vec<u8>>,
    rpc_buffer: Mutex<Vec<BufferedRpc>>,
}

impl ViewCore {
    pub fn new(view_id: ViewId, object_name: &str, owner: PlayerId) -> Self {
        Self {
            view_id: Mutex::new(view_id),
            object_name: Mutex::new(object_name.to_owned()),
            owner: Mutex::new(owner),
            initial_state: Mutex::new(Vec::new()),
            rpc_buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn view_id(&self) -> ViewId {
        *self.view_id.lock()
    }

    pub fn set_view_id(&self, view_id: ViewId) {
        *self.view_id.lock() = view_id;
    }

    pub fn object_name(&self) -> String {
        self.object_name.lock().clone()
    }

    pub fn set_object_name(&self, name: &str) {
        *self.object_name.lock() = name.to_owned();
    }

    pub fn owner(&self) -> PlayerId {
        *self.owner.lock()
    }

    pub fn set_owner(&self, owner: PlayerId) {
        *self.owner.lock() = owner;
    }

    pub fn initial_state(&self) -> Vec<u8> {
        self.initial_state.lock().clone()
    }

    pub fn set_initial_state(&self, state: Vec<u8>) {
        *self.initial_state.lock() = state;
    }

    pub fn add_buffered_rpc(&self, rpc: BufferedRpc) {
        self.rpc_buffer.lock().push(rpc);
    }

    pub fn buffered_rpcs(&self) -> Vec<BufferedRpc> {
        self.rpc_buffer.lock().clone()
    }

    pub fn clear_buffered_rpcs(&self) {
        self.rpc_buffer.lock().clear();
    }
}
