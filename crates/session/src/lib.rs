//! # Replica Session
//!
//! The collaborator contracts the networking core depends on, and a
//! ready-to-use in-memory implementation.
//!
//! ## Modules
//!
//! - [`view`] - [`View`] trait, buffered RPC entries and the [`ViewCore`] bookkeeping helper
//! - [`session`] - [`Session`] trait (player table, view table, object spawning)
//! - [`basic`] - [`BasicSession`] / [`BasicView`] reference implementation

pub mod basic;
pub mod session;
pub mod view;

pub use basic::{BasicSession, BasicView, ReceivedRpc, ViewFactory};
pub use session::Session;
pub use view::{BufferedRpc, View, ViewCore};
