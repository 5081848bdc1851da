//! # Connection State
//!
//! Per-peer bookkeeping shared by both roles, and the authority's record
//! of one connected client.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting → Handshaking → Handshaked → Disconnected
//!                  ↓
//!             Disconnected
//! ```
//!
//! On the authority a connection starts in `Handshaking` once the socket is
//! accepted. Its handshake burst is sent on the next `update`, and it
//! becomes `Handshaked` when the client answers with its own handshake.
//!
//! # Thread Safety
//!
//! Connections are shared as `Arc<ServerConnection>` between the receiver
//! task, the ping loop and the thread calling `update`. All fields are
//! atomics or short-lived `parking_lot` locks.

use bytes::Bytes;
use parking_lot::Mutex;
use replica_core::{Player, PlayerId, Result};
use replica_protocol::{PacketRegistry, Ping, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

use crate::transport::Transport;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connect in progress
    Connecting,

    /// Socket is up, handshake not finished
    Handshaking,

    /// Both handshakes exchanged
    Handshaked,

    /// Connection closed
    Disconnected,
}

/// Payloads waiting for the thread that drives the session
///
/// # Purpose
/// In queued execution mode receiver tasks only push here; `update` drains
/// the inbox and interprets each payload on the caller's thread.
pub(crate) struct Inbox {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx) }
    }

    pub(crate) fn push(&self, payload: Bytes) {
        // the receiver lives as long as self
        let _ = self.tx.send(payload);
    }

    pub(crate) fn drain(&self) -> Vec<Bytes> {
        let mut rx = self.rx.lock();
        let mut payloads = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            payloads.push(payload);
        }
        payloads
    }
}

/// The authority's view of one connected client
///
/// # Purpose
/// Binds a player id and a slot to a transport, and tracks the handshake
/// and ping state of that client.
pub struct ServerConnection {
    player_id: PlayerId,
    slot: usize,
    transport: Transport,
    state: Mutex<ConnectionState>,
    /// Set once the handshake burst was queued; broadcasts skip
    /// connections that have not received it yet
    handshake_sent: AtomicBool,
    ping_started: Mutex<Option<Instant>>,
    pub(crate) inbox: Inbox,
}

impl ServerConnection {
    pub(crate) fn new(player_id: PlayerId, slot: usize, transport: Transport) -> Self {
        Self {
            player_id,
            slot,
            transport,
            state: Mutex::new(ConnectionState::Handshaking),
            handshake_sent: AtomicBool::new(false),
            ping_started: Mutex::new(None),
            inbox: Inbox::new(),
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.transport.peer_addr()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_handshaked(&self) -> bool {
        self.state() == ConnectionState::Handshaked
    }

    /// Move to `Handshaked`. Returns false if the client already handshaked
    /// or the connection is gone.
    pub(crate) fn mark_handshaked(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Handshaking {
            return false;
        }
        *state = ConnectionState::Handshaked;
        true
    }

    pub(crate) fn mark_disconnected(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }

    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent.load(Ordering::SeqCst)
    }

    /// Returns true for the first caller only
    pub(crate) fn claim_handshake(&self) -> bool {
        !self.handshake_sent.swap(true, Ordering::SeqCst)
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

    pub fn send(&self, msg: impl Into<ServerMessage>) -> Result<()> {
        let payload = PacketRegistry::encode(msg.into())?;
        self.transport.send_raw(payload)
    }

    pub(crate) fn send_payload(&self, payload: Bytes) -> Result<()> {
        self.transport.send_raw(payload)
    }

    /// Send a ping and remember when it left
    pub(crate) fn start_ping(&self, sender: &Player) -> Result<()> {
        *self.ping_started.lock() = Some(Instant::now());
        self.send(Ping { sender: sender.clone() })
    }

    /// Round trip of the outstanding ping in milliseconds, if one was sent
    pub(crate) fn finish_ping(&self) -> Option<i32> {
        let started = self.ping_started.lock().take()?;
        Some(i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX))
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("player_id", &self.player_id)
            .field("slot", &self.slot)
            .field("peer_addr", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_keeps_order() {
        let inbox = Inbox::new();
        inbox.push(Bytes::from_static(b"one"));
        inbox.push(Bytes::from_static(b"two"));
        assert_eq!(
            inbox.drain(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
        assert!(inbox.drain().is_empty());
    }
}
