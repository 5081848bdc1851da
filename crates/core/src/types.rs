//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Player ID (32-bit signed on the wire)
///
/// Id 0 is reserved for the authority itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub i32);

impl PlayerId {
    /// The authority (dedicated server) player.
    pub const SERVER: PlayerId = PlayerId(0);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn is_server(&self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for PlayerId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// View ID (32-bit signed on the wire, allocated from 1 upwards)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewId(pub i32);

impl ViewId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl From<i32> for ViewId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant of a session
///
/// # Purpose
/// Carries the server-assigned identity, the display name announced during
/// the handshake and the last measured round-trip time.
///
/// # Equality
/// Two players are equal when their ids are equal; name and ping are
/// informational and may lag behind between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Round-trip time in milliseconds
    pub ping: i32,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ping: 0,
        }
    }

    /// The player record every session uses for the authority.
    pub fn server() -> Self {
        Self::new(PlayerId::SERVER, "SERVER")
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerId::SERVER, "")
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Player {}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_equality_by_id() {
        let mut a = Player::new(PlayerId::new(3), "alice");
        let b = Player::new(PlayerId::new(3), "renamed");
        a.ping = 40;
        assert_eq!(a, b);
        assert_ne!(a, Player::new(PlayerId::new(4), "alice"));
    }

    #[test]
    fn test_server_player() {
        let server = Player::server();
        assert!(server.id.is_server());
        assert_eq!(server.name, "SERVER");
        assert_eq!(server.to_string(), "0|SERVER");
    }
}
