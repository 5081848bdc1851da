//! # Protocol Messages
//!
//! One struct per message. Each struct implements [`Serializable`] with a
//! single field sequence used for both encoding and decoding. Packet ids
//! live in the direction tables of [`crate::packets`].
//!
//! # Sender Prefix
//!
//! Every server → client message starts with the sender [`Player`]: the
//! authority itself, or the client a relayed call originated from.
//! Client → server messages carry no sender; the authority attributes them
//! to the player bound to the connection they arrived on.

use crate::args::RpcArg;
use crate::stream::{BinaryStream, Serializable};
use replica_core::{Player, PlayerId, ReplicaError, Result, ViewId};

/// Symbolic RPC recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RpcTargets {
    /// Every player, including the caller
    #[default]
    All = 0,
    /// Every player except the caller
    Others = 1,
}

impl TryFrom<u8> for RpcTargets {
    type Error = ReplicaError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RpcTargets::All),
            1 => Ok(RpcTargets::Others),
            other => Err(ReplicaError::Serialization(format!("unknown RPC target {}", other))),
        }
    }
}

/// Recipients of an RPC execution request
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRecipients {
    Symbolic(RpcTargets),
    Players(Vec<Player>),
}

impl Default for RpcRecipients {
    fn default() -> Self {
        RpcRecipients::Symbolic(RpcTargets::All)
    }
}

/// State of one view inside a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewUpdate {
    pub view_id: ViewId,
    pub state: Vec<u8>,
}

impl ViewUpdate {
    pub fn new(view_id: ViewId, state: Vec<u8>) -> Self {
        Self { view_id, state }
    }
}

impl Serializable for ViewUpdate {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.view_id.0)?;
        stream.serialize_bytes(&mut self.state)
    }
}

/// Frames nest their update array inside a byte array so a receiver can
/// skip the whole block without understanding it.
fn serialize_nested_updates(stream: &mut BinaryStream, updates: &mut Vec<ViewUpdate>) -> Result<()> {
    if stream.is_writing() {
        let mut inner = BinaryStream::writer();
        inner.serialize_object_array(updates)?;
        return stream.write_bytes(inner.get_bytes());
    }
    let mut blob = Vec::new();
    stream.serialize_bytes(&mut blob)?;
    let mut inner = BinaryStream::reader(blob);
    inner.serialize_object_array(updates)
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// First message a client sends, after the server handshake arrived
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientHandshake {
    pub name: String,
}

impl Serializable for ClientHandshake {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_string(&mut self.name)
    }
}

/// Ask the authority to instantiate an object owned by the sender
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstantiationRequest {
    pub object_name: String,
    pub initial_state: Vec<u8>,
}

impl Serializable for InstantiationRequest {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_string(&mut self.object_name)?;
        stream.serialize_bytes(&mut self.initial_state)
    }
}

/// Ask the authority to destroy a view the sender owns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionRequest {
    pub view_id: ViewId,
}

impl Serializable for DeletionRequest {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.view_id.0)
    }
}

/// State of the views the sending client owns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialFrameUpdate {
    pub updates: Vec<ViewUpdate>,
}

impl Serializable for PartialFrameUpdate {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        serialize_nested_updates(stream, &mut self.updates)
    }
}

/// RPC issued by a client, to be re-targeted by the authority
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcExecution {
    pub view_id: ViewId,
    pub method: String,
    pub buffered: bool,
    pub recipients: RpcRecipients,
    pub args: Vec<RpcArg>,
}

impl Serializable for RpcExecution {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.view_id.0)?;
        stream.serialize_string(&mut self.method)?;
        stream.serialize_bool(&mut self.buffered)?;

        let mut symbolic = matches!(self.recipients, RpcRecipients::Symbolic(_));
        stream.serialize_bool(&mut symbolic)?;

        if symbolic {
            let mut target = match &self.recipients {
                RpcRecipients::Symbolic(t) => *t as u8,
                RpcRecipients::Players(_) => RpcTargets::All as u8,
            };
            stream.serialize_u8(&mut target)?;
            self.recipients = RpcRecipients::Symbolic(RpcTargets::try_from(target)?);
        } else {
            let mut players = match std::mem::take(&mut self.recipients) {
                RpcRecipients::Players(players) => players,
                RpcRecipients::Symbolic(_) => Vec::new(),
            };
            let result = stream.serialize_object_array(&mut players);
            self.recipients = RpcRecipients::Players(players);
            result?;
        }

        stream.serialize_object_array(&mut self.args)
    }
}

/// Ask the authority to drop the RPC buffer of an owned view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcClear {
    pub view_id: ViewId,
}

impl Serializable for RpcClear {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.view_id.0)
    }
}

/// Ask the authority to transfer ownership of a view to the sender
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipRequest {
    pub view_id: ViewId,
}

impl Serializable for OwnershipRequest {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.view_id.0)
    }
}

/// Answer to [`Ping`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pong;

impl Serializable for Pong {
    fn serialize(&mut self, _stream: &mut BinaryStream) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Assigns the connecting client its player identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerHandshake {
    pub sender: Player,
    pub player: Player,
}

impl Serializable for ServerHandshake {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_object(&mut self.player)
    }
}

/// A view was created on the authority
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instantiation {
    pub sender: Player,
    pub object_name: String,
    pub initial_state: Vec<u8>,
    pub view_id: ViewId,
    pub owner_id: PlayerId,
}

impl Serializable for Instantiation {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_string(&mut self.object_name)?;
        stream.serialize_bytes(&mut self.initial_state)?;
        stream.serialize_i32(&mut self.view_id.0)?;
        stream.serialize_object(&mut self.owner_id)
    }
}

/// A player joined the session (or its record changed)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerJoined {
    pub sender: Player,
    pub player: Player,
}

impl Serializable for PlayerJoined {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_object(&mut self.player)
    }
}

/// A player left the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerLeft {
    pub sender: Player,
    pub player: Player,
}

impl Serializable for PlayerLeft {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_object(&mut self.player)
    }
}

/// Sent right before the authority closes a socket it has no slot for
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFull {
    pub sender: Player,
}

impl Serializable for ServerFull {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)
    }
}

/// A view was destroyed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDeletion {
    pub sender: Player,
    pub view_id: ViewId,
}

impl Serializable for ObjectDeletion {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_i32(&mut self.view_id.0)
    }
}

/// Full frame: every view the recipient does not own
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameUpdate {
    pub sender: Player,
    pub updates: Vec<ViewUpdate>,
}

impl Serializable for FrameUpdate {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        serialize_nested_updates(stream, &mut self.updates)
    }
}

/// RPC delivery to a client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rpc {
    pub sender: Player,
    pub view_id: ViewId,
    pub method: String,
    pub args: Vec<RpcArg>,
}

impl Serializable for Rpc {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_i32(&mut self.view_id.0)?;
        stream.serialize_string(&mut self.method)?;
        stream.serialize_object_array(&mut self.args)
    }
}

/// Ownership of a view moved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerChanged {
    pub sender: Player,
    pub view_id: ViewId,
    pub owner_id: PlayerId,
}

impl Serializable for OwnerChanged {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_i32(&mut self.view_id.0)?;
        stream.serialize_object(&mut self.owner_id)
    }
}

/// The authority turned down an ownership request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipRejected {
    pub sender: Player,
    pub view_id: ViewId,
}

impl Serializable for OwnershipRejected {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_i32(&mut self.view_id.0)
    }
}

/// Round-trip measurement start; answered with [`Pong`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ping {
    pub sender: Player,
}

impl Serializable for Ping {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)
    }
}

/// Latest ping of every player, as two parallel arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingUpdate {
    pub sender: Player,
    pub player_ids: Vec<i32>,
    pub pings: Vec<i32>,
}

impl PingUpdate {
    pub fn from_entries(sender: Player, entries: impl IntoIterator<Item = (PlayerId, i32)>) -> Self {
        let (player_ids, pings) = entries.into_iter().map(|(id, ping)| (id.get(), ping)).unzip();
        Self {
            sender,
            player_ids,
            pings,
        }
    }

    /// Pairs of (player, ping); extra elements of the longer array are ignored
    pub fn entries(&self) -> impl Iterator<Item = (PlayerId, i32)> + '_ {
        self.player_ids
            .iter()
            .zip(self.pings.iter())
            .map(|(id, ping)| (PlayerId::new(*id), *ping))
    }
}

impl Serializable for PingUpdate {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_object(&mut self.sender)?;
        stream.serialize_i32_array(&mut self.player_ids)?;
        stream.serialize_i32_array(&mut self.pings)
    }
}
