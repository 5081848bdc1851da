//! # Packet Registry
//!
//! Fixed, hand-numbered packet tables, one per direction. Client → server
//! and server → client ids are independent id spaces.
//!
//! Changing an id here is a wire-breaking change: every peer must be built
//! from the same tables.
//!
//! # Body Layout
//!
//! ```text
//! body = u8 packet_id || message fields
//! ```

use crate::messages::*;
use crate::stream::{BinaryStream, Serializable};
use bytes::Bytes;
use replica_core::{ReplicaError, Result};

/// A direction's set of messages
pub trait PacketSet: Sized {
    /// Human readable direction, used in logs
    const DIRECTION: &'static str;

    /// `(packet id, message name)` for every registered message
    fn table() -> &'static [(u8, &'static str)];

    /// Zero-argument instance of the message registered for `id`
    fn construct(id: u8) -> Option<Self>;

    fn packet_id(&self) -> u8;

    fn name(&self) -> &'static str;

    fn body_mut(&mut self) -> &mut dyn Serializable;
}

macro_rules! packet_table {
    (
        $(#[$meta:meta])*
        $enum:ident, $direction:literal {
            $($id:literal => $variant:ident($ty:ty)),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $enum {
            $($variant($ty)),*
        }

        impl PacketSet for $enum {
            const DIRECTION: &'static str = $direction;

            fn table() -> &'static [(u8, &'static str)] {
                &[$(($id, stringify!($variant))),*]
            }

            fn construct(id: u8) -> Option<Self> {
                match id {
                    $($id => Some($enum::$variant(<$ty>::default())),)*
                    _ => None,
                }
            }

            fn packet_id(&self) -> u8 {
                match self {
                    $($enum::$variant(_) => $id),*
                }
            }

            fn name(&self) -> &'static str {
                match self {
                    $($enum::$variant(_) => stringify!($variant)),*
                }
            }

            fn body_mut(&mut self) -> &mut dyn Serializable {
                match self {
                    $($enum::$variant(msg) => msg),*
                }
            }
        }

        $(
            impl From<$ty> for $enum {
                fn from(msg: $ty) -> Self {
                    $enum::$variant(msg)
                }
            }
        )*
    };
}

packet_table! {
    /// Messages sent by clients to the authority
    ClientMessage, "client->server" {
        0 => Handshake(ClientHandshake),
        1 => InstantiationRequest(InstantiationRequest),
        2 => DeletionRequest(DeletionRequest),
        3 => PartialFrameUpdate(PartialFrameUpdate),
        4 => RpcExecution(RpcExecution),
        5 => RpcClear(RpcClear),
        6 => OwnershipRequest(OwnershipRequest),
        7 => Pong(Pong),
    }
}

packet_table! {
    /// Messages sent by the authority to clients
    ServerMessage, "server->client" {
        0 => Handshake(ServerHandshake),
        1 => Instantiation(Instantiation),
        2 => PlayerJoined(PlayerJoined),
        3 => PlayerLeft(PlayerLeft),
        4 => ServerFull(ServerFull),
        5 => ObjectDeletion(ObjectDeletion),
        6 => FrameUpdate(FrameUpdate),
        7 => Rpc(Rpc),
        8 => OwnerChanged(OwnerChanged),
        9 => OwnershipRejected(OwnershipRejected),
        10 => Ping(Ping),
        11 => PingUpdate(PingUpdate),
    }
}

/// Encoder/decoder for packet bodies
pub struct PacketRegistry;

impl PacketRegistry {
    /// Encode a message into a payload ready for the transport
    pub fn encode<M: PacketSet>(mut msg: M) -> Result<Bytes> {
        let mut stream = BinaryStream::writer();
        let mut id = msg.packet_id();
        stream.serialize_u8(&mut id)?;
        msg.body_mut().serialize(&mut stream)?;
        Ok(stream.into_bytes())
    }

    /// Decode a payload.
    ///
    /// # Errors
    /// - [`ReplicaError::Serialization`] for an empty payload or a body that
    ///   does not match its message layout (drop the packet)
    /// - [`ReplicaError::Protocol`] for an id outside the table
    pub fn decode<M: PacketSet>(payload: Bytes) -> Result<M> {
        let mut stream = BinaryStream::reader(payload);
        if stream.is_at_end() {
            return Err(ReplicaError::Serialization("empty payload".into()));
        }
        let mut id = 0u8;
        stream.serialize_u8(&mut id)?;

        let mut msg = M::construct(id).ok_or_else(|| {
            ReplicaError::Protocol(format!("unknown {} packet id {}", M::DIRECTION, id))
        })?;
        msg.body_mut().serialize(&mut stream)?;

        if !stream.is_at_end() {
            tracing::debug!(
                "{} packet {} has {} trailing bytes",
                M::DIRECTION,
                msg.name(),
                stream.remaining()
            );
        }
        Ok(msg)
    }

    /// Packet id of the first byte of `payload`, if any
    pub fn peek_id(payload: &[u8]) -> Option<u8> {
        payload.first().copied()
    }
}
