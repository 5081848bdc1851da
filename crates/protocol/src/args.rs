//! # RPC Arguments
//!
//! Loosely typed RPC arguments travel as a tagged union. On the wire each
//! value is prefixed with a 2-byte index into [`ARG_REGISTRY`], the ordered
//! list of argument kinds every peer agrees on. Appending a kind is a wire
//! compatible change; reordering is not.

use crate::stream::{BinaryStream, Serializable};
use replica_core::{Player, ReplicaError, Result};

/// A single RPC argument
#[derive(Debug, Clone, PartialEq)]
pub enum RpcArg {
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Player(Player),
    Bool(bool),
    Bytes(Vec<u8>),
    IntArray(Vec<i32>),
}

/// Discriminant of an [`RpcArg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    String,
    Player,
    Bool,
    Bytes,
    IntArray,
}

/// Registered argument kinds; the position is the wire index.
pub const ARG_REGISTRY: &[ArgKind] = &[
    ArgKind::Byte,
    ArgKind::Short,
    ArgKind::Int,
    ArgKind::Long,
    ArgKind::Float,
    ArgKind::String,
    ArgKind::Player,
    ArgKind::Bool,
    ArgKind::Bytes,
    ArgKind::IntArray,
];

/// Wire index of `kind`, if registered
pub fn registry_index(kind: ArgKind) -> Option<i16> {
    ARG_REGISTRY
        .iter()
        .position(|k| *k == kind)
        .and_then(|i| i16::try_from(i).ok())
}

impl RpcArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            RpcArg::Byte(_) => ArgKind::Byte,
            RpcArg::Short(_) => ArgKind::Short,
            RpcArg::Int(_) => ArgKind::Int,
            RpcArg::Long(_) => ArgKind::Long,
            RpcArg::Float(_) => ArgKind::Float,
            RpcArg::String(_) => ArgKind::String,
            RpcArg::Player(_) => ArgKind::Player,
            RpcArg::Bool(_) => ArgKind::Bool,
            RpcArg::Bytes(_) => ArgKind::Bytes,
            RpcArg::IntArray(_) => ArgKind::IntArray,
        }
    }

    /// Zero value of `kind`, filled in by a subsequent read
    fn empty(kind: ArgKind) -> Self {
        match kind {
            ArgKind::Byte => RpcArg::Byte(0),
            ArgKind::Short => RpcArg::Short(0),
            ArgKind::Int => RpcArg::Int(0),
            ArgKind::Long => RpcArg::Long(0),
            ArgKind::Float => RpcArg::Float(0.0),
            ArgKind::String => RpcArg::String(String::new()),
            ArgKind::Player => RpcArg::Player(Player::default()),
            ArgKind::Bool => RpcArg::Bool(false),
            ArgKind::Bytes => RpcArg::Bytes(Vec::new()),
            ArgKind::IntArray => RpcArg::IntArray(Vec::new()),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RpcArg::Byte(v) => Some(i32::from(*v)),
            RpcArg::Short(v) => Some(i32::from(*v)),
            RpcArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcArg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            RpcArg::Player(p) => Some(p),
            _ => None,
        }
    }
}

impl Default for RpcArg {
    fn default() -> Self {
        RpcArg::Byte(0)
    }
}

impl Serializable for RpcArg {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        let mut index = if stream.is_writing() {
            match registry_index(self.kind()) {
                Some(index) => index,
                None => {
                    tracing::error!("No serializer registered for RPC argument kind {:?}", self.kind());
                    return Err(ReplicaError::Serialization(format!(
                        "unregistered RPC argument kind {:?}",
                        self.kind()
                    )));
                }
            }
        } else {
            0
        };
        stream.serialize_i16(&mut index)?;

        if stream.is_reading() {
            let kind = usize::try_from(index)
                .ok()
                .and_then(|i| ARG_REGISTRY.get(i))
                .ok_or_else(|| {
                    ReplicaError::Serialization(format!("unknown RPC argument index {}", index))
                })?;
            *self = RpcArg::empty(*kind);
        }

        match self {
            RpcArg::Byte(v) => stream.serialize_u8(v),
            RpcArg::Short(v) => stream.serialize_i16(v),
            RpcArg::Int(v) => stream.serialize_i32(v),
            RpcArg::Long(v) => stream.serialize_i64(v),
            RpcArg::Float(v) => stream.serialize_f32(v),
            RpcArg::String(v) => stream.serialize_string(v),
            RpcArg::Player(v) => stream.serialize_object(v),
            RpcArg::Bool(v) => stream.serialize_bool(v),
            RpcArg::Bytes(v) => stream.serialize_bytes(v),
            RpcArg::IntArray(v) => stream.serialize_i32_array(v),
        }
    }
}

impl From<u8> for RpcArg {
    fn from(v: u8) -> Self {
        RpcArg::Byte(v)
    }
}

impl From<i16> for RpcArg {
    fn from(v: i16) -> Self {
        RpcArg::Short(v)
    }
}

impl From<i32> for RpcArg {
    fn from(v: i32) -> Self {
        RpcArg::Int(v)
    }
}

impl From<i64> for RpcArg {
    fn from(v: i64) -> Self {
        RpcArg::Long(v)
    }
}

impl From<f32> for RpcArg {
    fn from(v: f32) -> Self {
        RpcArg::Float(v)
    }
}

impl From<bool> for RpcArg {
    fn from(v: bool) -> Self {
        RpcArg::Bool(v)
    }
}

impl From<&str> for RpcArg {
    fn from(v: &str) -> Self {
        RpcArg::String(v.to_owned())
    }
}

impl From<String> for RpcArg {
    fn from(v: String) -> Self {
        RpcArg::String(v)
    }
}

impl From<Player> for RpcArg {
    fn from(v: Player) -> Self {
        RpcArg::Player(v)
    }
}

impl From<Vec<u8>> for RpcArg {
    fn from(v: Vec<u8>) -> Self {
        RpcArg::Bytes(v)
    }
}
