//! # Replica Protocol Library
//!
//! Wire format of the replication protocol.
//!
//! ## Architecture
//!
//! The protocol is organized into several layers:
//!
//! ### 1. Binary Stream ([`stream`])
//! Symmetric little-endian serializer. One `serialize` method per type is
//! used for both reading and writing:
//! - bool, u8, i16, i32, i64, f32
//! - length-prefixed strings and byte arrays
//! - i32 arrays and arrays of nested objects
//!
//! ### 2. RPC Arguments ([`args`])
//! Tagged argument union with a stable, index-based kind registry.
//!
//! ### 3. Messages ([`messages`]) and Packet Tables ([`packets`])
//! One struct per message, grouped into [`ClientMessage`] and
//! [`ServerMessage`] with fixed one-byte ids.
//!
//! ### 4. Framing ([`framing`]) and Compression ([`compression`])
//! Batches of payloads packed into length-prefixed, optionally compressed
//! frames.
//!
//! ## Usage Example
//!
//! ```rust
//! use replica_protocol::{ClientMessage, ClientHandshake, PacketRegistry};
//!
//! let payload = PacketRegistry::encode(ClientMessage::from(ClientHandshake {
//!     name: "alice".into(),
//! }))
//! .unwrap();
//!
//! let decoded: ClientMessage = PacketRegistry::decode(payload).unwrap();
//! assert!(matches!(decoded, ClientMessage::Handshake(h) if h.name == "alice"));
//! ```

pub mod args;
pub mod compression;
pub mod framing;
pub mod messages;
pub mod packets;
pub mod stream;

pub use args::{ArgKind, RpcArg, ARG_REGISTRY};
pub use compression::CompressionType;
pub use messages::*;
pub use packets::{ClientMessage, PacketRegistry, PacketSet, ServerMessage};
pub use stream::{BinaryStream, Serializable};
