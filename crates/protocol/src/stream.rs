//! # Binary Stream
//!
//! Symmetric little-endian serializer used by every message on the wire.
//!
//! # Architecture
//!
//! A [`BinaryStream`] is either a writer (growing `BytesMut`) or a reader
//! (an immutable `Bytes` plus a cursor). Every `serialize_*` method takes a
//! mutable reference to a value: in write mode the value is appended, in
//! read mode the value is overwritten with what was read. A message type
//! therefore implements a single [`Serializable::serialize`] that is used
//! for both directions, which keeps field order identical on both ends.
//!
//! # Encoding
//!
//! | type | encoding |
//! |------|----------|
//! | bool | 1 byte, 0 or 1 |
//! | u8 | 1 byte |
//! | i16 / i32 / i64 / f32 | little-endian |
//! | string | i32 length + UTF-8 bytes |
//! | byte array | i32 length + bytes |
//! | i32 array | i32 count + i32 values |
//! | object array | i32 count + each element |
//!
//! # Failure Mode
//!
//! Any read that would go past the end of the buffer, including a length
//! prefix larger than the bytes left, fails with
//! [`ReplicaError::Serialization`] before allocating anything.
//!
//! # Example
//!
//! ```rust
//! use replica_protocol::BinaryStream;
//!
//! let mut writer = BinaryStream::writer();
//! let mut name = String::from("alice");
//! let mut score = -12i32;
//! writer.serialize_string(&mut name).unwrap();
//! writer.serialize_i32(&mut score).unwrap();
//!
//! let mut reader = BinaryStream::reader(writer.into_bytes());
//! let mut name_out = String::new();
//! let mut score_out = 0i32;
//! reader.serialize_string(&mut name_out).unwrap();
//! reader.serialize_i32(&mut score_out).unwrap();
//! assert_eq!(name_out, "alice");
//! assert_eq!(score_out, -12);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use replica_core::{Player, PlayerId, ReplicaError, Result};

/// Types that serialize themselves through a [`BinaryStream`].
///
/// Implementations must issue the same sequence of `serialize_*` calls in
/// read and write mode.
pub trait Serializable {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()>;
}

enum Mode {
    Write(BytesMut),
    Read { data: Bytes, pos: usize },
}

/// Linear-cursor binary serializer (write mode XOR read mode)
pub struct BinaryStream {
    mode: Mode,
}

macro_rules! primitive {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $size:expr, $put:ident, $get:ident) => {
        $(#[$doc])*
        pub fn $name(&mut self, value: &mut $ty) -> Result<()> {
            if let Mode::Write(buf) = &mut self.mode {
                buf.$put(*value);
                return Ok(());
            }
            let mut raw = self.take($size, stringify!($ty))?;
            *value = raw.$get();
            Ok(())
        }
    };
}

impl BinaryStream {
    /// Create an empty stream in write mode
    pub fn writer() -> Self {
        Self {
            mode: Mode::Write(BytesMut::new()),
        }
    }

    /// Wrap `data` in a stream in read mode, cursor at 0
    pub fn reader(data: impl Into<Bytes>) -> Self {
        Self {
            mode: Mode::Read {
                data: data.into(),
                pos: 0,
            },
        }
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.mode, Mode::Write(_))
    }

    pub fn is_reading(&self) -> bool {
        !self.is_writing()
    }

    /// Bytes left to read (always 0 in write mode)
    pub fn remaining(&self) -> usize {
        match &self.mode {
            Mode::Write(_) => 0,
            Mode::Read { data, pos } => data.len() - pos,
        }
    }

    /// Cursor position in read mode, bytes written in write mode
    pub fn position(&self) -> usize {
        match &self.mode {
            Mode::Write(buf) => buf.len(),
            Mode::Read { pos, .. } => *pos,
        }
    }

    /// Whether a reader has consumed every byte
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// The accumulated write buffer, or the whole wrapped slice of a reader
    pub fn get_bytes(&self) -> &[u8] {
        match &self.mode {
            Mode::Write(buf) => buf,
            Mode::Read { data, .. } => data,
        }
    }

    /// Consume the stream and return its bytes without copying
    pub fn into_bytes(self) -> Bytes {
        match self.mode {
            Mode::Write(buf) => buf.freeze(),
            Mode::Read { data, .. } => data,
        }
    }

    /// Rewind a reader to position 0 (clears a writer)
    pub fn reset(&mut self) {
        match &mut self.mode {
            Mode::Write(buf) => buf.clear(),
            Mode::Read { pos, .. } => *pos = 0,
        }
    }

    /// Advance the read cursor by `len` bytes and return them
    fn take(&mut self, len: usize, what: &str) -> Result<&[u8]> {
        match &mut self.mode {
            Mode::Write(_) => Err(ReplicaError::Serialization(format!(
                "cannot read {} from a stream in write mode",
                what
            ))),
            Mode::Read { data, pos } => {
                let left = data.len() - *pos;
                if len > left {
                    return Err(ReplicaError::Serialization(format!(
                        "{} needs {} bytes but only {} are left",
                        what, len, left
                    )));
                }
                let start = *pos;
                *pos += len;
                Ok(&data[start..start + len])
            }
        }
    }

    /// Read a length prefix and check it against the bytes left.
    ///
    /// `unit` is the minimal encoded size of one element.
    fn read_len(&mut self, unit: usize, what: &str) -> Result<usize> {
        let mut raw = self.take(4, what)?;
        let len = raw.get_i32_le();
        if len < 0 {
            return Err(ReplicaError::Serialization(format!(
                "negative {} length {}",
                what, len
            )));
        }
        let len = len as usize;
        let needed = len.saturating_mul(unit);
        if needed > self.remaining() {
            return Err(ReplicaError::Serialization(format!(
                "{} length {} exceeds the {} bytes left",
                what,
                len,
                self.remaining()
            )));
        }
        Ok(len)
    }

    fn write_len(buf: &mut BytesMut, len: usize, what: &str) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| {
            ReplicaError::Serialization(format!("{} too long ({} elements)", what, len))
        })?;
        buf.put_i32_le(len);
        Ok(())
    }

    /// Serialize a bool as a single byte
    pub fn serialize_bool(&mut self, value: &mut bool) -> Result<()> {
        let mut byte = u8::from(*value);
        self.serialize_u8(&mut byte)?;
        *value = byte != 0;
        Ok(())
    }

    primitive!(serialize_u8, u8, 1, put_u8, get_u8);
    primitive!(serialize_i16, i16, 2, put_i16_le, get_i16_le);
    primitive!(serialize_i32, i32, 4, put_i32_le, get_i32_le);
    primitive!(serialize_i64, i64, 8, put_i64_le, get_i64_le);
    primitive!(serialize_f32, f32, 4, put_f32_le, get_f32_le);

    /// Serialize a length-prefixed UTF-8 string
    pub fn serialize_string(&mut self, value: &mut String) -> Result<()> {
        if let Mode::Write(buf) = &mut self.mode {
            Self::write_len(buf, value.len(), "string")?;
            buf.put_slice(value.as_bytes());
            return Ok(());
        }
        let len = self.read_len(1, "string")?;
        let raw = self.take(len, "string")?;
        *value = std::str::from_utf8(raw)
            .map_err(|e| ReplicaError::Serialization(format!("invalid UTF-8 string: {}", e)))?
            .to_owned();
        Ok(())
    }

    /// Serialize a length-prefixed byte array
    pub fn serialize_bytes(&mut self, value: &mut Vec<u8>) -> Result<()> {
        if let Mode::Write(buf) = &mut self.mode {
            Self::write_len(buf, value.len(), "byte array")?;
            buf.put_slice(value);
            return Ok(());
        }
        let len = self.read_len(1, "byte array")?;
        *value = self.take(len, "byte array")?.to_vec();
        Ok(())
    }

    /// Append a length-prefixed byte array without requiring ownership.
    ///
    /// Write mode only; the bytes read back with [`serialize_bytes`](Self::serialize_bytes).
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        match &mut self.mode {
            Mode::Write(buf) => {
                Self::write_len(buf, value.len(), "byte array")?;
                buf.put_slice(value);
                Ok(())
            }
            Mode::Read { .. } => Err(ReplicaError::Serialization(
                "cannot write to a stream in read mode".into(),
            )),
        }
    }

    /// Serialize a count-prefixed array of i32
    pub fn serialize_i32_array(&mut self, value: &mut Vec<i32>) -> Result<()> {
        if let Mode::Write(buf) = &mut self.mode {
            Self::write_len(buf, value.len(), "int array")?;
            for v in value.iter() {
                buf.put_i32_le(*v);
            }
            return Ok(());
        }
        let len = self.read_len(4, "int array")?;
        let mut raw = self.take(len * 4, "int array")?;
        *value = (0..len).map(|_| raw.get_i32_le()).collect();
        Ok(())
    }

    /// Serialize a nested object through its own [`Serializable`] implementation
    pub fn serialize_object<T: Serializable + ?Sized>(&mut self, value: &mut T) -> Result<()> {
        value.serialize(self)
    }

    /// Serialize a count-prefixed array of objects.
    ///
    /// Every element is expected to occupy at least one byte, so a count
    /// larger than the bytes left is rejected up front.
    pub fn serialize_object_array<T: Serializable + Default>(&mut self, value: &mut Vec<T>) -> Result<()> {
        if let Mode::Write(buf) = &mut self.mode {
            Self::write_len(buf, value.len(), "object array")?;
            for item in value.iter_mut() {
                item.serialize(self)?;
            }
            return Ok(());
        }
        let len = self.read_len(1, "object array")?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            let mut item = T::default();
            item.serialize(self)?;
            items.push(item);
        }
        *value = items;
        Ok(())
    }
}

impl Serializable for Player {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.id.0)?;
        stream.serialize_string(&mut self.name)
    }
}

/// Serialize a [`PlayerId`] as a plain i32
impl Serializable for PlayerId {
    fn serialize(&mut self, stream: &mut BinaryStream) -> Result<()> {
        stream.serialize_i32(&mut self.0)
    }
}
