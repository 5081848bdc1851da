//! Transport frame batching
//!
//! ```text
//! frame  = u32_le length || body
//! body   = compress( sub_1 || sub_2 || ... )
//! sub_n  = u32_le length || payload
//! ```
//!
//! Every payload queued since the last write is packed into one body, so a
//! frame carries at least one payload. Both the wire body and the inflated
//! body are bounded by the same byte limit; senders split batches with
//! [`batch_cost`] to stay under it.

use crate::compression::{compress, decompress, CompressionType};
use crate::stream::BinaryStream;
use bytes::{BufMut, Bytes, BytesMut};
use replica_core::{ReplicaError, Result};

/// Size of the frame length header
pub const FRAME_HEADER_LEN: usize = 4;

/// Pack `payloads` into one complete frame, header included
pub fn encode_batch(payloads: &[Bytes], compression: CompressionType) -> Result<Bytes> {
    let mut stream = BinaryStream::writer();
    for payload in payloads {
        stream.write_bytes(payload)?;
    }
    let body = compress(stream.get_bytes(), compression)?;
    let len = u32::try_from(body.len())
        .map_err(|_| ReplicaError::Protocol(format!("frame of {} bytes is too large", body.len())))?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.put_u32_le(len);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Bytes `payload` adds to an uncompressed batch body
pub fn batch_cost(payload: &[u8]) -> usize {
    FRAME_HEADER_LEN + payload.len()
}

/// Body length announced by a frame header
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_le_bytes(header) as usize
}

/// Unpack the payloads of a frame body (header already stripped).
///
/// A body that inflates past `max_len` bytes is rejected before it is
/// split. Any failure here means the stream itself is corrupt, so errors
/// are reported as [`ReplicaError::Protocol`] or [`ReplicaError::Compression`].
pub fn decode_batch(body: &[u8], compression: CompressionType, max_len: usize) -> Result<Vec<Bytes>> {
    let raw = decompress(body, compression, max_len)?;
    let mut stream = BinaryStream::reader(raw);
    let mut payloads = Vec::new();
    while !stream.is_at_end() {
        let mut payload = Vec::new();
        stream
            .serialize_bytes(&mut payload)
            .map_err(|e| ReplicaError::Protocol(format!("malformed batch: {}", e)))?;
        payloads.push(Bytes::from(payload));
    }
    Ok(payloads)
}
