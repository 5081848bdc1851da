//! Compression layer for transport frames
//!
//! Compression is applied to a whole batch frame, never to single messages.
//! Both peers must use the same [`CompressionType`]; a mismatch surfaces as
//! a [`ReplicaError::Compression`] on the receiving side.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use replica_core::{ReplicaError, Result};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression method used for frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None = 0,
    Zlib = 1,
    Bzip2 = 2,
}

impl CompressionType {
    pub fn is_enabled(&self) -> bool {
        *self != CompressionType::None
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::Zlib => "zlib",
            CompressionType::Bzip2 => "bzip2",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionType {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" | "false" => Ok(CompressionType::None),
            "zlib" | "on" | "true" => Ok(CompressionType::Zlib),
            "bzip2" => Ok(CompressionType::Bzip2),
            other => Err(ReplicaError::Config(format!("unknown compression '{}'", other))),
        }
    }
}

fn compression_error(method: CompressionType, err: std::io::Error) -> ReplicaError {
    ReplicaError::Compression(format!("{}: {}", method, err))
}

/// Compress data using the specified method
pub fn compress(data: &[u8], method: CompressionType) -> Result<Vec<u8>> {
    match method {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
            encoder.write_all(data).map_err(|e| compression_error(method, e))?;
            encoder.finish().map_err(|e| compression_error(method, e))
        }
        CompressionType::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data).map_err(|e| compression_error(method, e))?;
            encoder.finish().map_err(|e| compression_error(method, e))
        }
    }
}

/// Decompress data using the specified method
///
/// Output longer than `limit` bytes is a [`ReplicaError::Compression`]; the
/// decoder never inflates more than `limit + 1` bytes.
pub fn decompress(data: &[u8], method: CompressionType, limit: usize) -> Result<Vec<u8>> {
    let cap = limit as u64 + 1;
    let mut decompressed = Vec::new();
    match method {
        CompressionType::None => decompressed.extend_from_slice(data),
        CompressionType::Zlib => {
            ZlibDecoder::new(data)
                .take(cap)
                .read_to_end(&mut decompressed)
                .map_err(|e| compression_error(method, e))?;
        }
        CompressionType::Bzip2 => {
            bzip2::read::BzDecoder::new(data)
                .take(cap)
                .read_to_end(&mut decompressed)
                .map_err(|e| compression_error(method, e))?;
        }
    }

    if decompressed.len() > limit {
        return Err(ReplicaError::Compression(format!(
            "{} body inflates past the {} byte limit",
            method, limit
        )));
    }
    Ok(decompressed)
}
