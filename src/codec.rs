//! Payload codec: the byte transform applied at the disk boundary
//!
//! Two implementations: [`GzipCodec`] compresses on write, [`IdentityCodec`]
//! writes bytes as-is. Both inspect the gzip magic (`1F 8B`) on read, so a
//! directory can contain a mix of compressed and uncompressed files and the
//! `gzip` setting can be flipped between runs without a migration step.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;

/// First two bytes of every gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Byte transform applied to the serialized envelope before it reaches disk
/// and after it is read back.
pub trait Codec: Send + Sync {
    /// Transform bytes for storage.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`Codec::encode`]. Implementations must accept both their own
    /// output and plain bytes, keyed off the gzip magic.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Gzip-compressing codec
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if is_gzip(data) {
            gunzip(data)
        } else {
            Ok(data.to_vec())
        }
    }
}

/// Pass-through codec; still decompresses gzip input on read
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if is_gzip(data) {
            gunzip(data)
        } else {
            Ok(data.to_vec())
        }
    }
}
