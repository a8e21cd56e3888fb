//! Store-flag envelope around the section payload (raw or zlib/deflate).

use std::io::{Read, Write};

use bitflags::bitflags;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::container::DecodeLimits;
use crate::error::{ManifestError, Result};

bitflags! {
    /// How the payload bytes following the header were stored.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StoreFlags: u8 {
        const DEFLATE = 0x01;
        const ENCRYPTED = 0x02;
    }
}

impl StoreFlags {
    /// Keep unknown bits so they can be reported rather than dropped.
    pub fn from_wire(raw: u8) -> Self {
        StoreFlags::from_bits_retain(raw)
    }

    fn check_supported(self) -> Result<()> {
        if self.difference(StoreFlags::DEFLATE).is_empty() {
            Ok(())
        } else {
            Err(ManifestError::UnsupportedStoreFlags(self.bits()))
        }
    }
}

pub fn compress(payload: &[u8], flags: StoreFlags, level: u32) -> Result<Vec<u8>> {
    flags.check_supported()?;
    if !flags.contains(StoreFlags::DEFLATE) {
        return Ok(payload.to_vec());
    }
    let mut enc = ZlibEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::new(level.min(9)));
    enc.write_all(payload)?;
    Ok(enc.finish()?)
}

/// Undo `compress`. The result is exactly `size_uncompressed` bytes or an error.
pub fn decompress(
    stored: &[u8],
    flags: StoreFlags,
    size_uncompressed: u32,
    limits: &DecodeLimits,
) -> Result<Vec<u8>> {
    flags.check_supported()?;
    let expected = size_uncompressed as usize;
    if expected > limits.max_uncompressed_bytes {
        return Err(ManifestError::LimitExceeded {
            what: "uncompressed payload",
            size: expected as u64,
            max: limits.max_uncompressed_bytes as u64,
        });
    }

    if !flags.contains(StoreFlags::DEFLATE) {
        if stored.len() != expected {
            return Err(ManifestError::corrupt(format!(
                "stored payload is {} bytes, header declares {}",
                stored.len(),
                expected
            )));
        }
        return Ok(stored.to_vec());
    }

    // One byte of headroom is enough to tell "too long" from "exact".
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(stored)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ManifestError::corrupt(format!("invalid deflate stream: {e}")))?;
    if out.len() != expected {
        return Err(ManifestError::corrupt(format!(
            "inflated payload is {}{} bytes, header declares {}",
            if out.len() > expected { "more than " } else { "" },
            out.len().min(expected),
            expected
        )));
    }
    Ok(out)
}
