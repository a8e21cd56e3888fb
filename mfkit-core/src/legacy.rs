//! Pre-binary JSON manifests.
//!
//! Numbers and hashes in these documents are "blobs": runs of 3-digit decimal
//! groups, one group per byte, least significant byte first
//! (`"013000000000"` is 13). Chunk GUIDs are 32 hex digits.
//!
//! Decoding is deliberately lenient: a section that fails to decode is logged
//! and left empty, because hand-edited and older documents routinely miss keys.

use std::io::{Read, Seek};

use serde_json::{Map, Value};

use crate::chunks::ChunkDataList;
use crate::container::DecodeLimits;
use crate::custom::CustomFields;
use crate::error::{ManifestError, Result};
use crate::files::FileManifestList;
use crate::manifest::{Manifest, ManifestBuilder, ManifestCodec};
use crate::meta::{ManifestMeta, LEGACY_DEFAULT_FEATURE_LEVEL};
use crate::section::{ManifestSection, SectionContext};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Clone, Debug, Default)]
pub struct LegacyJsonManifestCodec {
    pub limits: DecodeLimits,
}

impl LegacyJsonManifestCodec {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    /// Parse a whole document already in memory.
    pub fn decode_slice(&self, bytes: &[u8]) -> Result<Manifest> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| ManifestError::NotAManifest { reason: e.to_string() })?;
        let Value::Object(root) = root else {
            return Err(ManifestError::NotAManifest { reason: "top-level JSON value is not an object".into() });
        };

        let ctx = SectionContext { feature_level: LEGACY_DEFAULT_FEATURE_LEVEL, limits: &self.limits };
        let meta = best_effort::<ManifestMeta>(&root, &ctx).unwrap_or_else(|| ManifestMeta {
            feature_level: LEGACY_DEFAULT_FEATURE_LEVEL,
            ..ManifestMeta::default()
        });

        let ctx = SectionContext { feature_level: meta.feature_level, ..ctx };
        let mut builder = ManifestBuilder::new(meta.feature_level);
        if let Some(chunks) = best_effort::<ChunkDataList>(&root, &ctx) {
            builder = builder.chunk_list(chunks);
        }
        if let Some(files) = best_effort::<FileManifestList>(&root, &ctx) {
            builder = builder.file_list(files);
        }
        if let Some(custom) = best_effort::<CustomFields>(&root, &ctx) {
            builder = builder.custom_fields(custom);
        }
        Ok(builder.meta(meta).build_lenient())
    }
}

impl ManifestCodec for LegacyJsonManifestCodec {
    fn decode<R: Read + Seek>(&self, src: &mut R) -> Result<Manifest> {
        let mut text = Vec::new();
        src.by_ref().take(self.limits.max_uncompressed_bytes as u64 + 1).read_to_end(&mut text)?;
        if text.len() > self.limits.max_uncompressed_bytes {
            return Err(ManifestError::LimitExceeded {
                what: "JSON manifest",
                size: text.len() as u64,
                max: self.limits.max_uncompressed_bytes as u64,
            });
        }
        self.decode_slice(&text)
    }
}

fn best_effort<S: ManifestSection>(root: &Map<String, Value>, ctx: &SectionContext<'_>) -> Option<S> {
    match S::read_json(root, ctx) {
        Ok(section) => Some(section),
        Err(e) => {
            tracing::warn!(section = %S::SECTION, error = %e, "ignoring unreadable legacy JSON section");
            None
        }
    }
}

/// Little-endian integer from a blob of at most eight groups.
pub fn blob_to_u64(blob: &str) -> Result<u64> {
    let bytes = blob_to_bytes(blob)?;
    if bytes.len() > 8 {
        return Err(ManifestError::corrupt(format!("blob {blob:?} is wider than 64 bits")));
    }
    Ok(bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

pub fn blob_to_array<const N: usize>(blob: &str) -> Result<[u8; N]> {
    let bytes = blob_to_bytes(blob)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| ManifestError::corrupt(format!("blob holds {} bytes, expected {N}", v.len())))
}

pub fn blob_to_bytes(blob: &str) -> Result<Vec<u8>> {
    let raw = blob.as_bytes();
    if raw.len() % 3 != 0 {
        return Err(ManifestError::corrupt(format!("blob length {} is not a multiple of 3", raw.len())));
    }
    raw.chunks_exact(3)
        .map(|group| {
            std::str::from_utf8(group)
                .ok()
                .filter(|g| g.bytes().all(|c| c.is_ascii_digit()))
                .and_then(|g| g.parse::<u8>().ok())
                .ok_or_else(|| ManifestError::corrupt(format!("bad blob group in {blob:?}")))
        })
        .collect()
}

/// Inverse of `blob_to_bytes`.
pub fn bytes_to_blob(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:03}")).collect()
}

pub fn hex_array<const N: usize>(s: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|e| ManifestError::corrupt(format!("bad hex {s:?}: {e}")))?;
    Ok(out)
}

pub(crate) fn as_object<'a>(v: &'a Value, key: &str) -> Result<&'a Map<String, Value>> {
    v.as_object().ok_or_else(|| ManifestError::corrupt(format!("{key} is not an object")))
}

pub(crate) fn as_array<'a>(v: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    v.as_array().ok_or_else(|| ManifestError::corrupt(format!("{key} is not an array")))
}

pub(crate) fn as_str<'a>(v: &'a Value, key: &str) -> Result<&'a str> {
    v.as_str().ok_or_else(|| ManifestError::corrupt(format!("{key} is not a string")))
}

pub(crate) fn require<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    obj.get(key).ok_or_else(|| ManifestError::corrupt(format!("missing {key}")))
}

/// Optional typed lookups on a JSON object; present-but-wrong-type is an error.
pub(crate) trait JsonMapExt {
    fn opt_str(&self, key: &str) -> Result<Option<&str>>;
    fn opt_bool(&self, key: &str) -> Result<Option<bool>>;
    fn opt_object(&self, key: &str) -> Result<Option<&Map<String, Value>>>;

    fn string_or_empty(&self, key: &str) -> Result<String> {
        Ok(self.opt_str(key)?.unwrap_or_default().to_owned())
    }
}

impl JsonMapExt for Map<String, Value> {
    fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        self.get(key).map(|v| as_str(v, key)).transpose()
    }

    fn opt_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|v| v.as_bool().ok_or_else(|| ManifestError::corrupt(format!("{key} is not a boolean"))))
            .transpose()
    }

    fn opt_object(&self, key: &str) -> Result<Option<&Map<String, Value>>> {
        self.get(key).map(|v| as_object(v, key)).transpose()
    }
}
