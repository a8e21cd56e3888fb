//! Binary manifest container: fixed header, store-flag envelope and SHA-1
//! over the concatenated sections.
//!
//! ```text
//! 0   magic              u32  0x44BEC00C
//! 4   header_size        u32  41 for this writer; readers seek past extra bytes
//! 8   size_uncompressed  u32
//! 12  size_compressed    u32
//! 16  sha1               [u8; 20] over the uncompressed payload
//! 36  store_flags        u8   bit0 = deflate
//! 37  version            u32
//! 41  payload            [u8; size_compressed]
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use sha1::{Digest, Sha1};

use crate::chunks::ChunkDataList;
use crate::compression::{self, StoreFlags};
use crate::custom::CustomFields;
use crate::error::{ManifestError, Result, Stage};
use crate::files::FileManifestList;
use crate::manifest::{Manifest, ManifestBuilder, ManifestCodec};
use crate::meta::ManifestMeta;
use crate::primitives::{ByteReader, ByteWriter};
use crate::section::{ManifestSection, SectionContext};

pub const MANIFEST_MAGIC: u32 = 0x44BE_C00C;

/// Fixed header length written by this implementation.
pub const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 20 + 1 + 4;

/// Upper bounds applied before trusting any size read from the wire.
#[derive(Clone, Copy, Debug)]
pub struct DecodeLimits {
    pub max_compressed_bytes: usize,
    pub max_uncompressed_bytes: usize,
    pub max_entries: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_compressed_bytes: 512 * 1024 * 1024,
            max_uncompressed_bytes: 512 * 1024 * 1024,
            max_entries: 5_000_000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    /// zlib level, 0..=9.
    pub compression_level: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { compression_level: 6 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestHeader {
    pub magic: u32,
    pub header_size: u32,
    pub size_uncompressed: u32,
    pub size_compressed: u32,
    pub hash: [u8; 20],
    pub store_flags: StoreFlags,
    pub version: u32,
}

impl ManifestHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut i = 0usize;
        fn put(out: &mut [u8], i: &mut usize, b: &[u8]) {
            out[*i..*i + b.len()].copy_from_slice(b);
            *i += b.len();
        }
        put(&mut out, &mut i, &self.magic.to_le_bytes()); // 0..4
        put(&mut out, &mut i, &self.header_size.to_le_bytes()); // 4..8
        put(&mut out, &mut i, &self.size_uncompressed.to_le_bytes()); // 8..12
        put(&mut out, &mut i, &self.size_compressed.to_le_bytes()); // 12..16
        put(&mut out, &mut i, &self.hash); // 16..36
        put(&mut out, &mut i, &[self.store_flags.bits()]); // 36
        put(&mut out, &mut i, &self.version.to_le_bytes()); // 37..41
        debug_assert_eq!(i, HEADER_LEN, "header encoding wrote incorrect length");
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        Ok(Self {
            magic: r.read_u32()?,
            header_size: r.read_u32()?,
            size_uncompressed: r.read_u32()?,
            size_compressed: r.read_u32()?,
            hash: r.read_array()?,
            store_flags: StoreFlags::from_wire(r.read_u8()?),
            version: r.read_u32()?,
        })
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BinaryManifestCodec {
    pub limits: DecodeLimits,
    pub options: EncodeOptions,
}

impl BinaryManifestCodec {
    pub fn new(limits: DecodeLimits, options: EncodeOptions) -> Self {
        Self { limits, options }
    }

    /// Serialize `manifest`, then seek `sink` back to where writing began so
    /// the buffer can be handed off as-is.
    pub fn encode<W: Write + Seek>(&self, manifest: &Manifest, sink: &mut W) -> Result<ManifestHeader> {
        let start = sink.stream_position()?;

        let mut w = ByteWriter::new();
        manifest.meta().write(&mut w)?;
        manifest.chunks().write(&mut w)?;
        manifest.files().write(&mut w)?;
        manifest.custom_fields().write(&mut w)?;
        let payload = w.into_inner();

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(&payload));

        let store_flags = StoreFlags::DEFLATE;
        let stored = compression::compress(&payload, store_flags, self.options.compression_level)?;

        let header = ManifestHeader {
            magic: MANIFEST_MAGIC,
            header_size: HEADER_LEN as u32,
            size_uncompressed: wire_len(payload.len(), "uncompressed payload")?,
            size_compressed: wire_len(stored.len(), "compressed payload")?,
            hash,
            store_flags,
            version: manifest.version(),
        };
        sink.write_all(&header.to_bytes())?;
        sink.write_all(&stored)?;
        sink.seek(SeekFrom::Start(start))?;

        tracing::debug!(
            files = manifest.files().len(),
            chunks = manifest.chunks().len(),
            size_uncompressed = header.size_uncompressed,
            size_compressed = header.size_compressed,
            "encoded manifest"
        );
        Ok(header)
    }

    fn read_header<R: Read + Seek>(&self, src: &mut R) -> Result<ManifestHeader> {
        let start = src.stream_position()?;
        let fixed = read_up_to(src, HEADER_LEN)?;
        if fixed.len() < HEADER_LEN {
            return Err(ManifestError::truncated(HEADER_LEN, fixed.len()));
        }
        let header = ManifestHeader::parse(&fixed)?;
        if header.magic != MANIFEST_MAGIC {
            return Err(ManifestError::NotAManifest {
                reason: format!("magic {:#010x} does not match {MANIFEST_MAGIC:#010x}", header.magic),
            });
        }

        let header_size = header.header_size as usize;
        if header_size < HEADER_LEN {
            return Err(ManifestError::corrupt(format!(
                "header size {header_size} is smaller than the {HEADER_LEN} bytes already read"
            )));
        }
        if header_size > HEADER_LEN {
            tracing::debug!(header_size, known = HEADER_LEN, "skipping unknown header bytes");
            src.seek(SeekFrom::Start(start + header_size as u64))?;
        }
        Ok(header)
    }
}

impl ManifestCodec for BinaryManifestCodec {
    fn decode<R: Read + Seek>(&self, src: &mut R) -> Result<Manifest> {
        let header = self.read_header(src).map_err(|e| e.at(Stage::Header))?;

        let compressed_len = header.size_compressed as usize;
        if compressed_len > self.limits.max_compressed_bytes {
            return Err(ManifestError::LimitExceeded {
                what: "compressed payload",
                size: compressed_len as u64,
                max: self.limits.max_compressed_bytes as u64,
            }
            .at(Stage::Payload));
        }
        let stored = read_up_to(src, compressed_len).map_err(|e| e.at(Stage::Payload))?;
        if stored.len() < compressed_len {
            return Err(ManifestError::truncated(compressed_len, stored.len()).at(Stage::Payload));
        }

        let payload = compression::decompress(&stored, header.store_flags, header.size_uncompressed, &self.limits)
            .map_err(|e| e.at(Stage::Decompression))?;

        let actual = Sha1::digest(&payload);
        if actual.as_slice() != &header.hash[..] {
            return Err(ManifestError::IntegrityCheckFailed {
                expected: header.hash_hex(),
                actual: hex::encode(actual),
            });
        }

        let mut r = ByteReader::new(&payload);
        let ctx = SectionContext { feature_level: header.version, limits: &self.limits };
        let meta = ManifestMeta::decode(&mut r, &ctx)?;
        let ctx = SectionContext { feature_level: meta.feature_level, ..ctx };
        let chunks = ChunkDataList::decode(&mut r, &ctx)?;
        let files = FileManifestList::decode(&mut r, &ctx)?;
        let custom = CustomFields::decode(&mut r, &ctx)?;
        if r.remaining() > 0 {
            tracing::debug!(bytes = r.remaining(), "ignoring trailing payload after custom fields");
        }

        ManifestBuilder::new(header.version)
            .meta(meta)
            .chunk_list(chunks)
            .file_list(files)
            .custom_fields(custom)
            .header(header)
            .build()
    }
}

/// Read up to `n` bytes; a short result means the stream ended.
pub(crate) fn read_up_to<R: Read>(src: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n.min(64 * 1024));
    src.by_ref().take(n as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn wire_len(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ManifestError::LimitExceeded { what, size: len as u64, max: u32::MAX as u64 })
}
