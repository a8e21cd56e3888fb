//! Chunk inventory: every content-addressable chunk the file list may refer to.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ManifestError, Result, Section};
use crate::legacy::{self, JsonMapExt};
use crate::primitives::{ByteReader, ByteWriter, SectionFrame};
use crate::section::{section_layouts, ManifestSection, SectionContext};

/// 128-bit chunk identifier, stored on the wire as four little-endian u32s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkGuid(pub [u32; 4]);

impl ChunkGuid {
    pub const WIRE_LEN: usize = 16;

    pub fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self([r.read_u32()?, r.read_u32()?, r.read_u32()?, r.read_u32()?]))
    }

    pub fn write(&self, w: &mut ByteWriter) {
        for part in self.0 {
            w.write_u32(part);
        }
    }
}

impl fmt::Display for ChunkGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in self.0 {
            write!(f, "{part:08X}")?;
        }
        Ok(())
    }
}

impl FromStr for ChunkGuid {
    type Err = ManifestError;

    /// 32 hex digits, four big-endian u32s (the form used in JSON and paths).
    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|e| ManifestError::corrupt(format!("bad guid {s:?}: {e}")))?;
        if raw.len() != Self::WIRE_LEN {
            return Err(ManifestError::corrupt(format!("bad guid {s:?}: expected 16 bytes")));
        }
        let mut out = [0u32; 4];
        for (dst, word) in out.iter_mut().zip(raw.chunks_exact(4)) {
            *dst = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        }
        Ok(Self(out))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    pub guid: ChunkGuid,
    /// Rolling hash of the uncompressed chunk; part of the download path.
    pub hash: u64,
    pub sha_hash: [u8; 20],
    pub group_num: u8,
    /// Uncompressed size; parts may address `[0, window_size)`.
    pub window_size: u32,
    /// Size of the stored chunk file.
    pub file_size: i64,
}

/// Chunk store directory, which changed name as the format evolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkDir {
    Chunks,
    ChunksV2,
    ChunksV3,
    ChunksV4,
}

impl ChunkDir {
    pub fn for_feature_level(feature_level: u32) -> Self {
        match feature_level {
            0..=2 => ChunkDir::Chunks,
            3..=5 => ChunkDir::ChunksV2,
            6..=14 => ChunkDir::ChunksV3,
            _ => ChunkDir::ChunksV4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkDir::Chunks => "Chunks",
            ChunkDir::ChunksV2 => "ChunksV2",
            ChunkDir::ChunksV3 => "ChunksV3",
            ChunkDir::ChunksV4 => "ChunksV4",
        }
    }
}

impl ChunkInfo {
    /// Relative path of the chunk file under a CDN base URL.
    pub fn path(&self, feature_level: u32) -> String {
        format!(
            "{}/{:02}/{:016X}_{}.chunk",
            ChunkDir::for_feature_level(feature_level).as_str(),
            self.group_num,
            self.hash,
            self.guid
        )
    }
}

section_layouts!(ChunkListLayout { V0 = 0 });

/// JSON manifests do not record chunk windows; every chunk is 1 MiB.
pub const LEGACY_WINDOW_SIZE: u32 = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDataList {
    pub data_version: u8,
    /// Feature level the list was decoded or built under; selects `ChunkDir`.
    pub feature_level: u32,
    elements: Vec<ChunkInfo>,
    index: HashMap<ChunkGuid, usize>,
}

impl Default for ChunkDataList {
    fn default() -> Self {
        Self::new(0, Vec::new())
    }
}

impl ChunkDataList {
    pub fn new(feature_level: u32, elements: Vec<ChunkInfo>) -> Self {
        // First occurrence wins; duplicates are reported by validation.
        let mut index = HashMap::with_capacity(elements.len());
        for (i, c) in elements.iter().enumerate() {
            index.entry(c.guid).or_insert(i);
        }
        Self { data_version: ChunkListLayout::LATEST as u8, feature_level, elements, index }
    }

    pub fn elements(&self) -> &[ChunkInfo] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, guid: &ChunkGuid) -> Option<&ChunkInfo> {
        self.index.get(guid).map(|&i| &self.elements[i])
    }

    pub fn contains(&self, guid: &ChunkGuid) -> bool {
        self.index.contains_key(guid)
    }

    pub fn chunk_path(&self, guid: &ChunkGuid) -> Option<String> {
        self.get(guid).map(|c| c.path(self.feature_level))
    }

    /// Guids that appear more than once, in list order.
    pub fn duplicates(&self) -> Vec<ChunkGuid> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(i, c)| self.index.get(&c.guid) != Some(i))
            .map(|(_, c)| c.guid)
            .collect()
    }

    /// Sum of stored chunk sizes, i.e. what a full download transfers.
    pub fn download_size(&self) -> u64 {
        self.elements.iter().map(|c| c.file_size.max(0) as u64).sum()
    }
}

impl ManifestSection for ChunkDataList {
    const SECTION: Section = Section::ChunkList;

    fn read(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self> {
        let frame = SectionFrame::open(r)?;
        let (_layout, known) = ChunkListLayout::select(frame.data_version);

        // Columnar: each field for all chunks, then the next field.
        const PER_CHUNK: usize = ChunkGuid::WIRE_LEN + 8 + 20 + 1 + 4 + 8;
        let count = r.read_count(PER_CHUNK, ctx.limits)?;
        let mut elements = vec![ChunkInfo::default(); count];
        for c in elements.iter_mut() {
            c.guid = ChunkGuid::read(r)?;
        }
        for c in elements.iter_mut() {
            c.hash = r.read_u64()?;
        }
        for c in elements.iter_mut() {
            c.sha_hash = r.read_array()?;
        }
        for c in elements.iter_mut() {
            c.group_num = r.read_u8()?;
        }
        for c in elements.iter_mut() {
            c.window_size = r.read_u32()?;
        }
        for c in elements.iter_mut() {
            c.file_size = r.read_i64()?;
        }

        let data_version = frame.data_version;
        frame.finish(r, "chunk list", known)?;
        let mut list = Self::new(ctx.feature_level, elements);
        list.data_version = data_version;
        Ok(list)
    }

    fn write(&self, w: &mut ByteWriter) -> Result<()> {
        let layout = ChunkListLayout::for_write(self.data_version);
        let mark = w.begin_section(layout as u8);
        w.write_count(self.elements.len())?;
        for c in &self.elements {
            c.guid.write(w);
        }
        for c in &self.elements {
            w.write_u64(c.hash);
        }
        for c in &self.elements {
            w.write_bytes(&c.sha_hash);
        }
        for c in &self.elements {
            w.write_u8(c.group_num);
        }
        for c in &self.elements {
            w.write_u32(c.window_size);
        }
        for c in &self.elements {
            w.write_i64(c.file_size);
        }
        w.end_section(mark)
    }

    fn read_json(root: &Map<String, Value>, ctx: &SectionContext<'_>) -> Result<Self> {
        let Some(hashes) = root.get("ChunkHashList") else {
            return Ok(Self::new(ctx.feature_level, Vec::new()));
        };
        let hashes = legacy::as_object(hashes, "ChunkHashList")?;
        let shas = root.opt_object("ChunkShaList")?;
        let groups = root.opt_object("DataGroupList")?;
        let sizes = root.opt_object("ChunkFilesizeList")?;

        let mut elements = Vec::with_capacity(hashes.len());
        for (guid_str, hash) in hashes {
            let mut c = ChunkInfo {
                guid: guid_str.parse()?,
                hash: legacy::blob_to_u64(legacy::as_str(hash, "ChunkHashList")?)?,
                window_size: LEGACY_WINDOW_SIZE,
                ..ChunkInfo::default()
            };
            if let Some(sha) = shas.and_then(|m| m.get(guid_str)) {
                c.sha_hash = legacy::hex_array(legacy::as_str(sha, "ChunkShaList")?)?;
            }
            if let Some(group) = groups.and_then(|m| m.get(guid_str)) {
                c.group_num = legacy::blob_to_u64(legacy::as_str(group, "DataGroupList")?)? as u8;
            }
            if let Some(size) = sizes.and_then(|m| m.get(guid_str)) {
                c.file_size = legacy::blob_to_u64(legacy::as_str(size, "ChunkFilesizeList")?)? as i64;
            }
            elements.push(c);
        }
        Ok(Self::new(ctx.feature_level, elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_text_form_roundtrips() {
        let g = ChunkGuid([0x0123_4567, 0x89AB_CDEF, 0, 0xFFFF_FFFF]);
        let s = g.to_string();
        assert_eq!(s, "0123456789ABCDEF00000000FFFFFFFF");
        assert_eq!(s.to_lowercase().parse::<ChunkGuid>().unwrap(), g);
        assert!("0123".parse::<ChunkGuid>().is_err());
    }

    #[test]
    fn chunk_dir_tracks_feature_level() {
        let c = ChunkInfo {
            guid: ChunkGuid([1, 2, 3, 4]),
            hash: 0xDEAD_BEEF,
            group_num: 7,
            ..ChunkInfo::default()
        };
        assert_eq!(c.path(2), "Chunks/07/00000000DEADBEEF_00000001000000020000000300000004.chunk");
        assert!(c.path(3).starts_with("ChunksV2/"));
        assert!(c.path(14).starts_with("ChunksV3/"));
        assert!(c.path(21).starts_with("ChunksV4/"));
    }

    #[test]
    fn lookup_and_duplicates() {
        let a = ChunkInfo { guid: ChunkGuid([1, 0, 0, 0]), window_size: 10, ..ChunkInfo::default() };
        let b = ChunkInfo { guid: ChunkGuid([2, 0, 0, 0]), window_size: 20, ..ChunkInfo::default() };
        let list = ChunkDataList::new(18, vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(list.get(&b.guid).unwrap().window_size, 20);
        assert_eq!(list.duplicates(), vec![a.guid]);
        assert!(!list.contains(&ChunkGuid([3, 0, 0, 0])));
    }
}
