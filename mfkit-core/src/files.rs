//! Installable files, each assembled from an ordered run of chunk parts.

use bitflags::bitflags;
use serde_json::{Map, Value};

use crate::chunks::ChunkGuid;
use crate::error::{ManifestError, Result, Section};
use crate::legacy::{self, JsonMapExt};
use crate::primitives::{ByteReader, ByteWriter, SectionFrame};
use crate::section::{section_layouts, ManifestSection, SectionContext};

section_layouts!(FileListLayout { V0 = 0, V1 = 1, V2 = 2 });

impl FileListLayout {
    fn has_md5_and_mime(self) -> bool {
        self >= FileListLayout::V1
    }

    fn has_sha256(self) -> bool {
        self >= FileListLayout::V2
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FileFlags: u8 {
        const READ_ONLY = 0x01;
        const COMPRESSED = 0x02;
        const UNIX_EXECUTABLE = 0x04;
    }
}

/// A contiguous slice of one chunk contributing to a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkPart {
    pub guid: ChunkGuid,
    pub offset: u32,
    pub size: u32,
}

impl ChunkPart {
    /// Record size on the wire, including its own u32 size prefix.
    pub const WIRE_LEN: u32 = 4 + ChunkGuid::WIRE_LEN as u32 + 4 + 4;

    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let start = r.position();
        let record = r.read_u32()? as usize;
        if record < Self::WIRE_LEN as usize {
            return Err(ManifestError::corrupt(format!("chunk part record of {record} bytes is too short")));
        }
        let part = ChunkPart { guid: ChunkGuid::read(r)?, offset: r.read_u32()?, size: r.read_u32()? };
        // Newer writers may append fields to the record.
        r.seek_to(start.checked_add(record).unwrap_or(usize::MAX))?;
        Ok(part)
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u32(Self::WIRE_LEN);
        self.guid.write(w);
        w.write_u32(self.offset);
        w.write_u32(self.size);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileManifest {
    pub filename: String,
    pub symlink_target: String,
    pub hash: [u8; 20],
    pub flags: FileFlags,
    pub install_tags: Vec<String>,
    pub chunk_parts: Vec<ChunkPart>,
    pub hash_md5: Option<[u8; 16]>,
    pub mime_type: String,
    pub hash_sha256: [u8; 32],
}

impl FileManifest {
    /// Reconstructed length: the parts concatenate to the file's bytes.
    pub fn file_size(&self) -> u64 {
        self.chunk_parts.iter().map(|p| p.size as u64).sum()
    }

    pub fn is_executable(&self) -> bool {
        self.flags.contains(FileFlags::UNIX_EXECUTABLE)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.install_tags.iter().any(|t| t == tag)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileManifestList {
    pub data_version: u8,
    pub elements: Vec<FileManifest>,
}

impl Default for FileManifestList {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FileManifestList {
    pub fn new(elements: Vec<FileManifest>) -> Self {
        Self { data_version: FileListLayout::LATEST as u8, elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&FileManifest> {
        self.elements.iter().find(|f| f.filename == filename)
    }

    pub fn total_size(&self) -> u64 {
        self.elements.iter().map(FileManifest::file_size).sum()
    }

    /// Files carrying `tag`; untagged files belong to every install.
    pub fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a FileManifest> + 'a {
        self.elements.iter().filter(move |f| f.install_tags.is_empty() || f.has_tag(tag))
    }
}

impl ManifestSection for FileManifestList {
    const SECTION: Section = Section::FileList;

    fn read(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self> {
        let frame = SectionFrame::open(r)?;
        let (layout, known) = FileListLayout::select(frame.data_version);

        // Smallest possible file: two empty strings, hash, flags, two counts.
        const MIN_FILE: usize = 4 + 4 + 20 + 1 + 4 + 4;
        let count = r.read_count(MIN_FILE, ctx.limits)?;
        let mut elements = vec![FileManifest::default(); count];

        for f in elements.iter_mut() {
            f.filename = r.read_fstring()?;
        }
        for f in elements.iter_mut() {
            f.symlink_target = r.read_fstring()?;
        }
        for f in elements.iter_mut() {
            f.hash = r.read_array()?;
        }
        for f in elements.iter_mut() {
            f.flags = FileFlags::from_bits_retain(r.read_u8()?);
        }
        for f in elements.iter_mut() {
            let n = r.read_count(4, ctx.limits)?;
            f.install_tags = (0..n).map(|_| r.read_fstring()).collect::<Result<_>>()?;
        }
        for f in elements.iter_mut() {
            let n = r.read_count(ChunkPart::WIRE_LEN as usize, ctx.limits)?;
            f.chunk_parts = (0..n).map(|_| ChunkPart::read(r)).collect::<Result<_>>()?;
        }

        if layout.has_md5_and_mime() {
            for f in elements.iter_mut() {
                if r.read_u32()? != 0 {
                    f.hash_md5 = Some(r.read_array()?);
                }
            }
            for f in elements.iter_mut() {
                f.mime_type = r.read_fstring()?;
            }
        }
        if layout.has_sha256() {
            for f in elements.iter_mut() {
                f.hash_sha256 = r.read_array()?;
            }
        }

        let data_version = frame.data_version;
        frame.finish(r, "file list", known)?;
        Ok(Self { data_version, elements })
    }

    fn write(&self, w: &mut ByteWriter) -> Result<()> {
        let layout = FileListLayout::for_write(self.data_version);
        let mark = w.begin_section(layout as u8);
        w.write_count(self.elements.len())?;
        for f in &self.elements {
            w.write_fstring(&f.filename)?;
        }
        for f in &self.elements {
            w.write_fstring(&f.symlink_target)?;
        }
        for f in &self.elements {
            w.write_bytes(&f.hash);
        }
        for f in &self.elements {
            w.write_u8(f.flags.bits());
        }
        for f in &self.elements {
            w.write_count(f.install_tags.len())?;
            for tag in &f.install_tags {
                w.write_fstring(tag)?;
            }
        }
        for f in &self.elements {
            w.write_count(f.chunk_parts.len())?;
            for part in &f.chunk_parts {
                part.write(w);
            }
        }
        if layout.has_md5_and_mime() {
            for f in &self.elements {
                match &f.hash_md5 {
                    Some(md5) => {
                        w.write_u32(1);
                        w.write_bytes(md5);
                    }
                    None => w.write_u32(0),
                }
            }
            for f in &self.elements {
                w.write_fstring(&f.mime_type)?;
            }
        }
        if layout.has_sha256() {
            for f in &self.elements {
                w.write_bytes(&f.hash_sha256);
            }
        }
        w.end_section(mark)
    }

    fn read_json(root: &Map<String, Value>, _ctx: &SectionContext<'_>) -> Result<Self> {
        let Some(list) = root.get("FileManifestList") else {
            return Ok(Self { data_version: 0, elements: Vec::new() });
        };
        let elements = legacy::as_array(list, "FileManifestList")?
            .iter()
            .map(|entry| file_from_json(legacy::as_object(entry, "FileManifestList")?))
            .collect::<Result<_>>()?;
        Ok(Self { data_version: 0, elements })
    }
}

fn file_from_json(obj: &Map<String, Value>) -> Result<FileManifest> {
    let mut f = FileManifest { filename: obj.string_or_empty("Filename")?, ..FileManifest::default() };
    if let Some(blob) = obj.opt_str("FileHash")? {
        f.hash = legacy::blob_to_array(blob)?;
    }
    if obj.opt_bool("bIsReadOnly")?.unwrap_or(false) {
        f.flags |= FileFlags::READ_ONLY;
    }
    if obj.opt_bool("bIsCompressed")?.unwrap_or(false) {
        f.flags |= FileFlags::COMPRESSED;
    }
    if obj.opt_bool("bIsUnixExecutable")?.unwrap_or(false) {
        f.flags |= FileFlags::UNIX_EXECUTABLE;
    }
    if let Some(tags) = obj.get("InstallTags") {
        f.install_tags = legacy::as_array(tags, "InstallTags")?
            .iter()
            .map(|t| legacy::as_str(t, "InstallTags").map(str::to_owned))
            .collect::<Result<_>>()?;
    }
    if let Some(parts) = obj.get("FileChunkParts") {
        for part in legacy::as_array(parts, "FileChunkParts")? {
            let part = legacy::as_object(part, "FileChunkParts")?;
            f.chunk_parts.push(ChunkPart {
                guid: legacy::as_str(legacy::require(part, "Guid")?, "Guid")?.parse()?,
                offset: legacy::blob_to_u64(legacy::as_str(legacy::require(part, "Offset")?, "Offset")?)? as u32,
                size: legacy::blob_to_u64(legacy::as_str(legacy::require(part, "Size")?, "Size")?)? as u32,
            });
        }
    }
    Ok(f)
}
