use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use crate::chunks::{ChunkDataList, ChunkInfo};
use crate::container::{read_up_to, BinaryManifestCodec, DecodeLimits, EncodeOptions, ManifestHeader, MANIFEST_MAGIC};
use crate::custom::CustomFields;
use crate::error::{ManifestError, Result, Stage};
use crate::files::{FileManifest, FileManifestList};
use crate::legacy::LegacyJsonManifestCodec;
use crate::meta::ManifestMeta;
use crate::validate::{self, ValidationReport};

/// A decode strategy for one on-disk representation of a manifest.
pub trait ManifestCodec {
    fn decode<R: Read + Seek>(&self, src: &mut R) -> Result<Manifest>;
}

/// A whole-document manifest snapshot. Built once by `ManifestBuilder` or a
/// codec and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    version: u32,
    header: Option<ManifestHeader>,
    meta: ManifestMeta,
    chunks: ChunkDataList,
    files: FileManifestList,
    custom_fields: CustomFields,
}

impl Manifest {
    /// Decode from `src`, sniffing the magic to choose between the binary
    /// container and a legacy JSON document.
    pub fn read<R: Read + Seek>(src: &mut R) -> Result<Manifest> {
        Self::read_with(src, DecodeLimits::default())
    }

    pub fn read_with<R: Read + Seek>(src: &mut R, limits: DecodeLimits) -> Result<Manifest> {
        let start = src.stream_position()?;
        let sniff = read_up_to(src, 4)?;
        src.seek(SeekFrom::Start(start))?;

        let magic = MANIFEST_MAGIC.to_le_bytes();
        if !sniff.is_empty() && sniff.len() < magic.len() && magic.starts_with(&sniff) {
            return Err(ManifestError::truncated(magic.len(), sniff.len()).at(Stage::Header));
        }
        if sniff[..] == magic[..] {
            BinaryManifestCodec { limits, ..BinaryManifestCodec::default() }.decode(src)
        } else {
            tracing::debug!("no binary magic, decoding as legacy JSON");
            LegacyJsonManifestCodec::new(limits).decode(src)
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Manifest> {
        Self::read(&mut Cursor::new(bytes))
    }

    /// Encode in the binary container with default options.
    pub fn write<W: Write + Seek>(&self, sink: &mut W) -> Result<ManifestHeader> {
        self.write_with(sink, EncodeOptions::default())
    }

    pub fn write_with<W: Write + Seek>(&self, sink: &mut W, options: EncodeOptions) -> Result<ManifestHeader> {
        BinaryManifestCodec { options, ..BinaryManifestCodec::default() }.encode(self, sink)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Framing seen on the wire; `None` unless decoded from the binary form.
    pub fn header(&self) -> Option<&ManifestHeader> {
        self.header.as_ref()
    }

    pub fn meta(&self) -> &ManifestMeta {
        &self.meta
    }

    pub fn chunks(&self) -> &ChunkDataList {
        &self.chunks
    }

    pub fn files(&self) -> &FileManifestList {
        &self.files
    }

    pub fn custom_fields(&self) -> &CustomFields {
        &self.custom_fields
    }

    /// Full check, including install path safety.
    pub fn validate(&self) -> ValidationReport {
        validate::check(&self.chunks, &self.files)
    }

    /// Chunks referenced by at least one file, in chunk list order.
    pub fn referenced_chunks(&self) -> Vec<&ChunkInfo> {
        let used: std::collections::HashSet<_> =
            self.files.elements.iter().flat_map(|f| f.chunk_parts.iter().map(|p| p.guid)).collect();
        self.chunks.elements().iter().filter(|c| used.contains(&c.guid)).collect()
    }
}

/// Accumulates sections and produces an immutable `Manifest`.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    version: u32,
    header: Option<ManifestHeader>,
    meta: Option<ManifestMeta>,
    chunk_data_version: Option<u8>,
    chunks: Vec<ChunkInfo>,
    files: FileManifestList,
    custom_fields: CustomFields,
}

impl ManifestBuilder {
    pub fn new(version: u32) -> Self {
        Self { version, ..Self::default() }
    }

    /// Without explicit metadata, the feature level follows `version`.
    pub fn meta(mut self, meta: ManifestMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn chunk(mut self, chunk: ChunkInfo) -> Self {
        self.chunks.push(chunk);
        self
    }

    pub fn chunk_list(mut self, list: ChunkDataList) -> Self {
        self.chunk_data_version = Some(list.data_version);
        self.chunks = list.elements().to_vec();
        self
    }

    pub fn file(mut self, file: FileManifest) -> Self {
        self.files.elements.push(file);
        self
    }

    pub fn file_list(mut self, list: FileManifestList) -> Self {
        self.files = list;
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(key, value);
        self
    }

    pub fn custom_fields(mut self, fields: CustomFields) -> Self {
        self.custom_fields = fields;
        self
    }

    pub(crate) fn header(mut self, header: ManifestHeader) -> Self {
        self.header = Some(header);
        self
    }

    fn assemble(self) -> Manifest {
        let meta = self
            .meta
            .unwrap_or_else(|| ManifestMeta { feature_level: self.version, ..ManifestMeta::default() });
        let mut chunks = ChunkDataList::new(meta.feature_level, self.chunks);
        if let Some(v) = self.chunk_data_version {
            chunks.data_version = v;
        }
        Manifest {
            version: self.version,
            header: self.header,
            meta,
            chunks,
            files: self.files,
            custom_fields: self.custom_fields,
        }
    }

    /// Fails on the first structural problem (dangling chunk reference, part
    /// outside its chunk, duplicate chunk id).
    pub fn build(self) -> Result<Manifest> {
        let manifest = self.assemble();
        let report = manifest.validate();
        if let Some(err) = report.into_structural_error() {
            return Err(err);
        }
        Ok(manifest)
    }

    /// Never fails; problems are logged.
    pub fn build_lenient(self) -> Manifest {
        let manifest = self.assemble();
        for issue in manifest.validate().issues {
            tracing::warn!(%issue, "manifest accepted with validation issue");
        }
        manifest
    }
}
