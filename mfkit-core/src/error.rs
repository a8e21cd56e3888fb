use std::fmt;

use thiserror::Error;

use crate::chunks::ChunkGuid;

pub type Result<T, E = ManifestError> = std::result::Result<T, E>;

/// Where in the container a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Header,
    Payload,
    Decompression,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Header => "header",
            Stage::Payload => "payload",
            Stage::Decompression => "decompression",
        })
    }
}

/// The four payload sections, in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Meta,
    ChunkList,
    FileList,
    CustomFields,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Meta => "metadata",
            Section::ChunkList => "chunk list",
            Section::FileList => "file list",
            Section::CustomFields => "custom fields",
        })
    }
}

/// Coarse classification used by callers that only care about the failure class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotAManifest,
    TruncatedData,
    IntegrityCheckFailed,
    CorruptPayload,
    UnsupportedVersion,
    LimitExceeded,
    Structural,
    Io,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("not a manifest: magic mismatch and not a JSON object ({reason})")]
    NotAManifest { reason: String },

    #[error("truncated data: need {needed} bytes, {available} available")]
    TruncatedData { needed: u64, available: u64 },

    #[error("manifest hash mismatch: header has {expected}, payload hashes to {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    #[error("unsupported store flags {0:#04x}")]
    UnsupportedStoreFlags(u8),

    #[error("{what} of {size} exceeds limit of {max}")]
    LimitExceeded { what: &'static str, size: u64, max: u64 },

    #[error("file {file:?} references chunk {guid} which is not in the chunk list")]
    DanglingChunkReference { file: String, guid: ChunkGuid },

    #[error("file {file:?} part {part} ({offset}+{size}) exceeds chunk {guid} window of {window} bytes")]
    ChunkPartOutOfRange { file: String, part: usize, guid: ChunkGuid, offset: u32, size: u32, window: u32 },

    #[error("chunk {0} is listed more than once")]
    DuplicateChunk(ChunkGuid),

    #[error("{stage}: {source}")]
    Stage { stage: Stage, source: Box<ManifestError> },

    #[error("{section} section: {source}")]
    Section { section: Section, source: Box<ManifestError> },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ManifestError::CorruptPayload(msg.into())
    }

    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        ManifestError::TruncatedData { needed: needed as u64, available: available as u64 }
    }

    /// Attach the container stage, unless the error already names one.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            e @ (ManifestError::Stage { .. } | ManifestError::Section { .. }) => e,
            e => ManifestError::Stage { stage, source: Box::new(e) },
        }
    }

    /// Attach the section being decoded.
    pub fn in_section(self, section: Section) -> Self {
        match self {
            e @ ManifestError::Section { .. } => e,
            e => ManifestError::Section { section, source: Box::new(e) },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManifestError::NotAManifest { .. } => ErrorKind::NotAManifest,
            ManifestError::TruncatedData { .. } => ErrorKind::TruncatedData,
            ManifestError::IntegrityCheckFailed { .. } => ErrorKind::IntegrityCheckFailed,
            ManifestError::CorruptPayload(_) => ErrorKind::CorruptPayload,
            ManifestError::UnsupportedVersion { .. } | ManifestError::UnsupportedStoreFlags(_) => {
                ErrorKind::UnsupportedVersion
            }
            ManifestError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            ManifestError::DanglingChunkReference { .. }
            | ManifestError::ChunkPartOutOfRange { .. }
            | ManifestError::DuplicateChunk(_) => ErrorKind::Structural,
            ManifestError::Stage { source, .. } | ManifestError::Section { source, .. } => {
                source.kind()
            }
            ManifestError::Io(_) => ErrorKind::Io,
        }
    }

    /// Section the failure was raised in, if any.
    pub fn section(&self) -> Option<Section> {
        match self {
            ManifestError::Section { section, .. } => Some(*section),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            ManifestError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
