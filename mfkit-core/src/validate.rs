use thiserror::Error;

use crate::chunks::{ChunkDataList, ChunkGuid};
use crate::error::ManifestError;
use crate::files::FileManifestList;
use crate::path_safety::{self, UnsafePath};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Issue {
    #[error("file {file:?} part {part} references missing chunk {guid}")]
    DanglingChunkReference { file: String, part: usize, guid: ChunkGuid },
    #[error("file {file:?} part {part} ({offset}+{size}) exceeds chunk {guid} window of {window} bytes")]
    ChunkPartOutOfRange { file: String, part: usize, guid: ChunkGuid, offset: u32, size: u32, window: u32 },
    #[error("chunk {0} is listed more than once")]
    DuplicateChunk(ChunkGuid),
    #[error("file {file:?}: {reason}")]
    UnsafePath { file: String, reason: UnsafePath },
}

impl Issue {
    /// Structural issues make the manifest unusable for reassembly.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Issue::UnsafePath { .. })
    }

    fn into_error(self) -> Option<ManifestError> {
        Some(match self {
            Issue::DanglingChunkReference { file, guid, .. } => ManifestError::DanglingChunkReference { file, guid },
            Issue::ChunkPartOutOfRange { file, part, guid, offset, size, window } => {
                ManifestError::ChunkPartOutOfRange { file, part, guid, offset, size, window }
            }
            Issue::DuplicateChunk(guid) => ManifestError::DuplicateChunk(guid),
            Issue::UnsafePath { .. } => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub files_checked: usize,
    pub parts_checked: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn structural(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_structural())
    }

    pub fn into_structural_error(self) -> Option<ManifestError> {
        self.issues.into_iter().find_map(Issue::into_error)
    }
}

/// Resolve every chunk part against the chunk list and check install paths.
pub fn check(chunks: &ChunkDataList, files: &FileManifestList) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.issues.extend(chunks.duplicates().into_iter().map(Issue::DuplicateChunk));

    for f in &files.elements {
        report.files_checked += 1;
        if let Err(reason) = path_safety::check_install_path(&f.filename) {
            report.issues.push(Issue::UnsafePath { file: f.filename.clone(), reason });
        }
        for (i, part) in f.chunk_parts.iter().enumerate() {
            report.parts_checked += 1;
            let Some(chunk) = chunks.get(&part.guid) else {
                report.issues.push(Issue::DanglingChunkReference {
                    file: f.filename.clone(),
                    part: i,
                    guid: part.guid,
                });
                continue;
            };
            let end = part.offset as u64 + part.size as u64;
            if end > chunk.window_size as u64 {
                report.issues.push(Issue::ChunkPartOutOfRange {
                    file: f.filename.clone(),
                    part: i,
                    guid: part.guid,
                    offset: part.offset,
                    size: part.size,
                    window: chunk.window_size,
                });
            }
        }
    }
    report
}
