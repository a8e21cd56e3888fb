#![forbid(unsafe_code)]

pub mod chunks;
pub mod compression;
pub mod container;
pub mod custom;
pub mod error;
pub mod files;
pub mod legacy;
pub mod manifest;
pub mod meta;
pub mod path_safety;
pub mod primitives;
pub mod section;
pub mod validate;

pub use chunks::{ChunkDataList, ChunkDir, ChunkGuid, ChunkInfo};
pub use compression::StoreFlags;
pub use container::{BinaryManifestCodec, DecodeLimits, EncodeOptions, ManifestHeader, HEADER_LEN, MANIFEST_MAGIC};
pub use custom::CustomFields;
pub use error::{ErrorKind, ManifestError, Result};
pub use files::{ChunkPart, FileFlags, FileManifest, FileManifestList};
pub use legacy::LegacyJsonManifestCodec;
pub use manifest::{Manifest, ManifestBuilder, ManifestCodec};
pub use meta::ManifestMeta;
pub use validate::{Issue, ValidationReport};
