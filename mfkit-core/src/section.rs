use serde_json::{Map, Value};

use crate::container::DecodeLimits;
use crate::error::{Result, Section};
use crate::primitives::{ByteReader, ByteWriter};

/// What a section decoder needs to know about the manifest around it.
#[derive(Clone, Copy, Debug)]
pub struct SectionContext<'a> {
    pub feature_level: u32,
    pub limits: &'a DecodeLimits,
}

/// One of the four payload sections.
///
/// Every implementation consumes exactly its own size-prefixed extent on the
/// binary path, so sections can be concatenated without outer framing.
pub trait ManifestSection: Sized + Default {
    const SECTION: Section;

    fn read(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self>;

    fn write(&self, w: &mut ByteWriter) -> Result<()>;

    /// Legacy JSON manifests carry the same logical fields under named keys
    /// of one top-level object.
    fn read_json(root: &Map<String, Value>, ctx: &SectionContext<'_>) -> Result<Self>;

    /// Binary decode with the section attached to any error.
    fn decode(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self> {
        Self::read(r, ctx).map_err(|e| e.in_section(Self::SECTION))
    }
}

/// Generates the closed set of layouts for a section, selected once from the
/// data version byte. Versions newer than the last layout decode with the last
/// layout and report `known == false` so the frame can skip (or refuse) the rest.
macro_rules! section_layouts {
    ($name:ident { $($variant:ident = $v:expr),+ $(,)? }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
        pub enum $name {
            $($variant = $v),+
        }

        impl $name {
            const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const LATEST: $name = $name::ALL[$name::ALL.len() - 1];

            /// Layout for a wire data version, and whether that version is known.
            pub fn select(data_version: u8) -> ($name, bool) {
                match $name::ALL.iter().find(|l| **l as u8 == data_version) {
                    Some(l) => (*l, true),
                    None => ($name::LATEST, false),
                }
            }

            /// Layout used to write a section that claims `data_version`.
            pub fn for_write(data_version: u8) -> $name {
                $name::select(data_version).0
            }
        }
    };
}

pub(crate) use section_layouts;
