//! Build and application identity. Decoded first: its feature level drives
//! the other sections.

use serde_json::{Map, Value};

use crate::error::{Result, Section};
use crate::legacy::{self, JsonMapExt};
use crate::primitives::{ByteReader, ByteWriter, SectionFrame};
use crate::section::{section_layouts, ManifestSection, SectionContext};

section_layouts!(MetaLayout { V0 = 0, V1 = 1, V2 = 2 });

impl MetaLayout {
    fn has_build_id(self) -> bool {
        self >= MetaLayout::V1
    }

    fn has_uninstall_action(self) -> bool {
        self >= MetaLayout::V2
    }
}

/// Feature level assumed for JSON manifests that do not state one.
pub const LEGACY_DEFAULT_FEATURE_LEVEL: u32 = 13;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestMeta {
    pub data_version: u8,
    pub feature_level: u32,
    pub is_file_data: bool,
    pub app_id: u32,
    pub app_name: String,
    pub build_version: String,
    pub launch_exe: String,
    pub launch_command: String,
    pub prereq_ids: Vec<String>,
    pub prereq_name: String,
    pub prereq_path: String,
    pub prereq_args: String,
    pub build_id: String,
    pub uninstall_action_path: String,
    pub uninstall_action_args: String,
}

impl Default for ManifestMeta {
    fn default() -> Self {
        Self {
            data_version: MetaLayout::LATEST as u8,
            feature_level: 0,
            is_file_data: false,
            app_id: 0,
            app_name: String::new(),
            build_version: String::new(),
            launch_exe: String::new(),
            launch_command: String::new(),
            prereq_ids: Vec::new(),
            prereq_name: String::new(),
            prereq_path: String::new(),
            prereq_args: String::new(),
            build_id: String::new(),
            uninstall_action_path: String::new(),
            uninstall_action_args: String::new(),
        }
    }
}

impl ManifestSection for ManifestMeta {
    const SECTION: Section = Section::Meta;

    fn read(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self> {
        let frame = SectionFrame::open(r)?;
        let (layout, known) = MetaLayout::select(frame.data_version);

        let mut m = ManifestMeta {
            data_version: frame.data_version,
            feature_level: r.read_u32()?,
            is_file_data: r.read_u8()? != 0,
            app_id: r.read_u32()?,
            app_name: r.read_fstring()?,
            build_version: r.read_fstring()?,
            launch_exe: r.read_fstring()?,
            launch_command: r.read_fstring()?,
            ..ManifestMeta::default()
        };
        let n = r.read_count(4, ctx.limits)?;
        m.prereq_ids = (0..n).map(|_| r.read_fstring()).collect::<Result<_>>()?;
        m.prereq_name = r.read_fstring()?;
        m.prereq_path = r.read_fstring()?;
        m.prereq_args = r.read_fstring()?;

        if layout.has_build_id() {
            m.build_id = r.read_fstring()?;
        }
        if layout.has_uninstall_action() {
            m.uninstall_action_path = r.read_fstring()?;
            m.uninstall_action_args = r.read_fstring()?;
        }

        frame.finish(r, "metadata", known)?;
        Ok(m)
    }

    fn write(&self, w: &mut ByteWriter) -> Result<()> {
        let layout = MetaLayout::for_write(self.data_version);
        let mark = w.begin_section(layout as u8);
        w.write_u32(self.feature_level);
        w.write_u8(self.is_file_data as u8);
        w.write_u32(self.app_id);
        w.write_fstring(&self.app_name)?;
        w.write_fstring(&self.build_version)?;
        w.write_fstring(&self.launch_exe)?;
        w.write_fstring(&self.launch_command)?;
        w.write_count(self.prereq_ids.len())?;
        for id in &self.prereq_ids {
            w.write_fstring(id)?;
        }
        w.write_fstring(&self.prereq_name)?;
        w.write_fstring(&self.prereq_path)?;
        w.write_fstring(&self.prereq_args)?;
        if layout.has_build_id() {
            w.write_fstring(&self.build_id)?;
        }
        if layout.has_uninstall_action() {
            w.write_fstring(&self.uninstall_action_path)?;
            w.write_fstring(&self.uninstall_action_args)?;
        }
        w.end_section(mark)
    }

    fn read_json(root: &Map<String, Value>, _ctx: &SectionContext<'_>) -> Result<Self> {
        let feature_level = match root.opt_str("ManifestFileVersion")? {
            Some(blob) => legacy::blob_to_u64(blob)? as u32,
            None => LEGACY_DEFAULT_FEATURE_LEVEL,
        };
        let app_id = match root.opt_str("AppID")? {
            Some(blob) => legacy::blob_to_u64(blob)? as u32,
            None => 0,
        };
        let prereq_ids = match root.get("PrereqIds") {
            Some(v) => legacy::as_array(v, "PrereqIds")?
                .iter()
                .map(|id| legacy::as_str(id, "PrereqIds").map(str::to_owned))
                .collect::<Result<_>>()?,
            None => Vec::new(),
        };

        Ok(ManifestMeta {
            data_version: 0,
            feature_level,
            is_file_data: root.opt_bool("bIsFileData")?.unwrap_or(false),
            app_id,
            app_name: root.string_or_empty("AppNameString")?,
            build_version: root.string_or_empty("BuildVersionString")?,
            launch_exe: root.string_or_empty("LaunchExeString")?,
            launch_command: root.string_or_empty("LaunchCommand")?,
            prereq_ids,
            prereq_name: root.string_or_empty("PrereqName")?,
            prereq_path: root.string_or_empty("PrereqPath")?,
            prereq_args: root.string_or_empty("PrereqArgs")?,
            ..ManifestMeta::default()
        })
    }
}
