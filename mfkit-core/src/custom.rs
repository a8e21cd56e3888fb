//! Free-form string fields, kept in insertion order.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{ManifestError, Result, Section};
use crate::legacy;
use crate::primitives::{ByteReader, ByteWriter, SectionFrame};
use crate::section::{section_layouts, ManifestSection, SectionContext};

section_layouts!(CustomFieldsLayout { V0 = 0 });

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomFields {
    pub data_version: u8,
    fields: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Default for CustomFields {
    fn default() -> Self {
        Self::with_data_version(CustomFieldsLayout::LATEST as u8)
    }
}

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data_version(data_version: u8) -> Self {
        Self { data_version, fields: Vec::new(), index: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.fields[i].1.as_str())
    }

    /// Set `key`, replacing an existing value in place. Returns the old value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.fields[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.fields.len());
                self.fields.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = CustomFields::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl ManifestSection for CustomFields {
    const SECTION: Section = Section::CustomFields;

    fn read(r: &mut ByteReader<'_>, ctx: &SectionContext<'_>) -> Result<Self> {
        let frame = SectionFrame::open(r)?;
        let (_layout, known) = CustomFieldsLayout::select(frame.data_version);

        let count = r.read_count(8, ctx.limits)?;
        let keys = (0..count).map(|_| r.read_fstring()).collect::<Result<Vec<_>>>()?;
        let values = (0..count).map(|_| r.read_fstring()).collect::<Result<Vec<_>>>()?;

        let mut out = CustomFields::with_data_version(frame.data_version);
        out.fields.reserve(count);
        out.index.reserve(count);
        for (k, v) in keys.into_iter().zip(values) {
            if out.index.contains_key(&k) {
                return Err(ManifestError::corrupt(format!("duplicate custom field {k:?}")));
            }
            out.insert(k, v);
        }
        frame.finish(r, "custom fields", known)?;
        Ok(out)
    }

    fn write(&self, w: &mut ByteWriter) -> Result<()> {
        let layout = CustomFieldsLayout::for_write(self.data_version);
        let mark = w.begin_section(layout as u8);
        w.write_count(self.fields.len())?;
        for (k, _) in &self.fields {
            w.write_fstring(k)?;
        }
        for (_, v) in &self.fields {
            w.write_fstring(v)?;
        }
        w.end_section(mark)
    }

    fn read_json(root: &Map<String, Value>, _ctx: &SectionContext<'_>) -> Result<Self> {
        let mut out = CustomFields::with_data_version(0);
        if let Some(obj) = root.get("CustomFields") {
            for (k, v) in legacy::as_object(obj, "CustomFields")? {
                out.insert(k.as_str(), legacy::as_str(v, "CustomFields")?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_order_and_replaces_in_place() {
        let mut c = CustomFields::new();
        c.insert("CloudSaveFolder", "{AppData}/Saves");
        c.insert("BaseUrl", "https://a.example");
        assert_eq!(c.insert("CloudSaveFolder", "{UserDir}"), Some("{AppData}/Saves".to_string()));
        let keys: Vec<_> = c.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["CloudSaveFolder", "BaseUrl"]);
        assert_eq!(c.get("CloudSaveFolder"), Some("{UserDir}"));
    }
}
