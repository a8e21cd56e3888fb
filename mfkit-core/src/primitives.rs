//! Little-endian primitives shared by the container and every section.
//!
//! `ByteReader` never hands back a partially filled value: each read checks
//! the remaining length first and fails with `TruncatedData`.

use crate::container::DecodeLimits;
use crate::error::{ManifestError, Result};

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ManifestError::truncated(n, self.remaining()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut dst = [0u8; N];
        dst.copy_from_slice(self.take(N)?);
        Ok(dst)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Move to an absolute position inside the buffer.
    pub fn seek_to(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(ManifestError::truncated(pos - self.pos, self.remaining()));
        }
        self.pos = pos;
        Ok(())
    }

    /// Read a u32 element count, rejecting counts that cannot fit in what is
    /// left of the buffer before the caller allocates for them.
    pub fn read_count(&mut self, min_element_size: usize, limits: &DecodeLimits) -> Result<usize> {
        let count = self.read_u32()? as usize;
        if count > limits.max_entries {
            return Err(ManifestError::LimitExceeded {
                what: "element count",
                size: count as u64,
                max: limits.max_entries as u64,
            });
        }
        let needed = count.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(ManifestError::truncated(needed, self.remaining()));
        }
        Ok(count)
    }

    /// Length-prefixed string: positive length is single-byte text, negative
    /// length is UTF-16LE code units; both include a trailing NUL.
    pub fn read_fstring(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len == 0 {
            return Ok(String::new());
        }
        if len > 0 {
            let raw = self.take(len as usize)?;
            let raw = raw.strip_suffix(&[0u8]).unwrap_or(raw);
            return String::from_utf8(raw.to_vec())
                .map_err(|e| ManifestError::corrupt(format!("string is not valid UTF-8: {e}")));
        }
        let units = len.unsigned_abs() as usize;
        let raw = self.take(units.saturating_mul(2))?;
        let mut wide: Vec<u16> =
            raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        if wide.last() == Some(&0) {
            wide.pop();
        }
        String::from_utf16(&wide)
            .map_err(|e| ManifestError::corrupt(format!("string is not valid UTF-16: {e}")))
    }
}

#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

/// Start of a section whose size prefix is back-filled by `end_section`.
#[must_use]
pub struct SectionMark(usize);

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write a collection length as the u32 the wire format carries.
    pub fn write_count(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| ManifestError::LimitExceeded {
            what: "element count",
            size: n as u64,
            max: u32::MAX as u64,
        })?;
        self.write_u32(n);
        Ok(())
    }

    pub fn write_fstring(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            self.write_i32(0);
            return Ok(());
        }
        if s.is_ascii() {
            let len = i32::try_from(s.len() + 1).map_err(|_| too_long(s.len()))?;
            self.write_i32(len);
            self.write_bytes(s.as_bytes());
            self.write_u8(0);
        } else {
            let wide: Vec<u16> = s.encode_utf16().collect();
            let len = i32::try_from(wide.len() + 1).map_err(|_| too_long(wide.len()))?;
            self.write_i32(-len);
            for unit in wide {
                self.write_u16(unit);
            }
            self.write_u16(0);
        }
        Ok(())
    }

    /// Reserve the `size: u32` prefix and write the data version byte.
    pub fn begin_section(&mut self, data_version: u8) -> SectionMark {
        let mark = SectionMark(self.buf.len());
        self.write_u32(0);
        self.write_u8(data_version);
        mark
    }

    /// Back-fill the size prefix; the size covers the prefix itself.
    pub fn end_section(&mut self, mark: SectionMark) -> Result<()> {
        let size = self.buf.len() - mark.0;
        let size = u32::try_from(size).map_err(|_| ManifestError::LimitExceeded {
            what: "section size",
            size: size as u64,
            max: u32::MAX as u64,
        })?;
        self.buf[mark.0..mark.0 + 4].copy_from_slice(&size.to_le_bytes());
        Ok(())
    }
}

fn too_long(len: usize) -> ManifestError {
    ManifestError::LimitExceeded { what: "string length", size: len as u64, max: i32::MAX as u64 }
}

/// Read side of a size-prefixed, data-versioned section.
pub struct SectionFrame {
    start: usize,
    size: usize,
    pub data_version: u8,
}

impl SectionFrame {
    /// `size (u32) + data_version (u8)`.
    pub const PREFIX_LEN: usize = 5;

    pub fn open(r: &mut ByteReader<'_>) -> Result<Self> {
        let start = r.position();
        let size = r.read_u32()? as usize;
        let data_version = r.read_u8()?;
        if size < Self::PREFIX_LEN {
            return Err(ManifestError::corrupt(format!("section size {size} is smaller than its prefix")));
        }
        if size > r.len() - start {
            return Err(ManifestError::truncated(size, r.len() - start));
        }
        Ok(Self { start, size, data_version })
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }

    /// Reconcile consumed bytes with the declared size and leave the reader at
    /// the first byte after the section.
    pub fn finish(self, r: &mut ByteReader<'_>, what: &'static str, layout_known: bool) -> Result<()> {
        let consumed = r.position() - self.start;
        if consumed > self.size {
            if layout_known {
                return Err(ManifestError::corrupt(format!(
                    "{what} read {consumed} bytes past a declared size of {}",
                    self.size
                )));
            }
            return Err(ManifestError::UnsupportedVersion { what, version: self.data_version as u32 });
        }
        if consumed < self.size {
            tracing::debug!(section = what, skipped = self.size - consumed, "skipping unread section tail");
        }
        r.seek_to(self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fail_without_partial_values() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        let err = r.read_u32().unwrap_err();
        assert!(matches!(err, ManifestError::TruncatedData { needed: 4, available: 3 }));
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn fstring_ascii_and_wide() {
        let mut w = ByteWriter::new();
        w.write_fstring("").unwrap();
        w.write_fstring("Game.exe").unwrap();
        w.write_fstring("Spiel für alle").unwrap();
        let buf = w.into_inner();
        // ascii form: length includes the NUL
        assert_eq!(&buf[4..8], &9i32.to_le_bytes());

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_fstring().unwrap(), "");
        assert_eq!(r.read_fstring().unwrap(), "Game.exe");
        assert_eq!(r.read_fstring().unwrap(), "Spiel für alle");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn fstring_length_past_end_is_truncation() {
        let mut buf = 1000i32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        let mut r = ByteReader::new(&buf);
        let err = r.read_fstring().unwrap_err();
        assert!(matches!(err, ManifestError::TruncatedData { .. }));
    }

    #[test]
    fn count_that_cannot_fit_is_rejected_before_allocation() {
        let buf = u32::MAX.to_le_bytes();
        let mut r = ByteReader::new(&buf);
        let limits = DecodeLimits { max_entries: usize::MAX, ..DecodeLimits::default() };
        assert!(matches!(r.read_count(16, &limits), Err(ManifestError::TruncatedData { .. })));

        let mut r = ByteReader::new(&buf);
        assert!(matches!(
            r.read_count(0, &DecodeLimits::default()),
            Err(ManifestError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn section_frame_skips_unread_tail() {
        let mut w = ByteWriter::new();
        let mark = w.begin_section(7);
        w.write_u32(42);
        w.write_bytes(&[0xEE; 6]);
        w.end_section(mark).unwrap();
        w.write_u8(0x99);
        let buf = w.into_inner();

        let mut r = ByteReader::new(&buf);
        let frame = SectionFrame::open(&mut r).unwrap();
        assert_eq!(frame.data_version, 7);
        assert_eq!(r.read_u32().unwrap(), 42);
        frame.finish(&mut r, "test", false).unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x99);
    }

    #[test]
    fn section_overrun_is_unsupported_for_unknown_layouts() {
        let mut w = ByteWriter::new();
        let mark = w.begin_section(9);
        w.end_section(mark).unwrap();
        w.write_u32(0);
        let buf = w.into_inner();

        let mut r = ByteReader::new(&buf);
        let frame = SectionFrame::open(&mut r).unwrap();
        r.read_u32().unwrap();
        let err = frame.finish(&mut r, "test", false).unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedVersion { version: 9, .. }));
    }
}
