//! Little-endian binary encoding of the corner cache.
//!
//! Layout: magic, format version, type tag, canonical target JSON, then the
//! accepted and the rejected map. Strings are `u64` length + UTF-8 bytes;
//! every sequence is a `u64` count followed by its elements.

use calib_corners_core::{CornerData, CornerMap, FrameId};
use nalgebra::Point2;

pub const MAGIC: &[u8; 8] = b"CALIBCC\0";
pub const FORMAT_VERSION: u32 = 1;

/// Decoding failure; the message names the field that could not be read.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn str(&mut self, s: &str) {
        self.u64(s.len() as u64);
        self.bytes(s.as_bytes());
    }

    pub fn corner_data(&mut self, d: &CornerData) {
        self.u64(d.corners.len() as u64);
        for p in &d.corners {
            self.f64(p.x);
            self.f64(p.y);
        }
        self.u64(d.corner_ids.len() as u64);
        for &id in &d.corner_ids {
            self.i32(id);
        }
        self.u64(d.radii.len() as u64);
        for &r in &d.radii {
            self.f64(r);
        }
        self.u64(d.seq);
    }

    pub fn corner_map(&mut self, map: &CornerMap) {
        self.u64(map.len() as u64);
        for (frame, data) in map {
            self.i64(frame.timestamp_ns);
            self.u64(frame.cam_id as u64);
            self.corner_data(data);
        }
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| DecodeError(format!("truncated while reading {what}")))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        self.array(what).map(u32::from_le_bytes)
    }

    pub fn u64(&mut self, what: &str) -> Result<u64, DecodeError> {
        self.array(what).map(u64::from_le_bytes)
    }

    pub fn i64(&mut self, what: &str) -> Result<i64, DecodeError> {
        self.array(what).map(i64::from_le_bytes)
    }

    pub fn i32(&mut self, what: &str) -> Result<i32, DecodeError> {
        self.array(what).map(i32::from_le_bytes)
    }

    pub fn f64(&mut self, what: &str) -> Result<f64, DecodeError> {
        self.array(what).map(f64::from_le_bytes)
    }

    /// Element count that fits in the remaining input at `elem_size` bytes
    /// per element.
    fn count(&mut self, elem_size: usize, what: &str) -> Result<usize, DecodeError> {
        let n = self.u64(what)?;
        let remaining = (self.buf.len() - self.pos) as u64;
        if n.saturating_mul(elem_size as u64) > remaining {
            return Err(DecodeError(format!("{what} count {n} exceeds input")));
        }
        Ok(n as usize)
    }

    pub fn str(&mut self, what: &str) -> Result<&'a str, DecodeError> {
        let n = self.count(1, what)?;
        let raw = self.take(n, what)?;
        std::str::from_utf8(raw).map_err(|_| DecodeError(format!("{what} is not UTF-8")))
    }

    pub fn corner_data(&mut self) -> Result<CornerData, DecodeError> {
        let n = self.count(16, "corners")?;
        let mut corners = Vec::with_capacity(n);
        for _ in 0..n {
            let x = self.f64("corner x")?;
            let y = self.f64("corner y")?;
            corners.push(Point2::new(x, y));
        }
        let n = self.count(4, "corner ids")?;
        let corner_ids = (0..n)
            .map(|_| self.i32("corner id"))
            .collect::<Result<Vec<_>, _>>()?;
        let n = self.count(8, "radii")?;
        let radii = (0..n)
            .map(|_| self.f64("radius"))
            .collect::<Result<Vec<_>, _>>()?;
        let seq = self.u64("seq")?;

        let data = CornerData {
            corners,
            corner_ids,
            radii,
            seq,
        };
        if !data.is_consistent() {
            return Err(DecodeError(format!(
                "corner data lengths differ ({} corners, {} ids, {} radii)",
                data.corners.len(),
                data.corner_ids.len(),
                data.radii.len()
            )));
        }
        Ok(data)
    }

    pub fn corner_map(&mut self, what: &str) -> Result<CornerMap, DecodeError> {
        // Smallest entry: key + three empty counts + seq.
        let n = self.count(8 + 8 + 3 * 8 + 8, what)?;
        let mut map = CornerMap::new();
        for _ in 0..n {
            let timestamp_ns = self.i64("timestamp")?;
            let cam_id = usize::try_from(self.u64("camera id")?)
                .map_err(|_| DecodeError("camera id out of range".into()))?;
            let frame = FrameId::new(timestamp_ns, cam_id);
            let data = self.corner_data()?;
            if map.insert(frame, data).is_some() {
                return Err(DecodeError(format!(
                    "duplicate frame ({timestamp_ns}, {cam_id}) in {what}"
                )));
            }
        }
        Ok(map)
    }
}
