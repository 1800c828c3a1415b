//! Bit sampling for AprilTag quads.

use crate::quad::Quad;
use crate::threshold::otsu_threshold_from_samples;
use calib_corners_core::{homography_from_4pt, sample_bilinear, GrayImageView, Homography};
use nalgebra::Point2;

/// Raw read-out of one quad.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TagObservation {
    /// Inner bits, row-major starting at quad corner 0, white = 1.
    pub code: u64,
    /// Fraction of border cells classified dark.
    pub border_score: f32,
}

/// Sub-cell offsets averaged per cell, in cell units.
const CELL_TAPS: [(f32, f32); 5] = [(0.0, 0.0), (-0.2, -0.2), (0.2, -0.2), (0.2, 0.2), (-0.2, 0.2)];

pub(crate) struct QuadDecoder {
    bits: usize,
    cells: usize,
    min_border_score: f32,
    min_contrast: u8,
    samples: Vec<u8>,
}

impl QuadDecoder {
    pub fn new(bits: usize, min_border_score: f32, min_contrast: u8) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }
        let cells = bits + 2;
        Some(Self {
            bits,
            cells,
            min_border_score,
            min_contrast,
            samples: Vec::with_capacity(cells * cells),
        })
    }

    /// Number of cells per side, border included.
    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn decode(&mut self, img: &GrayImageView<'_>, quad: &Quad) -> Option<TagObservation> {
        let h = self.cell_homography(quad)?;

        self.samples.clear();
        for cy in 0..self.cells {
            for cx in 0..self.cells {
                let mut acc = 0.0f32;
                for (dx, dy) in CELL_TAPS {
                    let p = h.apply(Point2::new(cx as f32 + 0.5 + dx, cy as f32 + 0.5 + dy));
                    if !inside(img, p) {
                        return None;
                    }
                    acc += sample_bilinear(img, p.x, p.y);
                }
                let v = (acc / CELL_TAPS.len() as f32).round().clamp(0.0, 255.0) as u8;
                self.samples.push(v);
            }
        }

        let lo = self.samples.iter().copied().min()?;
        let hi = self.samples.iter().copied().max()?;
        if hi.saturating_sub(lo) < self.min_contrast {
            return None;
        }

        decode_samples(&self.samples, self.cells, self.bits, self.min_border_score)
    }

    fn cell_homography(&self, quad: &Quad) -> Option<Homography> {
        let c = self.cells as f32;
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(c, 0.0),
            Point2::new(c, c),
            Point2::new(0.0, c),
        ];
        let dst = quad.corners.map(|p| Point2::new(p.x as f32, p.y as f32));
        homography_from_4pt(&src, &dst)
    }
}

fn inside(img: &GrayImageView<'_>, p: Point2<f32>) -> bool {
    p.x.is_finite()
        && p.y.is_finite()
        && p.x >= 0.0
        && p.y >= 0.0
        && p.x <= (img.width - 1) as f32
        && p.y <= (img.height - 1) as f32
}

fn decode_samples(
    samples: &[u8],
    cells: usize,
    bits: usize,
    min_border_score: f32,
) -> Option<TagObservation> {
    if samples.len() != cells * cells {
        return None;
    }
    let thr = otsu_threshold_from_samples(samples);

    let mut border_dark = 0u32;
    let mut border_total = 0u32;
    let mut code = 0u64;

    for cy in 0..cells {
        for cx in 0..cells {
            let is_dark = samples[cy * cells + cx] < thr;
            let is_border = cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells;
            if is_border {
                border_total += 1;
                border_dark += is_dark as u32;
            } else if !is_dark {
                let bit = (cy - 1) * bits + (cx - 1);
                code |= 1u64 << bit;
            }
        }
    }

    let border_score = border_dark as f32 / border_total.max(1) as f32;
    if border_score < min_border_score {
        return None;
    }

    Some(TagObservation { code, border_score })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_samples(code: u64, bits: usize) -> Vec<u8> {
        let cells = bits + 2;
        let mut out = vec![0u8; cells * cells];
        for cy in 1..=bits {
            for cx in 1..=bits {
                let bit = (cy - 1) * bits + (cx - 1);
                if (code >> bit) & 1 == 1 {
                    out[cy * cells + cx] = 240;
                } else {
                    out[cy * cells + cx] = 10;
                }
            }
        }
        for v in out.iter_mut() {
            if *v == 0 {
                *v = 12;
            }
        }
        out
    }

    #[test]
    fn samples_decode_to_code() {
        let code = 0x34e9;
        let obs = decode_samples(&tag_samples(code, 4), 6, 4, 0.9).expect("decode");
        assert_eq!(obs.code, code);
        assert_eq!(obs.border_score, 1.0);
    }

    #[test]
    fn bright_border_is_rejected() {
        let mut s = tag_samples(0x34e9, 4);
        for v in s.iter_mut().take(6) {
            *v = 250;
        }
        assert!(decode_samples(&s, 6, 4, 0.9).is_none());
    }
}
