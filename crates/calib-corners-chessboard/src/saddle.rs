//! Hessian saddle-point detector for checkerboard X-junctions.
//!
//! Response is `Ixy² - Ixx·Iyy` (minus the Hessian determinant) on a
//! Gaussian-smoothed image; it is large at X-junctions and about four times
//! weaker at L-corners of the board outline.

use crate::params::SaddleParams;
use calib_corners_core::{Corner, GrayImageView};
use nalgebra::Point2;

struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let r = (3.0 * sigma).ceil() as i32;
    let mut k: Vec<f32> = (-r..=r)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let s: f32 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= s);
    k
}

/// Separable Gaussian blur with clamped borders.
fn smooth(img: &GrayImageView<'_>, sigma: f32) -> FloatImage {
    let (w, h) = (img.width, img.height);
    let k = gaussian_kernel(sigma);
    let r = (k.len() / 2) as i32;

    let mut tmp = vec![0f32; w * h];
    for y in 0..h {
        let row = &img.data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (t, kv) in k.iter().enumerate() {
                let xx = (x as i32 + t as i32 - r).clamp(0, w as i32 - 1) as usize;
                acc += kv * row[xx] as f32;
            }
            tmp[y * w + x] = acc;
        }
    }

    let mut out = vec![0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (t, kv) in k.iter().enumerate() {
                let yy = (y as i32 + t as i32 - r).clamp(0, h as i32 - 1) as usize;
                acc += kv * tmp[yy * w + x];
            }
            out[y * w + x] = acc;
        }
    }

    FloatImage {
        width: w,
        height: h,
        data: out,
    }
}

struct Hessian {
    ixx: f32,
    iyy: f32,
    ixy: f32,
}

#[inline]
fn hessian(s: &FloatImage, x: usize, y: usize) -> Hessian {
    let c = s.at(x, y);
    Hessian {
        ixx: s.at(x + 1, y) - 2.0 * c + s.at(x - 1, y),
        iyy: s.at(x, y + 1) - 2.0 * c + s.at(x, y - 1),
        ixy: 0.25
            * (s.at(x + 1, y + 1) - s.at(x + 1, y - 1) - s.at(x - 1, y + 1)
                + s.at(x - 1, y - 1)),
    }
}

/// Vertex offset of a 1D parabola through `(-1, a)`, `(0, b)`, `(1, c)`.
#[inline]
fn parabola_peak(a: f32, b: f32, c: f32) -> f32 {
    let den = a - 2.0 * b + c;
    if den.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (a - c) / den).clamp(-0.5, 0.5)
}

/// Saddle candidates in raster order of their integer peak.
pub fn detect_saddles(img: &GrayImageView<'_>, params: &SaddleParams) -> Vec<Corner> {
    let (w, h) = (img.width, img.height);
    let border = params.border.max(2);
    if w <= 2 * border || h <= 2 * border || img.data.len() != w * h {
        return Vec::new();
    }

    let s = smooth(img, params.sigma);

    let mut resp = vec![0f32; w * h];
    let mut max_r = 0f32;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let hs = hessian(&s, x, y);
            let r = hs.ixy * hs.ixy - hs.ixx * hs.iyy;
            resp[y * w + x] = r;
            max_r = max_r.max(r);
        }
    }
    if max_r <= 0.0 {
        return Vec::new();
    }
    let thr = params.threshold_rel * max_r;
    let nr = params.nms_radius.max(1) as i32;

    let mut out = Vec::new();
    for y in border..h - border {
        for x in border..w - border {
            let idx = y * w + x;
            let r = resp[idx];
            if r < thr || r <= 0.0 {
                continue;
            }

            // Strict maximum; equal neighbours earlier in raster order win.
            let mut is_max = true;
            'nms: for dy in -nr..=nr {
                for dx in -nr..=nr {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let xx = x as i32 + dx;
                    let yy = y as i32 + dy;
                    if xx < 0 || yy < 0 || xx >= w as i32 || yy >= h as i32 {
                        continue;
                    }
                    let nidx = yy as usize * w + xx as usize;
                    let rn = resp[nidx];
                    if rn > r || (rn == r && nidx < idx) {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if !is_max {
                continue;
            }

            let ox = parabola_peak(resp[idx - 1], r, resp[idx + 1]);
            let oy = parabola_peak(resp[idx - w], r, resp[idx + w]);
            let hs = hessian(&s, x, y);
            let orientation = 0.5 * (2.0 * hs.ixy).atan2(hs.ixx - hs.iyy);

            out.push(Corner {
                position: Point2::new(x as f32 + ox, y as f32 + oy),
                orientation,
                strength: r,
            });
        }
    }
    out
}
