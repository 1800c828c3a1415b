//! Gradient-based subpixel corner refinement.
//!
//! For a true corner `c`, every image gradient `g(q)` in a small window is
//! orthogonal to `q - c`. Solving `sum(g gᵀ) c = sum(g gᵀ q)` iteratively
//! moves the estimate onto the saddle / L-junction.

use crate::image::{get_gray_clamped, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubpixParams {
    /// Maximum number of fixed-point iterations.
    pub max_iters: usize,
    /// Stop once the update is smaller than this (pixels).
    pub epsilon: f64,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            max_iters: 40,
            epsilon: 1e-3,
        }
    }
}

fn sample_clamped(img: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (xi, yi) = (x0 as i32, y0 as i32);

    let p00 = get_gray_clamped(img, xi, yi) as f64;
    let p10 = get_gray_clamped(img, xi + 1, yi) as f64;
    let p01 = get_gray_clamped(img, xi, yi + 1) as f64;
    let p11 = get_gray_clamped(img, xi + 1, yi + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Refine `start` inside a `(2*half_win+1)²` window.
///
/// Returns `None` when the structure tensor is singular (flat patch or a
/// single straight edge) or when the estimate escapes the window.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    start: Point2<f64>,
    half_win: usize,
    params: &SubpixParams,
) -> Option<Point2<f64>> {
    if img.width < 3 || img.height < 3 || half_win == 0 {
        return None;
    }

    let w = half_win as i32;
    let sigma = half_win as f64;
    let mut c = start;

    for _ in 0..params.max_iters {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();

        for dy in -w..=w {
            for dx in -w..=w {
                let qx = c.x + dx as f64;
                let qy = c.y + dy as f64;
                let gx = 0.5 * (sample_clamped(img, qx + 1.0, qy) - sample_clamped(img, qx - 1.0, qy));
                let gy = 0.5 * (sample_clamped(img, qx, qy + 1.0) - sample_clamped(img, qx, qy - 1.0));
                let r2 = (dx * dx + dy * dy) as f64;
                let wgt = (-r2 / (2.0 * sigma * sigma)).exp();

                let gxx = wgt * gx * gx;
                let gxy = wgt * gx * gy;
                let gyy = wgt * gy * gy;
                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 0)] += gxy;
                a[(1, 1)] += gyy;
                b[0] += gxx * qx + gxy * qy;
                b[1] += gxy * qx + gyy * qy;
            }
        }

        let det = a.determinant();
        if det.abs() < 1e-9 * (a.trace() * a.trace()).max(1e-12) {
            return None;
        }
        let next = a.try_inverse()? * b;
        let next = Point2::new(next[0], next[1]);
        let step = (next - c).norm();
        c = next;
        if step < params.epsilon {
            break;
        }
    }

    if (c - start).norm() > half_win as f64 || !c.x.is_finite() || !c.y.is_finite() {
        return None;
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GrayImage;

    /// Four-quadrant saddle with its center on the pixel corner (20, 20),
    /// i.e. at (19.5, 19.5) in pixel-center coordinates.
    fn saddle_image() -> GrayImage {
        let mut img = GrayImage::filled(40, 40, 0);
        for y in 0..40 {
            for x in 0..40 {
                let white = (x < 20) == (y < 20);
                img.set(x, y, if white { 220 } else { 30 });
            }
        }
        img
    }

    #[test]
    fn converges_to_saddle_center() {
        let img = saddle_image();
        let p = refine_corner(
            &img.view(),
            Point2::new(18.2, 20.7),
            4,
            &SubpixParams::default(),
        )
        .expect("refined");
        assert!((p.x - 19.5).abs() < 0.1, "x = {}", p.x);
        assert!((p.y - 19.5).abs() < 0.1, "y = {}", p.y);
    }

    #[test]
    fn flat_patch_is_rejected() {
        let img = GrayImage::filled(20, 20, 128);
        let out = refine_corner(&img.view(), Point2::new(10.0, 10.0), 3, &SubpixParams::default());
        assert!(out.is_none());
    }
}
