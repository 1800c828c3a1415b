//! Intrinsics guesses from single views of a planar target.

use crate::camera::CameraModel;
use crate::initializer::PoseInitializer;
use calib_corners_core::{estimate_homography, CornerData, TargetGeometry};
use log::debug;
use nalgebra::{DMatrix, Point2};
use std::collections::BTreeMap;

/// Target rows with fewer observed corners than this are not fitted.
const MIN_LINE_POINTS: usize = 6;

/// Focal length from one target-to-centred-pixel homography, assuming square
/// pixels and zero skew. Uses the orthogonality and equal-norm constraints on
/// the first two rotation columns and averages whichever is well posed.
fn focal_from_homography(h: &nalgebra::Matrix3<f64>) -> Option<f64> {
    let h = h / h.norm();
    let (h11, h12, h21, h22, h31, h32) = (
        h[(0, 0)],
        h[(0, 1)],
        h[(1, 0)],
        h[(1, 1)],
        h[(2, 0)],
        h[(2, 1)],
    );

    let mut f2 = Vec::with_capacity(2);
    let d1 = h31 * h32;
    if d1.abs() > 1e-12 {
        f2.push(-(h11 * h12 + h21 * h22) / d1);
    }
    let d2 = h31 * h31 - h32 * h32;
    if d2.abs() > 1e-12 {
        f2.push(-(h11 * h11 + h21 * h21 - h12 * h12 - h22 * h22) / d2);
    }

    let valid: Vec<f64> = f2
        .into_iter()
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(f64::sqrt)
        .collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

/// One pinhole candidate per frame that constrains the focal length.
///
/// The principal point is the image centre in pixel-centre coordinates.
pub fn pinhole_candidates<'a>(
    target: &TargetGeometry,
    frames: impl IntoIterator<Item = &'a CornerData>,
    image_size: (usize, usize),
) -> Vec<CameraModel> {
    let cx = (image_size.0 as f64 - 1.0) * 0.5;
    let cy = (image_size.1 as f64 - 1.0) * 0.5;

    let mut out = Vec::new();
    for frame in frames {
        let (src, dst): (Vec<Point2<f64>>, Vec<Point2<f64>>) = frame
            .iter()
            .filter(|(_, id, _)| *id >= 0)
            .filter_map(|(p, id, _)| {
                let q = target.point(id)?;
                Some((Point2::new(q.x, q.y), Point2::new(p.x - cx, p.y - cy)))
            })
            .unzip();
        let Some(h) = estimate_homography(&src, &dst) else {
            continue;
        };
        if let Some(f) = focal_from_homography(&h.h) {
            out.push(CameraModel::Pinhole {
                fx: f,
                fy: f,
                cx,
                cy,
            });
        }
    }
    debug!("{} pinhole candidates", out.len());
    out
}

/// Generalized focal length `gamma` of a unified camera with `xi = 1` from
/// one imaged straight line, in centred pixel coordinates.
///
/// With `xi = 1` a 3D line through the target plane lands on a circle, and
/// every point satisfies `[u, v, 1/2, -(u^2 + v^2)/2] . (nx, ny, nz*g, nz/g) = 0`
/// for the unit normal `n` of the plane through the line and the centre.
fn gamma_from_line(points: &[Point2<f64>]) -> Option<f64> {
    if points.len() < 4 {
        return None;
    }
    let mut a = DMatrix::<f64>::zeros(points.len(), 4);
    for (k, p) in points.iter().enumerate() {
        a[(k, 0)] = p.x;
        a[(k, 1)] = p.y;
        a[(k, 2)] = 0.5;
        a[(k, 3)] = -0.5 * (p.x * p.x + p.y * p.y);
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let c = vt.row(min_idx);

    let t = c[0] * c[0] + c[1] * c[1] + c[2] * c[3];
    if t.is_nan() || t <= 0.0 {
        return None;
    }
    let d = t.sqrt().recip();
    let (nx, ny) = (c[0] * d, c[1] * d);
    // Radial lines image as lines and carry no focal information.
    if nx.hypot(ny) > 0.95 {
        return None;
    }
    let nz = (1.0 - nx * nx - ny * ny).sqrt();
    let gamma = (c[2] * d / nz).abs();
    (gamma.is_finite() && gamma > 0.0).then_some(gamma)
}

/// Unified-model candidates, one per observed target row that is long
/// enough and not radial.
///
/// Candidates fix `alpha = 0.5`, the `xi = 1` sphere model, and take
/// `fx = fy = gamma / 2` from [`gamma_from_line`]. The principal point is the
/// image centre as in [`pinhole_candidates`]. Rows are target points sharing
/// a `y` coordinate, so an AprilGrid contributes the top and bottom edge of
/// every tag row.
pub fn unified_candidates<'a>(
    target: &TargetGeometry,
    frames: impl IntoIterator<Item = &'a CornerData>,
    image_size: (usize, usize),
) -> Vec<CameraModel> {
    let cx = (image_size.0 as f64 - 1.0) * 0.5;
    let cy = (image_size.1 as f64 - 1.0) * 0.5;

    let mut out = Vec::new();
    for frame in frames {
        let mut rows: BTreeMap<i64, Vec<Point2<f64>>> = BTreeMap::new();
        for (p, id, _) in frame.iter().filter(|(_, id, _)| *id >= 0) {
            let Some(q) = target.point(id) else {
                continue;
            };
            let key = (q.y * 1e6).round() as i64;
            rows.entry(key).or_default().push(Point2::new(p.x - cx, p.y - cy));
        }

        for line in rows.values().filter(|l| l.len() >= MIN_LINE_POINTS) {
            if let Some(gamma) = gamma_from_line(line) {
                out.push(CameraModel::Unified {
                    fx: 0.5 * gamma,
                    fy: 0.5 * gamma,
                    cx,
                    cy,
                    alpha: 0.5,
                });
            }
        }
    }
    debug!("{} unified candidates", out.len());
    out
}

/// Aggregate pose quality of one intrinsics candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntrinsicsScore {
    pub total_inliers: usize,
    pub mean_inlier_residual: f64,
}

/// Pick the candidate with the most pose inliers over `frames`, breaking ties
/// by the lower mean inlier residual.
pub fn select_intrinsics<'a, I>(
    candidates: &[CameraModel],
    target: &TargetGeometry,
    frames: I,
    initializer: &PoseInitializer,
) -> Option<(usize, IntrinsicsScore)>
where
    I: IntoIterator<Item = &'a CornerData> + Clone,
{
    let thr = initializer.params().inlier_threshold_px;
    let mut best: Option<(usize, IntrinsicsScore)> = None;

    for (idx, cam) in candidates.iter().enumerate() {
        let mut total_inliers = 0;
        let (mut sum, mut n) = (0.0, 0usize);
        for frame in frames.clone() {
            let Ok(pose) = initializer.init_pose(target, cam, frame) else {
                continue;
            };
            total_inliers += pose.num_inliers;
            for r in pose.residuals.iter().filter(|r| **r <= thr) {
                sum += r;
                n += 1;
            }
        }
        let score = IntrinsicsScore {
            total_inliers,
            mean_inlier_residual: if n > 0 { sum / n as f64 } else { f64::INFINITY },
        };

        let better = match &best {
            None => true,
            Some((_, b)) => {
                score.total_inliers > b.total_inliers
                    || (score.total_inliers == b.total_inliers
                        && score.mean_inlier_residual < b.mean_inlier_residual)
            }
        };
        if better {
            best = Some((idx, score));
        }
    }
    best
}
