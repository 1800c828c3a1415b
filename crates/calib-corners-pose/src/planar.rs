//! Planar pose from a plane-to-normalized-image homography.

use calib_corners_core::Homography;
use nalgebra::{Isometry3, Matrix3, Point2, Rotation3, Translation3, UnitQuaternion};

const EPS: f64 = 1e-12;

/// Decompose `H` (target plane `z = 0` to normalized image coordinates, so
/// `K = I`) into the transform mapping target points into the camera frame.
///
/// Columns are scaled by `λ = 2 / (|h1| + |h2|)`, the sign is chosen so the
/// target lies in front of the camera, and `[r1 r2 r1×r2]` is projected onto
/// SO(3).
pub fn pose_from_homography(h: &Homography) -> Option<Isometry3<f64>> {
    let m = &h.h;
    let h1 = m.column(0).into_owned();
    let h2 = m.column(1).into_owned();
    let h3 = m.column(2).into_owned();

    let n1 = h1.norm();
    let n2 = h2.norm();
    if n1 <= EPS || n2 <= EPS {
        return None;
    }
    let lambda = 2.0 / (n1 + n2);

    let (mut r1, mut r2, mut t) = (lambda * h1, lambda * h2, lambda * h3);
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= EPS {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r_orth = u * v_t;
    }
    if !r_orth.iter().chain(t.iter()).all(|v| v.is_finite()) {
        return None;
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(Isometry3::from_parts(Translation3::from(t), rot))
}

/// Ratio of the smallest to the largest singular value of the centred point
/// set; zero for collinear or coincident points.
pub fn planar_spread(points: &[Point2<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = nalgebra::Matrix2::<f64>::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigenvalues();
    let (lo, hi) = (eig.min().max(0.0), eig.max());
    if hi <= EPS {
        return 0.0;
    }
    (lo / hi).sqrt()
}
